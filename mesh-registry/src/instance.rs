//! The registered instance record and its content-addressed key (§4.5, §6).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// A single network endpoint exposed by an instance (e.g. a gRPC port and an
/// HTTP health-check port on the same host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEndpoint {
    pub scheme: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl InstanceEndpoint {
    pub fn new(scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            address: address.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A service instance registered under `prefix/namespace/name/<hash>` (§3,
/// §6). `metadata` and endpoint metadata use `BTreeMap` rather than
/// `HashMap` so serialization order is deterministic — required for the
/// canonical JSON the key hash is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub campus: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub endpoints: Vec<InstanceEndpoint>,
}

impl Instance {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: String::new(),
            region: String::new(),
            zone: String::new(),
            campus: String::new(),
            metadata: BTreeMap::new(),
            endpoints: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: InstanceEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Serializes this record to canonical JSON: `BTreeMap` fields and
    /// `serde`'s struct-field-declaration-order output together guarantee a
    /// single byte-for-byte representation for a given value, which is what
    /// the key's SHA-1 hash must be stable over.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("Instance always serializes")
    }

    /// Derives this instance's registry key: `prefix/namespace/name/<sha1-hex>`.
    pub fn key(&self, prefix: &str) -> String {
        let digest = Sha1::digest(self.canonical_json().as_bytes());
        format!(
            "{}/{}/{}/{}",
            prefix.trim_end_matches('/'),
            self.namespace,
            self.name,
            hex::encode(digest)
        )
    }
}
