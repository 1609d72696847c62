//! The resolver state pushed to every subscriber of a watched service name
//! (§4.6 step 4).

use std::sync::Arc;

use mesh_core::Attributes;

/// One endpoint assembled from a registered [`mesh_registry::Instance`] and
/// one of its [`mesh_registry::InstanceEndpoint`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverEndpoint {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub scheme: String,
    pub address: String,
    pub attributes: Attributes,
}

/// The full set of endpoints currently registered for a watched service
/// name, de-duplicated and sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub endpoints: Arc<Vec<ResolverEndpoint>>,
}
