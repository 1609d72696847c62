//! A Rust implementation of [xDS](https://www.envoyproxy.io/docs/envoy/latest/api-docs/xds_protocol) client.
//!
//! # Feature Flags
//!
//! - `transport-tonic`: Enables the use of the `tonic` transport. This enables `rt-tokio` and `codegen-prost` features. Enabled by default.
//! - `rt-tokio`: Enables the use of the `tokio` runtime. Enabled by default.
//! - `codegen-prost`: Enables the use of the `prost` codec generated resources. Enabled by default.

pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod resource;
pub mod runtime;
pub mod transport;

pub use client::config::{ClientConfig, ServerConfig};
pub use client::retry::{Backoff, RetryPolicy};
pub use client::watch::{ResourceEvent, ResourceWatcher};
pub use client::{XdsClient, XdsClientBuilder};
pub use error::{Error, Result};
pub use message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Locality, Node, ResourceAny};
pub use resource::{DecodeResult, DecodedResource, Resource, TypeUrl};
pub use transport::{Transport, TransportBuilder, TransportStream};

#[cfg(feature = "codegen-prost")]
pub use codec::prost::ProstCodec;
#[cfg(feature = "transport-tonic")]
pub use transport::tonic::{TonicTransport, TonicTransportBuilder};
#[cfg(feature = "rt-tokio")]
pub use runtime::tokio::TokioRuntime;
