//! An etcd-style service registry: content-addressed instance keys bound to
//! a lease, kept alive by a per-registration background task (§4.5).

mod error;
mod instance;
mod kv;
mod registry;

pub use error::{RegistryError, Result};
pub use instance::{Instance, InstanceEndpoint};
pub use registry::{Registry, RegistryConfig};
