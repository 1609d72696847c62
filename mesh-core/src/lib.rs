//! Cross-cutting primitives shared by the xDS client, the etcd-style
//! registry and resolver, and the configuration source: backoff, debounce,
//! locality/health types, and an opaque attribute bag.

pub mod attributes;
pub mod backoff;
pub mod debounce;
pub mod error;
pub mod locality;

pub use attributes::Attributes;
pub use backoff::{Backoff, BackoffPolicy};
pub use debounce::{debounced, Debouncer, Kicker};
pub use error::{Error, Result};
pub use locality::{HealthStatus, Locality};
