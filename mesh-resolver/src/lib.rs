//! An etcd-style watch resolver (§4.6): given a service name, produces and
//! pushes a [`state::ResolverState`] whose endpoints are the instances
//! registered under `prefix/namespace/serviceName/*`.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> mesh_resolver::Result<()> {
//! use mesh_resolver::{WatchResolver, WatchResolverConfig};
//!
//! let resolver = WatchResolver::connect(WatchResolverConfig {
//!     endpoints: vec!["http://127.0.0.1:2379".into()],
//!     prefix: "mesh".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let (_client_id, mut state) = resolver.add_watch("checkout");
//! state.changed().await.ok();
//! println!("{} endpoints", state.borrow().endpoints.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod kv;
mod resolver;
mod state;

pub use error::{ResolverError, Result};
pub use resolver::{ClientId, WatchResolver, WatchResolverConfig};
pub use state::{ResolverEndpoint, ResolverState};
