//! A configuration source over an etcd-style key-value store (§4.7):
//! delivers a byte blob or a structured map, with optional change
//! propagation.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> config_source::Result<()> {
//! use config_source::{ConfigSource, ConfigSourceConfig};
//!
//! let source = ConfigSource::connect(ConfigSourceConfig {
//!     endpoints: vec!["http://127.0.0.1:2379".into()],
//!     prefix: Some("mesh/config/checkout/".into()),
//!     watch_enabled: true,
//!     ..Default::default()
//! })
//! .await?;
//!
//! let value = source.read().await?;
//! println!("{value:?}");
//! # Ok(())
//! # }
//! ```

mod error;
mod kv;
mod source;
mod value;

pub use error::{ConfigError, Result};
pub use source::{ConfigSource, ConfigSourceConfig};
pub use value::{ConfigValue, ScalarParser, YamlScalarParser};
