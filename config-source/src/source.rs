//! Blob and KV/prefix configuration delivery with optional change
//! propagation (§4.7).

use std::sync::Arc;
use std::time::Duration;

use mesh_core::debounced;
use tokio::sync::watch;

use crate::error::{ConfigError, Result};
use crate::kv::{EtcdStore, KvStore};
use crate::value::{assemble_map, ConfigValue, ScalarParser, YamlScalarParser};

/// Which single key or prefix a [`ConfigSource`] reads, inferred from
/// whichever of [`ConfigSourceConfig::key`]/[`ConfigSourceConfig::prefix`] is
/// set (§4.7 "exactly one of `key` or `prefix` is set").
#[derive(Debug, Clone)]
enum Mode {
    Blob(String),
    Prefix(String),
}

/// Configuration source connection settings (§6 `config_source.config`).
pub struct ConfigSourceConfig {
    pub endpoints: Vec<String>,
    pub key: Option<String>,
    pub prefix: Option<String>,
    /// Whether [`ConfigSource::watch`] is allowed at all.
    pub watch_enabled: bool,
    /// Sliding window used to coalesce a burst of watch events into one
    /// re-read. Zero means re-read on every event.
    pub debounce: Duration,
    pub parser: Arc<dyn ScalarParser>,
}

impl Default for ConfigSourceConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            key: None,
            prefix: None,
            watch_enabled: false,
            debounce: Duration::ZERO,
            parser: Arc::new(YamlScalarParser),
        }
    }
}

impl ConfigSourceConfig {
    fn mode(&self) -> Result<Mode> {
        match (&self.key, &self.prefix) {
            (Some(key), None) => Ok(Mode::Blob(key.clone())),
            (None, Some(prefix)) => Ok(Mode::Prefix(prefix.clone())),
            (None, None) => Err(ConfigError::InvalidConfig("exactly one of key or prefix must be set".into())),
            (Some(_), Some(_)) => Err(ConfigError::InvalidConfig("key and prefix are mutually exclusive".into())),
        }
    }

    fn validate(&self) -> Result<Mode> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::InvalidConfig("at least one endpoint is required".into()));
        }
        self.mode()
    }
}

/// A configuration source over an etcd-style key-value store, delivering
/// either a raw blob or a nested map assembled from a key prefix.
pub struct ConfigSource {
    store: Arc<dyn KvStore>,
    config: Arc<ConfigSourceConfig>,
    mode: Mode,
}

impl ConfigSource {
    /// Connects to the configured etcd endpoints.
    pub async fn connect(config: ConfigSourceConfig) -> Result<Self> {
        let mode = config.validate()?;
        let store = EtcdStore::connect(&config.endpoints).await?;
        Ok(Self { store: Arc::new(store), config: Arc::new(config), mode })
    }

    /// Reads the current value: the raw bytes at `key` in blob mode, or a
    /// nested map assembled from every key below `prefix` in KV/prefix mode.
    pub async fn read(&self) -> Result<ConfigValue> {
        read_once(self.store.as_ref(), &self.mode, self.config.parser.as_ref()).await
    }

    /// Starts a background task that re-reads on every change and publishes
    /// to every subscriber of the returned receiver, which already holds the
    /// current value. Only allowed when `watch_enabled` is set (§4.7).
    pub async fn watch(&self) -> Result<watch::Receiver<Arc<ConfigValue>>> {
        if !self.config.watch_enabled {
            return Err(ConfigError::InvalidConfig("watch is not enabled for this config source".into()));
        }

        let initial = self.read().await?;
        let start_revision = match &self.mode {
            Mode::Blob(key) => self.store.get(key.clone()).await?.1,
            Mode::Prefix(prefix) => self.store.get_prefix(prefix.clone()).await?.revision,
        };

        let (state_tx, state_rx) = watch::channel(Arc::new(initial));
        tokio::spawn(run_watch(self.store.clone(), self.config.clone(), self.mode.clone(), start_revision + 1, state_tx));
        Ok(state_rx)
    }
}

async fn read_once(store: &dyn KvStore, mode: &Mode, parser: &dyn ScalarParser) -> Result<ConfigValue> {
    match mode {
        Mode::Blob(key) => {
            let (value, _revision) = store.get(key.clone()).await?;
            Ok(ConfigValue::Blob(value.unwrap_or_default()))
        }
        Mode::Prefix(prefix) => {
            let snapshot = store.get_prefix(prefix.clone()).await?;
            Ok(ConfigValue::Map(assemble_map(prefix, &snapshot.entries, parser)))
        }
    }
}

async fn run_watch(
    store: Arc<dyn KvStore>,
    config: Arc<ConfigSourceConfig>,
    mode: Mode,
    start_revision: i64,
    state_tx: watch::Sender<Arc<ConfigValue>>,
) {
    let (kicker, mut debouncer) = debounced(config.debounce);

    let watch_mode = mode.clone();
    let watch_store = store.clone();
    tokio::spawn(async move {
        let stream_result = match &watch_mode {
            Mode::Blob(key) => watch_store.watch_key(key.clone(), start_revision).await,
            Mode::Prefix(prefix) => watch_store.watch_prefix(prefix.clone(), start_revision).await,
        };
        let mut stream = match stream_result {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(%error, "failed to start config source watch");
                return;
            }
        };
        while stream.next_event().await.is_some() {
            kicker.kick();
        }
    });

    while debouncer.next().await.is_some() {
        match read_once(store.as_ref(), &mode, config.parser.as_ref()).await {
            Ok(value) => {
                let _ = state_tx.send(Arc::new(value));
            }
            Err(error) => tracing::warn!(%error, "config source re-read failed"),
        }
    }
}
