//! The key-value store contract the configuration source needs (§6
//! "Key-value store"): a single-key `Get`/`Watch` pair for blob mode and a
//! prefix `Get`/`Watch` pair for KV/prefix mode.

use std::future::Future;
use std::pin::Pin;

use crate::error::{ConfigError, Result};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
}

pub(crate) struct PrefixSnapshot {
    pub entries: Vec<KvEntry>,
    pub revision: i64,
}

/// A live watch, either on a single key or on every key below a prefix.
/// `next_event` resolves once per message the server sends; `None` means the
/// watch ended.
pub(crate) trait WatchStream: Send {
    fn next_event(&mut self) -> BoxFuture<'_, Option<()>>;
}

pub(crate) trait KvStore: Send + Sync {
    fn get(&self, key: String) -> BoxFuture<'_, Result<(Option<Vec<u8>>, i64)>>;
    fn get_prefix(&self, prefix: String) -> BoxFuture<'_, Result<PrefixSnapshot>>;
    fn watch_key(&self, key: String, start_revision: i64) -> BoxFuture<'_, Result<Box<dyn WatchStream>>>;
    fn watch_prefix(&self, prefix: String, start_revision: i64) -> BoxFuture<'_, Result<Box<dyn WatchStream>>>;
}

/// An `etcd-client`-backed [`KvStore`].
pub(crate) struct EtcdStore {
    client: etcd_client::Client,
}

impl EtcdStore {
    pub(crate) async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = etcd_client::Client::connect(endpoints, None)
            .await
            .map_err(|e| ConfigError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

struct EtcdWatchStream {
    _watcher: etcd_client::Watcher,
    stream: etcd_client::WatchStream,
}

impl WatchStream for EtcdWatchStream {
    fn next_event(&mut self) -> BoxFuture<'_, Option<()>> {
        Box::pin(async move { self.stream.message().await.ok().flatten().map(|_| ()) })
    }
}

impl KvStore for EtcdStore {
    fn get(&self, key: String) -> BoxFuture<'_, Result<(Option<Vec<u8>>, i64)>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            let response = client
                .get(key, None)
                .await
                .map_err(|e| ConfigError::Connection(e.to_string()))?;
            let revision = response.header().map_or(0, |header| header.revision());
            let value = response.kvs().first().map(|kv| kv.value().to_vec());
            Ok((value, revision))
        })
    }

    fn get_prefix(&self, prefix: String) -> BoxFuture<'_, Result<PrefixSnapshot>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            let options = etcd_client::GetOptions::new().with_prefix();
            let response = client
                .get(prefix, Some(options))
                .await
                .map_err(|e| ConfigError::Connection(e.to_string()))?;
            let revision = response.header().map_or(0, |header| header.revision());
            let entries = response
                .kvs()
                .iter()
                .map(|kv| KvEntry {
                    key: String::from_utf8_lossy(kv.key()).into_owned(),
                    value: kv.value().to_vec(),
                })
                .collect();
            Ok(PrefixSnapshot { entries, revision })
        })
    }

    fn watch_key(&self, key: String, start_revision: i64) -> BoxFuture<'_, Result<Box<dyn WatchStream>>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            let options = etcd_client::WatchOptions::new().with_start_revision(start_revision);
            let (watcher, stream) = client
                .watch(key, Some(options))
                .await
                .map_err(|e| ConfigError::Connection(e.to_string()))?;
            let watch_stream: Box<dyn WatchStream> = Box::new(EtcdWatchStream { _watcher: watcher, stream });
            Ok(watch_stream)
        })
    }

    fn watch_prefix(&self, prefix: String, start_revision: i64) -> BoxFuture<'_, Result<Box<dyn WatchStream>>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            let options = etcd_client::WatchOptions::new()
                .with_prefix()
                .with_start_revision(start_revision);
            let (watcher, stream) = client
                .watch(prefix, Some(options))
                .await
                .map_err(|e| ConfigError::Connection(e.to_string()))?;
            let watch_stream: Box<dyn WatchStream> = Box::new(EtcdWatchStream { _watcher: watcher, stream });
            Ok(watch_stream)
        })
    }
}
