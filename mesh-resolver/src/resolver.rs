//! Watch resolver core: per-service watch tasks over a prefix-keyed registry,
//! debounced re-fetch, and state distribution to subscribers (§4.6).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mesh_core::{debounced, Attributes, Kicker};
use mesh_registry::Instance;
use tokio::sync::watch;

use crate::error::{Result, ResolverError};
use crate::kv::{EtcdStore, KvStore};
use crate::state::{ResolverEndpoint, ResolverState};

/// Identifies one `AddWatch` registration so a later `DelWatch` can remove
/// exactly that subscriber.
pub type ClientId = u64;

fn next_client_id() -> ClientId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Watch resolver connection and filtering settings (§6 `resolver.config`).
#[derive(Debug, Clone)]
pub struct WatchResolverConfig {
    pub endpoints: Vec<String>,
    pub prefix: String,
    /// Namespace instances are registered under. `"default"` passes every
    /// decoded instance's namespace through unfiltered, for compatibility
    /// with registrations that predate namespacing.
    pub namespace: String,
    /// Endpoint schemes eligible for resolution.
    pub protocols: HashSet<String>,
    /// Sliding window used to coalesce a burst of watch events into one
    /// re-fetch. Zero means fetch on every event.
    pub debounce: Duration,
}

impl Default for WatchResolverConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            prefix: String::new(),
            namespace: "default".to_string(),
            protocols: ["grpc", "http"].into_iter().map(str::to_string).collect(),
            debounce: Duration::ZERO,
        }
    }
}

impl WatchResolverConfig {
    fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(ResolverError::InvalidConfig("at least one endpoint is required".into()));
        }
        if self.prefix.is_empty() {
            return Err(ResolverError::InvalidConfig("prefix must not be empty".into()));
        }
        Ok(())
    }
}

struct AppHandle {
    state_tx: watch::Sender<Arc<ResolverState>>,
    clients: HashSet<ClientId>,
    task: tokio::task::JoinHandle<()>,
}

/// The etcd-style watch resolver. One instance is shared by every service
/// name the process resolves; it owns a single [`KvStore`] connection and
/// reconciles subscriptions per service name, mirroring the way
/// `xds_resolver::xds::resolver::XdsResolver` reconciles per application.
pub struct WatchResolver {
    store: Arc<dyn KvStore>,
    config: Arc<WatchResolverConfig>,
    apps: DashMap<String, AppHandle>,
}

impl WatchResolver {
    /// Connects to the configured etcd endpoints.
    pub async fn connect(config: WatchResolverConfig) -> Result<Self> {
        config.validate()?;
        let store = EtcdStore::connect(&config.endpoints).await?;
        Ok(Self { store: Arc::new(store), config: Arc::new(config), apps: DashMap::new() })
    }

    /// Registers `client` as a subscriber of `name`. Lazily starts the
    /// per-service watch task on first registration. Returns a receiver that
    /// already holds the latest cached state (or the default empty state)
    /// and will observe every future update (level-triggered).
    pub fn add_watch(&self, name: &str) -> (ClientId, watch::Receiver<Arc<ResolverState>>) {
        let client_id = next_client_id();
        let mut entry = self.apps.entry(name.to_string()).or_insert_with(|| {
            let (state_tx, _state_rx) = watch::channel(Arc::new(ResolverState::default()));
            let task = tokio::spawn(run_watch(
                self.store.clone(),
                self.config.clone(),
                name.to_string(),
                state_tx.clone(),
            ));
            AppHandle { state_tx, clients: HashSet::new(), task }
        });
        entry.clients.insert(client_id);
        let receiver = entry.state_tx.subscribe();
        (client_id, receiver)
    }

    /// Removes `client_id` from `name`'s subscriber set. Tears down the
    /// per-service watch task once the set is empty.
    pub fn del_watch(&self, name: &str, client_id: ClientId) {
        let mut remove_app = false;
        if let Some(mut entry) = self.apps.get_mut(name) {
            entry.clients.remove(&client_id);
            remove_app = entry.clients.is_empty();
        }
        if remove_app {
            if let Some((_, handle)) = self.apps.remove(name) {
                handle.task.abort();
            }
        }
    }
}

/// Per-service watch task (§4.6 steps 1-4): GET-with-prefix to seed, a
/// Watch-with-prefix to kick a debounced re-fetch loop.
async fn run_watch(
    store: Arc<dyn KvStore>,
    config: Arc<WatchResolverConfig>,
    name: String,
    state_tx: watch::Sender<Arc<ResolverState>>,
) {
    let prefix = format!("{}/{}/{}/", config.prefix.trim_end_matches('/'), config.namespace, name);

    let seed = match store.get_prefix(prefix.clone()).await {
        Ok(snapshot) => snapshot,
        Err(error) => {
            tracing::warn!(%name, %error, "initial watch resolver fetch failed");
            return;
        }
    };
    publish(&config, &seed.entries, &state_tx);

    let (kicker, mut debouncer) = debounced(config.debounce);
    tokio::spawn(watch_and_kick(store.clone(), prefix.clone(), seed.revision + 1, kicker));

    while debouncer.next().await.is_some() {
        match store.get_prefix(prefix.clone()).await {
            Ok(snapshot) => publish(&config, &snapshot.entries, &state_tx),
            Err(error) => tracing::warn!(%name, %error, "watch resolver re-fetch failed"),
        }
    }
}

/// Opens the prefix watch and forwards one kick per event batch (and once on
/// initial completion, since the watch itself only starts delivering after
/// the server has acked it).
async fn watch_and_kick(store: Arc<dyn KvStore>, prefix: String, start_revision: i64, kicker: Kicker) {
    let mut stream = match store.watch_prefix(prefix, start_revision).await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::warn!(%error, "failed to start watch resolver prefix watch");
            return;
        }
    };
    kicker.kick();
    while stream.next_event().await.is_some() {
        kicker.kick();
    }
}

/// Decodes every entry as an [`Instance`] record (skipping malformed ones),
/// filters by namespace and the protocol allow-list, de-duplicates, sorts by
/// name, and publishes (§4.6 step 4).
fn publish(config: &WatchResolverConfig, entries: &[crate::kv::KvEntry], state_tx: &watch::Sender<Arc<ResolverState>>) {
    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();

    for entry in entries {
        let instance: Instance = match serde_json::from_slice(&entry.value) {
            Ok(instance) => instance,
            Err(error) => {
                tracing::debug!(key = %entry.key, %error, "skipping malformed instance record");
                continue;
            }
        };

        if config.namespace != "default" && instance.namespace != config.namespace {
            continue;
        }

        for endpoint in &instance.endpoints {
            if !config.protocols.contains(&endpoint.scheme) {
                continue;
            }

            let dedupe_key = (
                instance.namespace.clone(),
                instance.name.clone(),
                instance.version.clone(),
                endpoint.scheme.clone(),
                endpoint.address.clone(),
            );
            if !seen.insert(dedupe_key) {
                continue;
            }

            let mut attributes = Attributes::new();
            attributes.insert("version", instance.version.clone());
            attributes.insert("region", instance.region.clone());
            attributes.insert("zone", instance.zone.clone());
            attributes.insert("campus", instance.campus.clone());
            for (key, value) in &instance.metadata {
                attributes.insert(key.clone(), value.clone());
            }
            // Endpoint metadata overrides instance metadata on conflicts.
            for (key, value) in &endpoint.metadata {
                attributes.insert(key.clone(), value.clone());
            }

            endpoints.push(ResolverEndpoint {
                namespace: instance.namespace.clone(),
                name: instance.name.clone(),
                version: instance.version.clone(),
                scheme: endpoint.scheme.clone(),
                address: endpoint.address.clone(),
                attributes,
            });
        }
    }

    endpoints.sort_by(|a, b| a.name.cmp(&b.name));
    let _ = state_tx.send(Arc::new(ResolverState { endpoints: Arc::new(endpoints) }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{BoxFuture, KvEntry, PrefixSnapshot, WatchStream};
    use mesh_registry::InstanceEndpoint;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    struct FakeWatchStream {
        rx: mpsc::Receiver<()>,
    }

    impl WatchStream for FakeWatchStream {
        fn next_event(&mut self) -> BoxFuture<'_, Option<()>> {
            Box::pin(async move { self.rx.recv().await })
        }
    }

    #[derive(Default)]
    struct FakeStore {
        records: StdMutex<HashMap<String, Vec<u8>>>,
        revision: std::sync::atomic::AtomicI64,
        watch_tx: StdMutex<Option<mpsc::Sender<()>>>,
    }

    impl FakeStore {
        fn put(&self, key: &str, instance: &Instance) {
            self.records.lock().unwrap().insert(key.to_string(), instance.canonical_json().into_bytes());
            self.revision.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = self.watch_tx.lock().unwrap().as_ref() {
                let _ = tx.try_send(());
            }
        }
    }

    impl KvStore for FakeStore {
        fn get_prefix(&self, prefix: String) -> BoxFuture<'_, Result<PrefixSnapshot>> {
            let records = self.records.lock().unwrap();
            let entries = records
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, value)| KvEntry { key: key.clone(), value: value.clone() })
                .collect();
            let revision = self.revision.load(Ordering::SeqCst);
            Box::pin(async move { Ok(PrefixSnapshot { entries, revision }) })
        }

        fn watch_prefix(&self, _prefix: String, _start_revision: i64) -> BoxFuture<'_, Result<Box<dyn WatchStream>>> {
            let (tx, rx) = mpsc::channel(8);
            *self.watch_tx.lock().unwrap() = Some(tx);
            Box::pin(async move {
                let stream: Box<dyn WatchStream> = Box::new(FakeWatchStream { rx });
                Ok(stream)
            })
        }
    }

    fn test_config() -> WatchResolverConfig {
        WatchResolverConfig {
            endpoints: vec!["http://127.0.0.1:2379".into()],
            prefix: "mesh".into(),
            namespace: "default".into(),
            protocols: ["grpc", "http"].into_iter().map(str::to_string).collect(),
            debounce: Duration::ZERO,
        }
    }

    fn test_resolver(store: Arc<FakeStore>) -> WatchResolver {
        WatchResolver { store, config: Arc::new(test_config()), apps: DashMap::new() }
    }

    #[tokio::test]
    async fn add_watch_seeds_state_from_existing_records() {
        let store = Arc::new(FakeStore::default());
        let instance = Instance::new("default", "svc").with_endpoint(InstanceEndpoint::new("grpc", "10.0.0.1:9000"));
        store.put(&instance.key("mesh"), &instance);

        let resolver = test_resolver(store);
        let (_client_id, mut state_rx) = resolver.add_watch("svc");
        state_rx.changed().await.unwrap();

        let state = state_rx.borrow().clone();
        assert_eq!(state.endpoints.len(), 1);
        assert_eq!(state.endpoints[0].address, "10.0.0.1:9000");
    }

    #[tokio::test]
    async fn unknown_protocol_scheme_is_filtered_out() {
        let store = Arc::new(FakeStore::default());
        let instance = Instance::new("default", "svc").with_endpoint(InstanceEndpoint::new("tcp", "10.0.0.1:9000"));
        store.put(&instance.key("mesh"), &instance);

        let resolver = test_resolver(store);
        let (_client_id, mut state_rx) = resolver.add_watch("svc");
        state_rx.changed().await.unwrap();

        assert!(state_rx.borrow().endpoints.is_empty());
    }

    #[tokio::test]
    async fn a_change_event_triggers_a_republish_with_the_new_endpoint() {
        let store = Arc::new(FakeStore::default());
        let resolver = test_resolver(store.clone());
        let (_client_id, mut state_rx) = resolver.add_watch("svc");
        state_rx.changed().await.unwrap();
        assert!(state_rx.borrow().endpoints.is_empty());

        let instance = Instance::new("default", "svc").with_endpoint(InstanceEndpoint::new("grpc", "10.0.0.2:9000"));
        store.put(&instance.key("mesh"), &instance);

        state_rx.changed().await.unwrap();
        assert_eq!(state_rx.borrow().endpoints.len(), 1);
    }

    #[tokio::test]
    async fn del_watch_tears_down_the_task_once_empty() {
        let store = Arc::new(FakeStore::default());
        let resolver = test_resolver(store);
        let (client_id, _state_rx) = resolver.add_watch("svc");
        assert!(resolver.apps.contains_key("svc"));

        resolver.del_watch("svc", client_id);
        assert!(!resolver.apps.contains_key("svc"));
    }
}
