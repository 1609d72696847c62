//! Registration with lease-bound keepalive (§4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mesh_core::{Backoff, BackoffPolicy};
use tokio::sync::{oneshot, Mutex};

use crate::error::{RegistryError, Result};
use crate::instance::Instance;
use crate::kv::{EtcdStore, KvStore};

/// Registry connection settings (§6 `registry.config`).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub endpoints: Vec<String>,
    pub prefix: String,
    /// Lease TTL in seconds.
    pub ttl: Duration,
    /// Interval between keepalive requests while the lease is healthy.
    pub keep_alive: Duration,
    /// Sleep before re-granting a lease after a keepalive failure.
    pub retry_interval: Duration,
}

impl RegistryConfig {
    fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(RegistryError::InvalidConfig("at least one endpoint is required".into()));
        }
        if self.prefix.is_empty() {
            return Err(RegistryError::InvalidConfig("prefix must not be empty".into()));
        }
        if self.ttl.is_zero() {
            return Err(RegistryError::InvalidConfig("ttl must be greater than zero".into()));
        }
        Ok(())
    }
}

struct Registration {
    cancel: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// An etcd-style service registry: `Register`/`Deregister`/`Close` over a
/// [`KvStore`], with one background keepalive task per registered key.
pub struct Registry {
    store: Arc<dyn KvStore>,
    config: Arc<RegistryConfig>,
    registrations: Mutex<HashMap<String, Registration>>,
    closed: Arc<AtomicBool>,
}

impl Registry {
    /// Connects to the configured etcd endpoints.
    pub async fn connect(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let store = EtcdStore::connect(&config.endpoints).await?;
        Ok(Self {
            store: Arc::new(store),
            config: Arc::new(config),
            registrations: Mutex::new(HashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Registers `instance` under its content-addressed key. Grants a lease,
    /// PUTs the key bound to it, and starts a background keepalive task.
    /// PUT failure at this point is returned to the caller; the background
    /// task retries keepalive failures indefinitely.
    pub async fn register(&self, instance: Instance) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }

        let key = instance.key(&self.config.prefix);
        let value = instance.canonical_json().into_bytes();

        let lease_id = self.store.grant_lease(self.config.ttl.as_secs() as i64).await?;
        self.store.put_with_lease(key.clone(), value.clone(), lease_id).await?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(keepalive_loop(
            self.store.clone(),
            self.config.clone(),
            key.clone(),
            value,
            lease_id,
            cancel_rx,
        ));

        let mut registrations = self.registrations.lock().await;
        if let Some(previous) = registrations.insert(key, Registration { cancel: cancel_tx, task }) {
            let _ = previous.cancel.send(());
            previous.task.abort();
        }
        Ok(())
    }

    /// Cancels `instance`'s keepalive task and deletes its key.
    pub async fn deregister(&self, instance: &Instance) -> Result<()> {
        let key = instance.key(&self.config.prefix);
        let registration = self.registrations.lock().await.remove(&key);
        if let Some(registration) = registration {
            let _ = registration.cancel.send(());
            registration.task.abort();
        }
        self.store.delete(key).await
    }

    /// Cancels every background task. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut registrations = self.registrations.lock().await;
        for (_, registration) in registrations.drain() {
            let _ = registration.cancel.send(());
            registration.task.abort();
        }
    }
}

/// The per-key keepalive loop described in §4.5: request a keepalive
/// channel, treat TTL > 0 messages as "alive", and on channel close or
/// TTL == 0 re-grant a fresh lease and PUT again after `retry_interval`.
async fn keepalive_loop(
    store: Arc<dyn KvStore>,
    config: Arc<RegistryConfig>,
    key: String,
    value: Vec<u8>,
    mut lease_id: i64,
    mut cancel: oneshot::Receiver<()>,
) {
    // A fixed retry interval is exactly `BackoffPolicy` with multiplier 1.0:
    // reuses the shared backoff primitive without implying exponential growth.
    let retry_policy = match BackoffPolicy::new(config.retry_interval, config.retry_interval, 1.0) {
        Ok(policy) => policy,
        Err(_) => return,
    };
    let mut retry = Backoff::new(retry_policy);

    loop {
        let mut keeper = match store.keep_alive(lease_id).await {
            Ok(keeper) => keeper,
            Err(error) => {
                tracing::warn!(%key, %error, "failed to start lease keepalive, will retry");
                if !sleep_or_cancel(retry.next_backoff(), &mut cancel).await {
                    return;
                }
                match regrant(&store, &config, &key, &value).await {
                    Some(id) => {
                        lease_id = id;
                        continue;
                    }
                    None => return,
                }
            }
        };

        loop {
            tokio::select! {
                _ = &mut cancel => return,
                _ = tokio::time::sleep(config.keep_alive) => {
                    match keeper.keep_alive().await {
                        Ok(ttl) if ttl > 0 => {
                            retry.reset();
                        }
                        Ok(_) => {
                            tracing::warn!(%key, "lease expired, re-granting");
                            break;
                        }
                        Err(error) => {
                            tracing::warn!(%key, %error, "keepalive failed, re-granting");
                            break;
                        }
                    }
                }
            }
        }

        if !sleep_or_cancel(retry.next_backoff(), &mut cancel).await {
            return;
        }
        match regrant(&store, &config, &key, &value).await {
            Some(id) => lease_id = id,
            None => return,
        }
    }
}

/// Re-grants a lease and re-PUTs `key`, logging and leaving the loop to
/// retry on failure rather than propagating (§4.5 "retried indefinitely").
async fn regrant(store: &Arc<dyn KvStore>, config: &RegistryConfig, key: &str, value: &[u8]) -> Option<i64> {
    match store.grant_lease(config.ttl.as_secs() as i64).await {
        Ok(lease_id) => match store.put_with_lease(key.to_string(), value.to_vec(), lease_id).await {
            Ok(()) => Some(lease_id),
            Err(error) => {
                tracing::warn!(%key, %error, "failed to re-put after lease re-grant");
                None
            }
        },
        Err(error) => {
            tracing::warn!(%key, %error, "failed to re-grant lease");
            None
        }
    }
}

/// Sleeps for `duration` (if any), returning `false` if cancellation fires
/// first. `None` duration means the backoff policy's attempt cap was hit,
/// which never happens here since `retry_interval`'s policy has no cap —
/// kept explicit rather than unwrapped so a future cap is handled safely.
async fn sleep_or_cancel(duration: Option<Duration>, cancel: &mut oneshot::Receiver<()>) -> bool {
    let Some(duration) = duration else { return false };
    tokio::select! {
        _ = cancel => false,
        () = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::LeaseKeeper;
    use std::sync::atomic::AtomicI64;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        next_lease: AtomicI64,
        puts: StdMutex<HashMap<String, (Vec<u8>, i64)>>,
        deleted: StdMutex<Vec<String>>,
        fail_keep_alive: AtomicBool,
    }

    struct FakeLeaseKeeper {
        alive: bool,
    }

    impl LeaseKeeper for FakeLeaseKeeper {
        fn keep_alive(&mut self) -> crate::kv::BoxFuture<'_, Result<i64>> {
            let ttl = if self.alive { 30 } else { 0 };
            Box::pin(async move { Ok(ttl) })
        }
    }

    impl KvStore for FakeStore {
        fn put_with_lease(&self, key: String, value: Vec<u8>, lease_id: i64) -> crate::kv::BoxFuture<'_, Result<()>> {
            self.puts.lock().unwrap().insert(key, (value, lease_id));
            Box::pin(async { Ok(()) })
        }

        fn delete(&self, key: String) -> crate::kv::BoxFuture<'_, Result<()>> {
            self.puts.lock().unwrap().remove(&key);
            self.deleted.lock().unwrap().push(key);
            Box::pin(async { Ok(()) })
        }

        fn grant_lease(&self, _ttl_secs: i64) -> crate::kv::BoxFuture<'_, Result<i64>> {
            let id = self.next_lease.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(id) })
        }

        fn keep_alive(&self, _lease_id: i64) -> crate::kv::BoxFuture<'_, Result<Box<dyn LeaseKeeper>>> {
            let alive = !self.fail_keep_alive.load(Ordering::SeqCst);
            Box::pin(async move {
                let keeper: Box<dyn LeaseKeeper> = Box::new(FakeLeaseKeeper { alive });
                Ok(keeper)
            })
        }
    }

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            endpoints: vec!["http://127.0.0.1:2379".into()],
            prefix: "mesh".into(),
            ttl: Duration::from_secs(30),
            keep_alive: Duration::from_millis(10),
            retry_interval: Duration::from_millis(10),
        }
    }

    /// Builds a `Registry` over `store`, returning both it and a concrete
    /// handle to the same fake so tests can assert on its recorded calls.
    fn test_registry() -> (Registry, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::default());
        let registry = Registry {
            store: store.clone(),
            config: Arc::new(test_config()),
            registrations: Mutex::new(HashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (registry, store)
    }

    #[tokio::test]
    async fn register_puts_the_key_bound_to_a_lease() {
        let (registry, store) = test_registry();
        let instance = Instance::new("default", "svc").with_endpoint(InstanceEndpoint::new("grpc", "10.0.0.1:9000"));
        let key = instance.key("mesh");

        registry.register(instance).await.unwrap();

        assert!(store.puts.lock().unwrap().contains_key(&key));
        registry.close().await;
    }

    #[tokio::test]
    async fn deregister_deletes_the_key_and_cancels_keepalive() {
        let (registry, store) = test_registry();
        let instance = Instance::new("default", "svc");
        let key = instance.key("mesh");

        registry.register(instance.clone()).await.unwrap();
        registry.deregister(&instance).await.unwrap();

        assert!(store.deleted.lock().unwrap().contains(&key));
        assert!(!store.puts.lock().unwrap().contains_key(&key));
        registry.close().await;
    }

    #[tokio::test]
    async fn register_after_close_is_rejected() {
        let (registry, _store) = test_registry();
        registry.close().await;

        let result = registry.register(Instance::new("default", "svc")).await;
        assert!(matches!(result, Err(RegistryError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_regrants_a_lease_after_ttl_expires() {
        let (registry, store) = test_registry();
        store.fail_keep_alive.store(true, Ordering::SeqCst);
        let instance = Instance::new("default", "svc");

        registry.register(instance).await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;

        // A failing keepalive must trigger at least one lease re-grant.
        assert!(store.next_lease.load(Ordering::SeqCst) >= 2);
        registry.close().await;
    }
}
