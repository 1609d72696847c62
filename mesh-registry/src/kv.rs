//! The key-value store contract the registry needs (§6 "Key-value store").
//!
//! Kept as a trait (rather than calling `etcd_client::Client` directly from
//! [`crate::registry::Registry`]) so the registry's lease/keepalive state
//! machine can be unit-tested against an in-memory fake.

use std::future::Future;
use std::pin::Pin;

use crate::error::{RegistryError, Result};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A lease keepalive channel: each call to [`LeaseKeeper::keep_alive`] sends
/// one keepalive request and awaits the server's acknowledgment, returning
/// the renewed TTL in seconds (0 means the lease has already expired).
pub(crate) trait LeaseKeeper: Send {
    fn keep_alive(&mut self) -> BoxFuture<'_, Result<i64>>;
}

/// Abstracts `Put(key, value, WithLease(id))`, `Get(prefix, WithPrefix)`,
/// `Delete(key)`, `Grant(ttl)`, `KeepAlive(leaseID) -> channel` (§6).
pub(crate) trait KvStore: Send + Sync {
    fn put_with_lease(&self, key: String, value: Vec<u8>, lease_id: i64) -> BoxFuture<'_, Result<()>>;
    fn delete(&self, key: String) -> BoxFuture<'_, Result<()>>;
    fn grant_lease(&self, ttl_secs: i64) -> BoxFuture<'_, Result<i64>>;
    fn keep_alive(&self, lease_id: i64) -> BoxFuture<'_, Result<Box<dyn LeaseKeeper>>>;
}

/// An `etcd-client`-backed [`KvStore`].
pub(crate) struct EtcdStore {
    client: etcd_client::Client,
}

impl EtcdStore {
    pub(crate) async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = etcd_client::Client::connect(endpoints, None)
            .await
            .map_err(|e| RegistryError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

struct EtcdLeaseKeeper {
    keeper: etcd_client::LeaseKeeper,
    stream: etcd_client::LeaseKeepAliveStream,
}

impl LeaseKeeper for EtcdLeaseKeeper {
    fn keep_alive(&mut self) -> BoxFuture<'_, Result<i64>> {
        Box::pin(async move {
            self.keeper
                .keep_alive()
                .await
                .map_err(|e| RegistryError::Connection(e.to_string()))?;
            let response = self
                .stream
                .message()
                .await
                .map_err(|e| RegistryError::Connection(e.to_string()))?;
            Ok(response.map_or(0, |r| r.ttl()))
        })
    }
}

impl KvStore for EtcdStore {
    fn put_with_lease(&self, key: String, value: Vec<u8>, lease_id: i64) -> BoxFuture<'_, Result<()>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            let options = etcd_client::PutOptions::new().with_lease(lease_id);
            client
                .put(key, value, Some(options))
                .await
                .map_err(|e| RegistryError::Connection(e.to_string()))?;
            Ok(())
        })
    }

    fn delete(&self, key: String) -> BoxFuture<'_, Result<()>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            client
                .delete(key, None)
                .await
                .map_err(|e| RegistryError::Connection(e.to_string()))?;
            Ok(())
        })
    }

    fn grant_lease(&self, ttl_secs: i64) -> BoxFuture<'_, Result<i64>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            let lease = client
                .lease_grant(ttl_secs, None)
                .await
                .map_err(|e| RegistryError::Connection(e.to_string()))?;
            Ok(lease.id())
        })
    }

    fn keep_alive(&self, lease_id: i64) -> BoxFuture<'_, Result<Box<dyn LeaseKeeper>>> {
        let mut client = self.client.clone();
        Box::pin(async move {
            let (keeper, stream) = client
                .lease_keep_alive(lease_id)
                .await
                .map_err(|e| RegistryError::Connection(e.to_string()))?;
            let lease_keeper: Box<dyn LeaseKeeper> = Box::new(EtcdLeaseKeeper { keeper, stream });
            Ok(lease_keeper)
        })
    }
}
