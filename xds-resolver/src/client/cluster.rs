use dashmap::DashMap;
use http::{Request, Response};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tonic::body::Body as TonicBody;
use tower::{load::Load, BoxError, Service, ServiceExt};

use crate::client::endpoint::EndpointChannel;
use crate::xds::model::{ClusterSnapshot, EndpointSnapshot, LbPolicy};
use crate::xds::policy::{CircuitBreaker, OutlierDetectionConfig, OutlierDetector, RateLimiter, TokenKind};

type RespFut<Resp> = Pin<Box<dyn Future<Output = Result<Resp, BoxError>> + Send>>;

/// Errors a pick can fail with (§4.4 steps 4-7). These never abort the
/// balancer; they are surfaced to the caller as the RPC's error.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PickError {
    #[error("rate limit exceeded for cluster {0}")]
    RateLimitExceeded(String),
    #[error("circuit breaker open for cluster {0}")]
    CircuitBreakerOpen(String),
    #[error("no available instance in cluster {0}")]
    NoAvailableInstance(String),
}

struct TrackedEndpoint<S> {
    channel: EndpointChannel<S>,
    priority: u32,
    weight: u32,
}

/// Per-cluster endpoint pool plus the governance policies that gate picks
/// (§4.4). One instance is shared by every outstanding RPC to a cluster.
pub(crate) struct ClusterState<S> {
    name: String,
    endpoints: DashMap<String, TrackedEndpoint<S>>,
    lb_policy: RwLock<LbPolicy>,
    rate_limiter: RwLock<Arc<RateLimiter>>,
    circuit_breaker: RwLock<Arc<CircuitBreaker>>,
    outlier_detector: RwLock<Arc<OutlierDetector>>,
}

impl<S> ClusterState<S>
where
    S: Clone,
{
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            endpoints: DashMap::new(),
            lb_policy: RwLock::new(LbPolicy::default()),
            rate_limiter: RwLock::new(Arc::new(RateLimiter::new(f64::MAX, f64::MAX))),
            circuit_breaker: RwLock::new(Arc::new(CircuitBreaker::new(Default::default()))),
            outlier_detector: RwLock::new(Arc::new(OutlierDetector::new(OutlierDetectionConfig::default()))),
        }
    }

    /// Reconciles the endpoint pool against a fresh `ClusterLoadAssignment`
    /// snapshot and swaps the circuit breaker and outlier detector for ones
    /// built from the cluster's latest config (§4.4 "State update on
    /// UpdateState": "if a new circuit-breaker, outlier-detector, or
    /// rate-limiter config is present, stop the old instance and start the
    /// new one"). New endpoint keys are connected via `connect`; keys no
    /// longer present are dropped from the pool.
    pub(crate) fn update_state<C>(&self, snapshot: &ClusterSnapshot, endpoints: &[EndpointSnapshot], connect: C)
    where
        C: Fn(&str, u16) -> S,
    {
        *self.lb_policy.write().unwrap() = snapshot.lb_policy;
        *self.circuit_breaker.write().unwrap() = Arc::new(CircuitBreaker::new(snapshot.circuit_breakers));
        *self.outlier_detector.write().unwrap() = Arc::new(OutlierDetector::new(snapshot.outlier_detection));

        let mut live_keys = HashSet::new();
        for endpoint in endpoints {
            let key = format!("{}:{}", endpoint.address, endpoint.port);
            live_keys.insert(key.clone());
            self.endpoints.entry(key).or_insert_with(|| TrackedEndpoint {
                channel: EndpointChannel::new(connect(&endpoint.address, endpoint.port)),
                priority: endpoint.priority,
                weight: endpoint.effective_weight,
            });
        }
        self.endpoints.retain(|key, _| live_keys.contains(key));
    }

    /// `Report(err)`: releases the circuit-breaker token acquired during
    /// `pick` and records the outcome with the outlier detector. In-flight
    /// decrement happens automatically when the RPC future completes, via
    /// [`EndpointChannel`]'s RAII tracker.
    pub(crate) fn report(&self, key: &str, success: bool) {
        let now = std::time::Instant::now();
        let outlier_detector = self.outlier_detector.read().unwrap().clone();
        outlier_detector.report(key, success, now);
        outlier_detector.maybe_sweep(now);
        self.circuit_breaker.read().unwrap().release(TokenKind::Requests);
    }

    /// Pick steps 4-7: rate limiter, circuit breaker, then priority/LB-policy
    /// endpoint selection with ejected-endpoint filtering.
    pub(crate) fn pick(&self) -> Result<(String, EndpointChannel<S>), PickError> {
        if !self.rate_limiter.read().unwrap().allow() {
            return Err(PickError::RateLimitExceeded(self.name.clone()));
        }

        let circuit_breaker = self.circuit_breaker.read().unwrap().clone();
        if !circuit_breaker.try_acquire(TokenKind::Requests) {
            return Err(PickError::CircuitBreakerOpen(self.name.clone()));
        }

        let outlier_detector = self.outlier_detector.read().unwrap().clone();
        let candidates: Vec<(String, u32, u32)> = self
            .endpoints
            .iter()
            .filter(|entry| !outlier_detector.is_ejected(entry.key()))
            .map(|entry| (entry.key().clone(), entry.value().priority, entry.value().weight))
            .collect();

        if candidates.is_empty() {
            circuit_breaker.release(TokenKind::Requests);
            return Err(PickError::NoAvailableInstance(self.name.clone()));
        }

        let lowest_priority = candidates.iter().map(|(_, priority, _)| *priority).min().unwrap();
        let group: Vec<_> = candidates.into_iter().filter(|(_, priority, _)| *priority == lowest_priority).collect();

        let chosen_key = match *self.lb_policy.read().unwrap() {
            LbPolicy::RoundRobin => pick_weighted(&group),
            LbPolicy::Random => group[fastrand::usize(0..group.len())].0.clone(),
            LbPolicy::LeastRequest => group
                .iter()
                .min_by_key(|(key, ..)| self.endpoints.get(key.as_str()).map(|e| e.channel.load()).unwrap_or(0))
                .map(|(key, ..)| key.clone())
                .expect("group is non-empty"),
        };

        match self.endpoints.get(&chosen_key) {
            Some(entry) => Ok((chosen_key, entry.channel.clone())),
            None => {
                circuit_breaker.release(TokenKind::Requests);
                Err(PickError::NoAvailableInstance(self.name.clone()))
            }
        }
    }
}

/// Cumulative-weight selection via a uniform draw modulo the total weight
/// (§4.4 step 6, round_robin). A weight of 0 is treated as 1.
fn pick_weighted(group: &[(String, u32, u32)]) -> String {
    let total: u32 = group.iter().map(|(_, _, weight)| (*weight).max(1)).sum();
    let mut draw = fastrand::u32(0..total);
    for (key, _, weight) in group {
        let weight = (*weight).max(1);
        if draw < weight {
            return key.clone();
        }
        draw -= weight;
    }
    group.last().expect("group is non-empty").0.clone()
}

/// A channel to a single xDS cluster: every call runs the pick algorithm,
/// forwards to the chosen endpoint, and reports the outcome back to the
/// cluster's circuit breaker and outlier detector.
pub(crate) struct ClusterChannel<S> {
    state: Arc<ClusterState<S>>,
}

impl<S> Clone for ClusterChannel<S> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<S, Req> Service<Req> for ClusterChannel<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = RespFut<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move {
            let (key, mut channel) = state.pick().map_err(BoxError::from)?;
            if let Err(error) = channel.ready().await {
                state.report(&key, false);
                return Err(error.into());
            }
            let result = channel.call(req).await;
            state.report(&key, result.is_ok());
            result.map_err(Into::into)
        })
    }
}

/// A type-erased cluster channel for tonic clients.
pub(crate) type ClusterChannelGrpc = ClusterChannel<tonic::transport::Channel>;

/// Manages one [`ClusterState`] per cluster name, created lazily on first
/// lookup.
pub(crate) struct ClusterClientRegistry<S> {
    registry: DashMap<String, Arc<ClusterState<S>>>,
}

impl<S> ClusterClientRegistry<S>
where
    S: Clone,
{
    pub(crate) fn new() -> Self {
        Self { registry: DashMap::new() }
    }

    /// Returns the cluster's state, creating an empty one on first access.
    /// Reconciliation (`update_state`) is driven separately by whatever owns
    /// the resolver state subscription.
    pub(crate) fn get_or_create(&self, name: &str) -> Arc<ClusterState<S>> {
        self.registry.entry(name.to_string()).or_insert_with(|| Arc::new(ClusterState::new(name.to_string()))).clone()
    }

    pub(crate) fn channel(&self, name: &str) -> ClusterChannel<S> {
        ClusterChannel { state: self.get_or_create(name) }
    }
}

impl<S> Default for ClusterClientRegistry<S>
where
    S: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A type-erased registry for tonic clients.
pub(crate) type ClusterClientRegistryGrpc = ClusterClientRegistry<tonic::transport::Channel>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::model::CircuitBreakerLimits;
    use mesh_core::{HealthStatus, Locality};

    fn endpoint(address: &str, port: u16, weight: u32, priority: u32) -> EndpointSnapshot {
        EndpointSnapshot {
            address: address.to_string(),
            port,
            effective_weight: weight,
            priority,
            locality: Locality::default(),
            health: HealthStatus::Healthy,
        }
    }

    #[test]
    fn pick_fails_with_no_available_instance_when_pool_is_empty() {
        let state: ClusterState<()> = ClusterState::new("c1".to_string());
        assert!(matches!(state.pick(), Err(PickError::NoAvailableInstance(_))));
    }

    #[test]
    fn least_priority_group_is_preferred() {
        let state: ClusterState<&'static str> = ClusterState::new("c1".to_string());
        let snapshot = ClusterSnapshot {
            name: "c1".to_string(),
            lb_policy: LbPolicy::RoundRobin,
            circuit_breakers: CircuitBreakerLimits::default(),
            outlier_detection: crate::xds::policy::OutlierDetectionConfig::default(),
            endpoints: Vec::new(),
        };
        let endpoints = vec![endpoint("10.0.0.1", 80, 1, 1), endpoint("10.0.0.2", 80, 1, 0)];
        state.update_state(&snapshot, &endpoints, |_, _| "svc");
        let (key, _) = state.pick().unwrap();
        assert_eq!(key, "10.0.0.2:80");
    }

    #[test]
    fn circuit_breaker_rejects_past_max_requests() {
        let state: ClusterState<&'static str> = ClusterState::new("c1".to_string());
        let snapshot = ClusterSnapshot {
            name: "c1".to_string(),
            lb_policy: LbPolicy::RoundRobin,
            circuit_breakers: CircuitBreakerLimits { max_requests: 1, ..Default::default() },
            outlier_detection: crate::xds::policy::OutlierDetectionConfig::default(),
            endpoints: Vec::new(),
        };
        let endpoints = vec![endpoint("10.0.0.1", 80, 1, 0)];
        state.update_state(&snapshot, &endpoints, |_, _| "svc");

        let (key, _) = state.pick().unwrap();
        assert!(matches!(state.pick(), Err(PickError::CircuitBreakerOpen(_))));
        state.report(&key, true);
        assert!(state.pick().is_ok());
    }

    #[derive(Clone)]
    struct NeverReady;

    impl Service<()> for NeverReady {
        type Response = ();
        type Error = BoxError;
        type Future = RespFut<()>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Err("endpoint not ready".into()))
        }

        fn call(&mut self, _req: ()) -> Self::Future {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn ready_failure_releases_circuit_breaker_token() {
        let state: Arc<ClusterState<NeverReady>> = Arc::new(ClusterState::new("c1".to_string()));
        let snapshot = ClusterSnapshot {
            name: "c1".to_string(),
            lb_policy: LbPolicy::RoundRobin,
            circuit_breakers: CircuitBreakerLimits { max_requests: 1, ..Default::default() },
            outlier_detection: crate::xds::policy::OutlierDetectionConfig::default(),
            endpoints: Vec::new(),
        };
        let endpoints = vec![endpoint("10.0.0.1", 80, 1, 0)];
        state.update_state(&snapshot, &endpoints, |_, _| NeverReady);

        let mut channel = ClusterChannel { state: state.clone() };
        let result = channel.call(()).await;
        assert!(result.is_err());

        // If the pick's circuit-breaker token leaked on the ready() error
        // path, this would fail with CircuitBreakerOpen instead.
        assert!(state.pick().is_ok());
    }
}
