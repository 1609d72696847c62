use crate::client::cluster::ClusterClientRegistry;
use crate::common::async_util::BoxFuture;
use crate::xds::model::ResolverState;
use crate::xds::route::RouteDecision;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower::{BoxError, Service};

/// Errors that can occur during load balancing.
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum LoadBalancingError {
    #[error("No routing decision extension from the routing layer available")]
    NoRoutingDecision,
}

/// A Tower Service that forwards requests to the cluster named by the
/// routing layer's decision, via that cluster's [`ClusterChannel`](crate::client::cluster::ClusterChannel).
pub(crate) struct XdsLbService<Req, S>
where
    Req: Send + 'static,
    S: Service<Req>,
    S::Response: Send + 'static,
{
    cluster_registry: Arc<ClusterClientRegistry<S>>,
    _marker: std::marker::PhantomData<fn(Req)>,
}

impl<Req, S> XdsLbService<Req, S>
where
    Req: Send + 'static,
    S: Service<Req>,
    S::Response: Send + 'static,
{
    pub(crate) fn new(cluster_registry: Arc<ClusterClientRegistry<S>>) -> Self {
        Self { cluster_registry, _marker: std::marker::PhantomData }
    }
}

impl<Req, S> Clone for XdsLbService<Req, S>
where
    Req: Send + 'static,
    S: Service<Req>,
    S::Response: Send + 'static,
{
    fn clone(&self) -> Self {
        Self { cluster_registry: self.cluster_registry.clone(), _marker: std::marker::PhantomData }
    }
}

impl<B, S> Service<Request<B>> for XdsLbService<Request<B>, S>
where
    Request<B>: Send + 'static,
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Under xDS, the destination cluster is decided by the routing layer, which takes
        // the request as an input. Therefore, we cannot determine readiness without
        // knowing the target cluster, which is tied to the request.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let Some(routing_decision) = request.extensions().get::<RouteDecision>().cloned() else {
            return Box::pin(async move { Err(LoadBalancingError::NoRoutingDecision.into()) });
        };

        let mut channel = self.cluster_registry.channel(&routing_decision.cluster);

        Box::pin(async move {
            channel.ready().await?;
            channel.call(request).await
        })
    }
}

/// Reconciles `cluster_registry`'s per-cluster endpoint pools every time a
/// fresh [`ResolverState`] is published, until `state_rx` closes (§4.4
/// "State update on UpdateState"). `connect` builds a new `S` for a given
/// endpoint address and port; it is expected to connect lazily/asynchronously.
pub(crate) async fn sync_cluster_registry<S, C>(
    mut state_rx: tokio::sync::watch::Receiver<Arc<ResolverState>>,
    cluster_registry: Arc<ClusterClientRegistry<S>>,
    connect: C,
) where
    S: Clone,
    C: Fn(&str, u16) -> S,
{
    loop {
        let state = state_rx.borrow_and_update().clone();
        for (name, cluster) in state.clusters.iter() {
            cluster_registry.get_or_create(name).update_state(cluster, &cluster.endpoints, &connect);
        }
        if state_rx.changed().await.is_err() {
            break;
        }
    }
}
