use crate::client::cluster::ClusterClientRegistryGrpc;
use crate::client::endpoint::EndpointChannel;
use crate::client::lb::{sync_cluster_registry, XdsLbService};
use crate::client::route::{XdsRoutingLayer, XdsRoutingService};
use crate::xds::resolver::{ResolverStateRouter, ServiceMap, XdsResolver};
use crate::xds::xds_manager::XdsRouter;
use crate::XdsUri;
use http::Request;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::{body::Body as TonicBody, client::GrpcService, transport::Channel};
use tower::{util::BoxCloneService, BoxError, Service, ServiceBuilder};

/// Configuration for an xDS-capable channel.
/// Currently, only support specifying the xDS URI for the target service.
/// In the future, more configurations such as xDS management server address will be added.
#[derive(Clone, Debug, Default)]
pub struct XdsChannelConfig {
    target_uri: Option<XdsUri>,
}

impl XdsChannelConfig {
    /// Sets the xDS URI for the channel.
    #[must_use]
    pub fn with_target_uri(mut self, target_uri: XdsUri) -> Self {
        self.target_uri = Some(target_uri);
        self
    }
}

/// `XdsChannel` is an xDS-capable Tower Service.
///
/// It routes requests according to the xDS configuration that it fetches from the xDS management server.
/// The routing implementation is based on the [Google gRPC xDS features](https://grpc.github.io/grpc/core/md_doc_grpc_xds_features.html).
///
/// # Type Parameters
///
/// * `Req` - The request type that this channel accepts, as an example: `http::Request<Body>`.
/// * `S` - The underlying Tower Service type that handles individual endpoint connections.
pub struct XdsChannel<Req, S>
where
    Req: Send + 'static,
    S: Service<Req>,
    S::Response: Send + 'static,
{
    config: Arc<XdsChannelConfig>,
    // Currently the routing decision is directly executed by the XdsLbService.
    // In the future, we will add more layers in between for retries, request mirroring, etc.
    inner: XdsRoutingService<XdsLbService<Req, S>>,
}

#[allow(clippy::missing_fields_in_debug)]
impl<Req, S> Debug for XdsChannel<Req, S>
where
    Req: Send + 'static,
    S: Service<Req>,
    S::Response: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XdsChannel")
            .field("config", &self.config)
            .finish()
    }
}

impl<Req, S> Clone for XdsChannel<Req, S>
where
    Req: Send + 'static,
    S: Service<Req>,
    S::Response: Send + 'static,
    XdsRoutingService<XdsLbService<Req, S>>: Clone,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: self.inner.clone(),
        }
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

impl<B, S> Service<http::Request<B>> for XdsChannel<Request<B>, S>
where
    B: Send + 'static,
    Request<B>: Send + 'static,
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        self.inner.call(request)
    }
}

/// A type alias for an `XdsChannel` that uses Tonic's Channel as the underlying transport.
pub(crate) type XdsChannelTonicGrpc = XdsChannel<http::Request<TonicBody>, EndpointChannel<Channel>>;

/// A type-erased gRPC channel.
pub type XdsChannelGrpc =
    BoxCloneService<http::Request<TonicBody>, http::Response<TonicBody>, BoxError>;

// Static assertion that XdsChannelGrpc and XdsChannelTonicGrpc implement GrpcService
const _: fn() = || {
    fn assert_grpc_service<T: GrpcService<TonicBody>>() {}
    assert_grpc_service::<XdsChannelGrpc>();
    assert_grpc_service::<XdsChannelTonicGrpc>();
};

/// Builder for creating an `XdsChannel` or `XdsChannelGrpc`.
#[derive(Clone, Debug)]
pub struct XdsChannelBuilder {
    config: Arc<XdsChannelConfig>,
}

impl XdsChannelBuilder {
    /// Create a builder from an channel configurations.
    #[must_use]
    pub fn with_config(config: XdsChannelConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub(crate) fn build_tonic_grpc_channel(&self) -> XdsChannelTonicGrpc {
        let target = self
            .config
            .target_uri
            .clone()
            .expect("XdsChannelBuilder requires XdsChannelConfig::with_target_uri");
        let management_server = target
            .authority
            .clone()
            .expect("xDS URI must carry a management server authority (xds://<server>/<name>)");

        let node = xds_client::Node::new("rust-xds-resolver", env!("CARGO_PKG_VERSION"));
        let client_config = xds_client::ClientConfig::new(node, format!("https://{management_server}"));
        let xds_client = xds_client::XdsClientBuilder::new(client_config)
            .build(
                xds_client::TonicTransportBuilder::new(),
                xds_client::ProstCodec,
                xds_client::TokioRuntime,
            )
            .expect("xDS client requires at least one configured server");

        let resolver = XdsResolver::new(xds_client, ServiceMap::default());
        let (_client_id, state_rx) = resolver.add_watch(&target.domain);
        // The resolver must outlive every per-app watch it spawned; leak it into the
        // process since `XdsChannel` itself has no natural teardown hook yet.
        Box::leak(Box::new(resolver));

        let router: Arc<dyn XdsRouter> = Arc::new(ResolverStateRouter::new(state_rx.clone()));
        let routing_layer = XdsRoutingLayer::new(router);

        let cluster_registry = Arc::new(ClusterClientRegistryGrpc::new());
        tokio::spawn(sync_cluster_registry(state_rx, cluster_registry.clone(), |address, port| {
            Channel::from_shared(format!("http://{address}:{port}"))
                .expect("xDS endpoint address/port always form a valid URI")
                .connect_lazy()
        }));

        let lb_service = XdsLbService::new(cluster_registry);
        let service = ServiceBuilder::new().layer(routing_layer).service(lb_service);

        XdsChannelTonicGrpc {
            config: self.config.clone(),
            inner: service,
        }
    }

    /// Builds an `XdsChannelGrpc`, which is a type-erased gRPC channel.
    #[must_use]
    pub fn build_grpc_channel(&self) -> XdsChannelGrpc {
        BoxCloneService::new(self.build_tonic_grpc_channel())
    }

    /// Builds an `XdsChannelGrpc` from a pre-constructed router and cluster registry.
    /// This is primarily intended for testing purposes, bypassing the real ADS
    /// connection that [`XdsChannelBuilder::build_grpc_channel`] establishes.
    #[cfg(test)]
    pub(crate) fn build_grpc_channel_from_router(
        &self,
        router: Arc<dyn XdsRouter>,
        cluster_registry: Arc<ClusterClientRegistryGrpc>,
    ) -> XdsChannelGrpc {
        let routing_layer = XdsRoutingLayer::new(router);
        let lb_service = XdsLbService::new(cluster_registry);
        let service = ServiceBuilder::new()
            .layer(routing_layer)
            .service(lb_service);
        BoxCloneService::new(XdsChannelTonicGrpc {
            config: self.config.clone(),
            inner: service,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::XdsChannelBuilder;
    use super::XdsChannelConfig;
    use crate::client::cluster::ClusterClientRegistryGrpc;
    use crate::testutil::grpc::GreeterClient;
    use crate::testutil::grpc::HelloRequest;
    use crate::testutil::grpc::TestServer;
    use crate::xds::model::{CircuitBreakerLimits, ClusterSnapshot, EndpointSnapshot, LbPolicy};
    use crate::xds::route::{RouteDecision, RouteInput};
    use crate::xds::xds_manager::XdsRouter;
    use mesh_core::{HealthStatus, Locality};
    use std::sync::Arc;

    /// A router that always picks a single fixed cluster name, used to drive
    /// the cluster registry directly in tests without a live ADS stream.
    struct FixedClusterRouter;

    impl XdsRouter for FixedClusterRouter {
        fn route(&self, _input: &RouteInput<'_>) -> crate::common::async_util::BoxFuture<RouteDecision> {
            Box::pin(async move { RouteDecision { cluster: "test-cluster".to_string() } })
        }
    }

    /// Sets up multiple gRPC test servers and returns their addresses, clients and shutdown handles.
    async fn setup_grpc_servers(
        count: usize,
    ) -> (Vec<String>, Vec<TestServer>) {
        use crate::testutil::grpc::spawn_greeter_server;

        let mut servers = Vec::new();
        let mut server_addrs = Vec::new();

        for i in 0..count {
            let server_name = format!("server-{i}");
            let server = spawn_greeter_server(&server_name, None, None)
                .await
                .expect("Failed to spawn gRPC server");

            server_addrs.push(server.addr.to_string());
            servers.push(server);
        }

        (server_addrs, servers)
    }

    /// Sends multiple gRPC requests using the provided client and returns statistics about the requests.
    async fn send_grpc_requests(
        mut grpc_client: crate::testutil::grpc::GreeterClient<super::XdsChannelGrpc>,
        num_requests: usize,
    ) -> (
        usize,
        std::collections::HashMap<String, usize>,
        std::collections::HashMap<String, usize>,
    ) {
        let mut successful_requests = 0;
        let mut error_types = std::collections::HashMap::new();
        let mut server_counts = std::collections::HashMap::new();

        for i in 0..num_requests {
            let request_timeout = tokio::time::Duration::from_secs(3);
            let request_future = grpc_client.say_hello(HelloRequest {
                name: format!("test-request-{i}"),
            });

            match tokio::time::timeout(request_timeout, request_future).await {
                Ok(Ok(response)) => {
                    successful_requests += 1;
                    let message = response.into_inner().message;
                    if let Some(server_name) = message.split(':').next() {
                        *server_counts.entry(server_name.to_string()).or_insert(0) += 1;
                    }
                }
                Ok(Err(e)) => {
                    let error_type = format!("{e:?}").chars().take(80).collect::<String>();
                    *error_types.entry(error_type).or_insert(0) += 1;
                }
                Err(_) => {
                    *error_types.entry("Timeout".to_string()).or_insert(0) += 1;
                    if error_types.get("Timeout").unwrap_or(&0) > &2 {
                        break;
                    }
                }
            }
        }

        (successful_requests, error_types, server_counts)
    }

    #[tokio::test]
    /// Tests the `XdsChannelGrpc` with the round_robin balancer across a fixed cluster snapshot.
    async fn test_xds_channel_grpc_round_robin_distribution() {
        let num_requests = 1000;
        let num_servers = 5;
        let (addrs, servers) = setup_grpc_servers(num_servers).await;

        let cluster_registry = Arc::new(ClusterClientRegistryGrpc::new());
        let snapshot = ClusterSnapshot {
            name: "test-cluster".to_string(),
            lb_policy: LbPolicy::RoundRobin,
            circuit_breakers: CircuitBreakerLimits::default(),
            outlier_detection: crate::xds::policy::OutlierDetectionConfig::default(),
            endpoints: addrs
                .iter()
                .map(|addr| {
                    let socket_addr: std::net::SocketAddr = addr.parse().unwrap();
                    EndpointSnapshot {
                        address: socket_addr.ip().to_string(),
                        port: socket_addr.port(),
                        effective_weight: 1,
                        priority: 0,
                        locality: Locality::default(),
                        health: HealthStatus::Healthy,
                    }
                })
                .collect(),
        };
        let state = cluster_registry.get_or_create("test-cluster");
        state.update_state(&snapshot, &snapshot.endpoints, |address, port| {
            tonic::transport::Channel::from_shared(format!("http://{address}:{port}"))
                .unwrap()
                .connect_lazy()
        });

        let xds_channel_builder = XdsChannelBuilder::with_config(XdsChannelConfig::default());
        let xds_channel = xds_channel_builder
            .build_grpc_channel_from_router(Arc::new(FixedClusterRouter), cluster_registry);

        let client = GreeterClient::new(xds_channel);

        let (successful_requests, error_types, server_counts) =
            send_grpc_requests(client, num_requests).await;

        assert_eq!(
            successful_requests, num_requests,
            "Expected 100% success rate. Got {successful_requests} successful out of {num_requests} requests. Errors: {error_types:?}",
        );
        assert!(error_types.is_empty(), "Expected no errors but got: {error_types:?}");

        let actual_server_count = server_counts.len();
        assert_eq!(
            actual_server_count, num_servers,
            "Expected all {num_servers} servers to receive requests, but only {actual_server_count} received traffic: {server_counts:?}",
        );

        let expected_per_server = num_requests / num_servers;
        let min_requests_per_server = (expected_per_server as f64 / 1.5) as usize;
        let max_requests_per_server = (expected_per_server as f64 * 1.5) as usize;
        for (server_name, count) in &server_counts {
            assert!(
                (min_requests_per_server..=max_requests_per_server).contains(count),
                "Server {server_name} received {count} requests, expected roughly {expected_per_server} (1.5x variance)",
            );
        }

        for server in servers {
            let _ = server.shutdown.send(());
            let _ = server.handle.await;
        }
    }
}
