use crate::common::async_util::BoxFuture;

use crate::xds::route::{RouteDecision, RouteInput};

/// Trait for routing requests to clusters based on xDS routing configuration
/// (§4.4 pick steps 1-3: virtual host, route match, weighted-cluster pick).
pub(crate) trait XdsRouter: Send + Sync + 'static {
    fn route(&self, input: &RouteInput<'_>) -> BoxFuture<RouteDecision>;
}
