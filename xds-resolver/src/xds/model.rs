//! Internal snapshot types produced by the resource decoder (see [`crate::xds::decoder`]).
//!
//! These are the codegen-agnostic shapes the resolver core and balancer operate
//! on; they never carry prost types directly.

use mesh_core::{HealthStatus, Locality};
use std::sync::Arc;

/// A decoded `Listener` resource.
#[derive(Debug, Clone)]
pub(crate) struct ListenerSnapshot {
    pub name: String,
    /// Name of the `RouteConfiguration` this listener's HTTP connection manager
    /// references. Falls back to the listener's own name when no RDS hint is
    /// present on the filter chain.
    pub route_config_name: String,
}

/// A decoded `RouteConfiguration` resource.
#[derive(Debug, Clone)]
pub(crate) struct RouteConfigSnapshot {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Debug, Clone)]
pub(crate) struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub matcher: crate::xds::matcher::CompiledMatch,
    pub action: RouteAction,
}

#[derive(Debug, Clone)]
pub(crate) enum RouteAction {
    Cluster(String),
    WeightedClusters(Vec<WeightedCluster>),
}

#[derive(Debug, Clone)]
pub(crate) struct WeightedCluster {
    pub name: String,
    pub weight: u32,
}

impl RouteAction {
    /// All cluster names this action may route to, for RDS→CDS/EDS name
    /// collection during subscription reconciliation (§4.3 step 3).
    pub(crate) fn cluster_names(&self) -> Vec<&str> {
        match self {
            RouteAction::Cluster(name) => vec![name.as_str()],
            RouteAction::WeightedClusters(clusters) => {
                clusters.iter().map(|c| c.name.as_str()).collect()
            }
        }
    }

    /// Picks a cluster by cumulative-weight selection using a uniform draw
    /// modulo the total weight (§4.4 step 3).
    pub(crate) fn pick_cluster(&self) -> Option<&str> {
        match self {
            RouteAction::Cluster(name) => Some(name.as_str()),
            RouteAction::WeightedClusters(clusters) => {
                let total: u32 = clusters.iter().map(|c| c.weight).sum();
                if total == 0 {
                    return clusters.first().map(|c| c.name.as_str());
                }
                let mut draw = fastrand::u32(0..total);
                for cluster in clusters {
                    if draw < cluster.weight {
                        return Some(cluster.name.as_str());
                    }
                    draw -= cluster.weight;
                }
                clusters.last().map(|c| c.name.as_str())
            }
        }
    }
}

/// Load balancing policy, decoded from a `Cluster`'s `lb_policy` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum LbPolicy {
    #[default]
    RoundRobin,
    Random,
    LeastRequest,
}

/// Circuit breaker thresholds decoded from a `Cluster`'s first
/// `circuit_breakers.thresholds` entry. A value of 0 means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CircuitBreakerLimits {
    pub max_connections: u32,
    pub max_pending_requests: u32,
    pub max_requests: u32,
    pub max_retries: u32,
}

/// A decoded `Cluster` resource, with its EDS endpoints merged in by the
/// resolver core once both resources have arrived (§4.3 state assembly).
#[derive(Debug, Clone)]
pub(crate) struct ClusterSnapshot {
    pub name: String,
    pub lb_policy: LbPolicy,
    pub circuit_breakers: CircuitBreakerLimits,
    pub outlier_detection: crate::xds::policy::OutlierDetectionConfig,
    pub endpoints: Vec<EndpointSnapshot>,
}

/// A single flattened, weighted endpoint decoded from a
/// `ClusterLoadAssignment` (§4.2).
#[derive(Debug, Clone)]
pub(crate) struct EndpointSnapshot {
    pub address: String,
    pub port: u16,
    /// `lbWeight × localityWeight`, with 0 treated as 1 for either factor.
    pub effective_weight: u32,
    pub priority: u32,
    pub locality: Locality,
    pub health: HealthStatus,
}

/// A decoded `ClusterLoadAssignment` resource: the flattened endpoint list
/// for one cluster.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClusterLoadAssignmentSnapshot {
    pub cluster_name: String,
    pub endpoints: Vec<EndpointSnapshot>,
}

/// The consolidated, per-app resolver state handed to a balancer (§4.3).
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolverState {
    /// Unique clusters referenced by the app's route, concatenated EDS
    /// endpoints across all of them.
    pub endpoints: Vec<EndpointSnapshot>,
    /// `xds_routes`: the collected `VirtualHost` list, opaque to the balancer
    /// except for the routing layer.
    pub routes: Arc<Vec<VirtualHost>>,
    /// `xds_clusters`: name → decoded cluster policy.
    pub clusters: Arc<std::collections::HashMap<String, ClusterSnapshot>>,
}
