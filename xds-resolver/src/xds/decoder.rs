//! Resource decoders: wire-format Envoy xDS v3 protos → [`crate::xds::model`] snapshots (§4.2).

use crate::xds::matcher::{CompiledMatch, HeaderMatch, HeaderValueMatch, PathMatch};
use crate::xds::model::{
    CircuitBreakerLimits, ClusterLoadAssignmentSnapshot, ClusterSnapshot, EndpointSnapshot,
    LbPolicy, ListenerSnapshot, Route, RouteAction, RouteConfigSnapshot, VirtualHost,
    WeightedCluster,
};
use crate::xds::policy::OutlierDetectionConfig;
use bytes::Bytes;
use mesh_core::{HealthStatus, Locality};
use prost::Message;
use xds_client::{Error, Resource, TypeUrl};

use envoy_types::pb::envoy::config::cluster::v3 as cds;
use envoy_types::pb::envoy::config::endpoint::v3 as eds;
use envoy_types::pb::envoy::config::listener::v3 as lds;
use envoy_types::pb::envoy::config::route::v3 as rds;

impl Resource for ListenerSnapshot {
    type Message = lds::Listener;

    const TYPE_URL: TypeUrl =
        TypeUrl::new("type.googleapis.com/envoy.config.listener.v3.Listener");

    fn deserialize(bytes: Bytes) -> Result<Self::Message, Error> {
        lds::Listener::decode(bytes).map_err(Error::Decode)
    }

    fn name(message: &Self::Message) -> &str {
        &message.name
    }

    fn validate(message: Self::Message) -> Result<Self, Error> {
        let route_config_name = extract_rds_hint(&message).unwrap_or_else(|| message.name.clone());
        Ok(ListenerSnapshot { name: message.name, route_config_name })
    }
}

/// Best-effort extraction of the RDS route-config name from an HTTP
/// connection manager filter. Per §4.2, an implementation may fall back to
/// the listener name when this hint is absent.
fn extract_rds_hint(listener: &lds::Listener) -> Option<String> {
    for chain in &listener.filter_chains {
        for filter in &chain.filters {
            let Some(any) = filter.config_type.as_ref().and_then(|ct| match ct {
                lds::filter::ConfigType::TypedConfig(any) => Some(any),
            }) else {
                continue;
            };
            if !any
                .type_url
                .ends_with("HttpConnectionManager")
            {
                continue;
            }
            use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3 as hcm;
            if let Ok(manager) = hcm::HttpConnectionManager::decode(any.value.as_slice()) {
                if let Some(hcm::http_connection_manager::RouteSpecifier::Rds(rds)) =
                    manager.route_specifier
                {
                    return Some(rds.route_config_name);
                }
            }
        }
    }
    None
}

impl Resource for RouteConfigSnapshot {
    type Message = rds::RouteConfiguration;
    const TYPE_URL: TypeUrl =
        TypeUrl::new("type.googleapis.com/envoy.config.route.v3.RouteConfiguration");
    const ALL_RESOURCES_REQUIRED_IN_SOTW: bool = false;

    fn deserialize(bytes: Bytes) -> Result<Self::Message, Error> {
        rds::RouteConfiguration::decode(bytes).map_err(Error::Decode)
    }

    fn name(message: &Self::Message) -> &str {
        &message.name
    }

    fn validate(message: Self::Message) -> Result<Self, Error> {
        let virtual_hosts = message
            .virtual_hosts
            .into_iter()
            .map(decode_virtual_host)
            .collect();
        Ok(RouteConfigSnapshot { name: message.name, virtual_hosts })
    }
}

fn decode_virtual_host(vh: rds::VirtualHost) -> VirtualHost {
    let routes = vh.routes.into_iter().filter_map(decode_route).collect();
    VirtualHost { name: vh.name, domains: vh.domains, routes }
}

fn decode_route(route: rds::Route) -> Option<Route> {
    let matcher = route.r#match.map(decode_route_match).unwrap_or(CompiledMatch {
        path: PathMatch::Any,
        headers: vec![],
    });
    let action = match route.action? {
        rds::route::Action::Route(route_action) => match route_action.cluster_specifier? {
            rds::route_action::ClusterSpecifier::Cluster(name) => RouteAction::Cluster(name),
            rds::route_action::ClusterSpecifier::WeightedClusters(weighted) => {
                RouteAction::WeightedClusters(
                    weighted
                        .clusters
                        .into_iter()
                        .map(|c| WeightedCluster {
                            name: c.name,
                            weight: c.weight.map(|w| w.value).unwrap_or(0),
                        })
                        .collect(),
                )
            }
            _ => return None,
        },
        _ => return None,
    };
    Some(Route { matcher, action })
}

fn decode_route_match(m: rds::RouteMatch) -> CompiledMatch {
    let path = match m.path_specifier {
        Some(rds::route_match::PathSpecifier::Path(p)) => PathMatch::Exact(p),
        Some(rds::route_match::PathSpecifier::Prefix(p)) => PathMatch::Prefix(p),
        Some(rds::route_match::PathSpecifier::SafeRegex(regex_matcher)) => {
            PathMatch::Regex(CompiledMatch::compile_regex(&regex_matcher.regex))
        }
        None => PathMatch::Any,
        _ => PathMatch::Any,
    };
    let headers = m
        .headers
        .into_iter()
        .map(decode_header_matcher)
        .collect();
    CompiledMatch { path, headers }
}

fn decode_header_matcher(h: rds::HeaderMatcher) -> HeaderMatch {
    let value = match h.header_match_specifier {
        Some(rds::header_matcher::HeaderMatchSpecifier::ExactMatch(v)) => {
            HeaderValueMatch::Exact(v)
        }
        Some(rds::header_matcher::HeaderMatchSpecifier::SafeRegexMatch(regex_matcher)) => {
            HeaderValueMatch::Regex(CompiledMatch::compile_regex(&regex_matcher.regex))
        }
        Some(rds::header_matcher::HeaderMatchSpecifier::PrefixMatch(p)) => HeaderValueMatch::Prefix(p),
        Some(rds::header_matcher::HeaderMatchSpecifier::SuffixMatch(s)) => HeaderValueMatch::Suffix(s),
        Some(rds::header_matcher::HeaderMatchSpecifier::PresentMatch(_)) | None => {
            HeaderValueMatch::Present
        }
        _ => HeaderValueMatch::Present,
    };
    HeaderMatch { name: h.name, value }
}

impl Resource for ClusterSnapshot {
    type Message = cds::Cluster;
    const TYPE_URL: TypeUrl = TypeUrl::new("type.googleapis.com/envoy.config.cluster.v3.Cluster");

    fn deserialize(bytes: Bytes) -> Result<Self::Message, Error> {
        cds::Cluster::decode(bytes).map_err(Error::Decode)
    }

    fn name(message: &Self::Message) -> &str {
        &message.name
    }

    fn validate(message: Self::Message) -> Result<Self, Error> {
        let lb_policy = match cds::cluster::LbPolicy::try_from(message.lb_policy) {
            Ok(cds::cluster::LbPolicy::RoundRobin) => LbPolicy::RoundRobin,
            Ok(cds::cluster::LbPolicy::Random) => LbPolicy::Random,
            Ok(cds::cluster::LbPolicy::LeastRequest) => LbPolicy::LeastRequest,
            _ => LbPolicy::RoundRobin,
        };

        let circuit_breakers = message
            .circuit_breakers
            .as_ref()
            .and_then(|cb| cb.thresholds.first())
            .map(|t| CircuitBreakerLimits {
                max_connections: t.max_connections.map(|v| v.value).unwrap_or(0),
                max_pending_requests: t.max_pending_requests.map(|v| v.value).unwrap_or(0),
                max_requests: t.max_requests.map(|v| v.value).unwrap_or(0),
                max_retries: t.max_retries.map(|v| v.value).unwrap_or(0),
            })
            .unwrap_or_default();

        let outlier_detection = decode_outlier_detection(message.outlier_detection);

        Ok(ClusterSnapshot {
            name: message.name,
            lb_policy,
            circuit_breakers,
            outlier_detection,
            endpoints: Vec::new(),
        })
    }
}

/// Decodes a `Cluster.outlier_detection` message into an
/// [`OutlierDetectionConfig`], falling back to the config's defaults for
/// any field the control plane left unset (§4.4 "Replaced atomically on CDS
/// update").
fn decode_outlier_detection(od: Option<cds::cluster::OutlierDetection>) -> OutlierDetectionConfig {
    let defaults = OutlierDetectionConfig::default();
    let Some(od) = od else { return defaults };

    OutlierDetectionConfig {
        interval: od.interval.as_ref().and_then(duration_from_proto).unwrap_or(defaults.interval),
        base_ejection_time: od
            .base_ejection_time
            .as_ref()
            .and_then(duration_from_proto)
            .unwrap_or(defaults.base_ejection_time),
        consecutive_5xx: od.consecutive_5xx.map(|v| v.value).unwrap_or(defaults.consecutive_5xx),
        max_ejection_percent: od
            .max_ejection_percent
            .map(|v| v.value)
            .unwrap_or(defaults.max_ejection_percent),
        success_rate_minimum_hosts: od
            .success_rate_minimum_hosts
            .map(|v| v.value)
            .unwrap_or(defaults.success_rate_minimum_hosts),
        success_rate_request_volume: od
            .success_rate_request_volume
            .map(|v| v.value)
            .unwrap_or(defaults.success_rate_request_volume),
        success_rate_stdev_factor: od
            .success_rate_stdev_factor
            .map(|v| v.value)
            .unwrap_or(defaults.success_rate_stdev_factor),
        failure_percentage_minimum_hosts: od
            .failure_percentage_minimum_hosts
            .map(|v| v.value)
            .unwrap_or(defaults.failure_percentage_minimum_hosts),
        failure_percentage_request_volume: od
            .failure_percentage_request_volume
            .map(|v| v.value)
            .unwrap_or(defaults.failure_percentage_request_volume),
        failure_percentage_threshold: od
            .failure_percentage_threshold
            .map(|v| v.value)
            .unwrap_or(defaults.failure_percentage_threshold),
    }
}

fn duration_from_proto(d: &prost_types::Duration) -> Option<std::time::Duration> {
    if d.seconds < 0 || d.nanos < 0 {
        return None;
    }
    Some(std::time::Duration::new(d.seconds as u64, d.nanos as u32))
}

impl Resource for ClusterLoadAssignmentSnapshot {
    type Message = eds::ClusterLoadAssignment;
    const ALL_RESOURCES_REQUIRED_IN_SOTW: bool = false;

    const TYPE_URL: TypeUrl = TypeUrl::new(
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment",
    );

    fn deserialize(bytes: Bytes) -> Result<Self::Message, Error> {
        eds::ClusterLoadAssignment::decode(bytes).map_err(Error::Decode)
    }

    fn name(message: &Self::Message) -> &str {
        &message.cluster_name
    }

    fn validate(message: Self::Message) -> Result<Self, Error> {
        let mut endpoints = Vec::new();
        for locality_endpoints in &message.endpoints {
            let locality_weight = locality_endpoints.load_balancing_weight.map(|w| w.value).unwrap_or(0);
            let locality_weight = if locality_weight == 0 { 1 } else { locality_weight };
            let locality = locality_endpoints
                .locality
                .as_ref()
                .map(|l| Locality {
                    region: l.region.clone(),
                    zone: l.zone.clone(),
                    sub_zone: l.sub_zone.clone(),
                })
                .unwrap_or_default();
            let priority = locality_endpoints.priority;

            for lb_endpoint in &locality_endpoints.lb_endpoints {
                let Some(eds::lb_endpoint::HostIdentifier::Endpoint(endpoint)) =
                    &lb_endpoint.host_identifier
                else {
                    continue;
                };
                let Some(socket_address) = endpoint
                    .address
                    .as_ref()
                    .and_then(|a| a.address.as_ref())
                    .and_then(|a| match a {
                        envoy_types::pb::envoy::config::core::v3::address::Address::SocketAddress(s) => Some(s),
                    })
                else {
                    continue;
                };
                let port = match socket_address.port_specifier {
                    Some(envoy_types::pb::envoy::config::core::v3::socket_address::PortSpecifier::PortValue(p)) => p as u16,
                    _ => 0,
                };

                let endpoint_weight = lb_endpoint.load_balancing_weight.map(|w| w.value).unwrap_or(0);
                let endpoint_weight = if endpoint_weight == 0 { 1 } else { endpoint_weight };

                let health = match eds::HealthStatus::try_from(lb_endpoint.health_status) {
                    Ok(eds::HealthStatus::Healthy) => HealthStatus::Healthy,
                    Ok(eds::HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
                    Ok(eds::HealthStatus::Draining) => HealthStatus::Draining,
                    Ok(eds::HealthStatus::Timeout) => HealthStatus::Timeout,
                    Ok(eds::HealthStatus::Degraded) => HealthStatus::Degraded,
                    _ => HealthStatus::Unknown,
                };

                endpoints.push(EndpointSnapshot {
                    address: socket_address.address.clone(),
                    port,
                    effective_weight: endpoint_weight * locality_weight,
                    priority,
                    locality: locality.clone(),
                    health,
                });
            }
        }
        Ok(ClusterLoadAssignmentSnapshot { cluster_name: message.cluster_name, endpoints })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lb_policy_unknown_falls_back_to_round_robin() {
        let cluster = cds::Cluster { name: "c1".to_string(), lb_policy: 999, ..Default::default() };
        let decoded = ClusterSnapshot::validate(cluster).unwrap();
        assert_eq!(decoded.lb_policy, LbPolicy::RoundRobin);
    }

    #[test]
    fn circuit_breaker_defaults_to_unbounded() {
        let cluster = cds::Cluster { name: "c1".to_string(), ..Default::default() };
        let decoded = ClusterSnapshot::validate(cluster).unwrap();
        assert_eq!(decoded.circuit_breakers.max_requests, 0);
    }
}
