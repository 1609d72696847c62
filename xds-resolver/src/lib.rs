//! # xds-resolver
//!
//! xDS (discovery service) support for [Tonic](https://docs.rs/tonic) gRPC clients as well as
//! general [Tower](https://docs.rs/tower) services.
//!
//! This crate provides an xDS-enabled Tonic Channel that automatically discovers,
//! routes and load balances across endpoints using the xDS protocol. The xDS features align with
//! the [gRPC xDS features](https://github.com/grpc/grpc/blob/master/doc/grpc_xds_features.md)
//!
//! ## Features
//!
//! - LDS / RDS / CDS / EDS subscriptions via a single ADS stream per application.
//! - A routing layer resolving virtual host, path/header route match, and weighted-cluster pick.
//! - Per-cluster circuit breaking, outlier detection, and rate limiting, with
//!   round_robin/random/least_request endpoint selection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use xds_resolver::{XdsChannelBuilder, XdsChannelConfig, XdsChannelGrpc, XdsUri};
//!
//! let xds_uri = XdsUri::parse(
//!   "xds:///xds-management-server-local-test:50051"
//! ).expect("fail to parse valid xDS URI");
//!
//! let xds_channel = XdsChannelBuilder::with_config(
//!   XdsChannelConfig::default().with_target_uri(xds_uri)
//! ).build_grpc_channel();
//!
//! // Use with your generated gRPC client
//! // let client = MyServiceClient::new(xds_channel);
//! // client.my_rpc_method(...).await;
//! ```
//!
//! ## How it works
//!
//! `XdsChannel` connects to an xDS management server and subscribes to resource updates for
//! listeners, routes, clusters, and endpoints. Requests are routed and load balanced by two
//! stacked Tower services: a routing layer that attaches a routing decision to each request's
//! extensions, and a balancing layer that picks an endpoint from the named cluster's
//! circuit-broken, outlier-filtered pool.

pub(crate) mod client;
pub(crate) mod xds;

pub use client::channel::{XdsChannel, XdsChannelBuilder, XdsChannelConfig, XdsChannelGrpc};
pub use xds::uri::{XdsUri, XdsUriError};

#[cfg(test)]
pub(crate) mod testutil;