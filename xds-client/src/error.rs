//! Error types for the xDS client.

use thiserror::Error;

/// Error type for the xDS client.
#[derive(Debug, Error)]
pub enum Error {
    /// A builder or configuration argument failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Dialing a management server failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Sending a subscription request failed (e.g. the outbound queue was
    /// full or the stream was already closed).
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Decoding a wire-format message into a [`DiscoveryRequest`]/
    /// [`DiscoveryResponse`](crate::message) failed.
    #[error("failed to unmarshal message: {0}")]
    UnmarshalFailed(String),

    /// A resource-level decode or validation error, carrying the resource
    /// name when it could be identified (see [`DecodeResult`](crate::resource::DecodeResult)).
    #[error("validation error: {0}")]
    Validation(String),

    /// Protobuf decode failure surfaced by the codec layer.
    #[cfg(feature = "codegen-prost")]
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The ADS stream itself reported an error (a gRPC status from the peer).
    #[cfg(feature = "transport-tonic")]
    #[error("stream error: {0}")]
    Stream(#[from] tonic::Status),

    /// A write to the outbound stream failed because it was already closed.
    #[error("stream closed")]
    StreamClosed,

    /// The client (or the underlying worker) has already been closed.
    #[error("client closed")]
    ClientClosed,
}

/// Result type alias for xDS client operations.
pub type Result<T> = std::result::Result<T, Error>;
