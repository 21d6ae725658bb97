//! Error types for the routing client.

use crate::auth::AuthenticatorKind;
use crate::rpc::ServiceError;
use shardgate_core::{Address, PickError};
use thiserror::Error;

/// Errors that can occur while routing calls or maintaining topology.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("No available backend")]
    NoAvailableBackend,

    #[error("Authenticator mismatch: configured {current}, got {requested}")]
    AuthenticatorMismatch {
        current: AuthenticatorKind,
        requested: AuthenticatorKind,
    },

    #[error("Authenticator unsupported: no authenticator is configured")]
    AuthenticatorUnsupported,

    #[error("Routing client is closed")]
    Closed,

    #[error("Connection to {0} is closed")]
    ConnectionClosed(Address),

    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Resolving addresses for '{host}' failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No addresses resolved for '{0}'")]
    NoAddresses(String),

    #[error("Failed to connect to {address}: {source}")]
    Dial {
        address: Address,
        #[source]
        source: std::io::Error,
    },

    #[error("Listing buckets failed: {0}")]
    ListBuckets(Box<RoutingError>),

    #[error("Watch routing for bucket '{bucket_name}' on {address} failed: {source}")]
    WatchSetup {
        bucket_name: String,
        address: Address,
        #[source]
        source: Box<RoutingError>,
    },

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

impl From<PickError> for RoutingError {
    fn from(e: PickError) -> Self {
        match e {
            PickError::NoAvailableBackend => RoutingError::NoAvailableBackend,
        }
    }
}

impl From<tarpc::client::RpcError> for RoutingError {
    fn from(e: tarpc::client::RpcError) -> Self {
        RoutingError::Transport(e.to_string())
    }
}

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;
