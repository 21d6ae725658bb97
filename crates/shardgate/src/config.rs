//! Routing client configuration.

use crate::auth::Authenticator;
use crate::rpc::client::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_MS, DEFAULT_WATCH_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Port used when a target does not name one.
pub const DEFAULT_PORT: u16 = 18098;

/// Default interval between resolution passes in milliseconds.
pub const DEFAULT_RESOLVE_INTERVAL_MS: u64 = 30_000;

/// Configuration for a routing client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Port used when the target has none.
    pub default_port: u16,
    /// Number of connections dialed to the target without optimized routing.
    pub pool_size: usize,
    /// Discover every node and route calls to the owner of the key's vbucket.
    pub optimized_routing: bool,
    /// Interval between background resolution passes in milliseconds.
    pub resolve_interval_ms: u64,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Number of connection attempts.
    pub retry_attempts: u32,
    /// Delay between connection attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Deadline of unary calls in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline of one routing long-poll in milliseconds.
    pub watch_timeout_ms: u64,
    /// Maximum in-flight requests per connection.
    pub max_pending_requests: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            pool_size: 1,
            optimized_routing: false,
            resolve_interval_ms: DEFAULT_RESOLVE_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            watch_timeout_ms: DEFAULT_WATCH_TIMEOUT_MS,
            max_pending_requests: 100,
        }
    }
}

impl RoutingConfig {
    /// Enable or disable optimized routing.
    pub fn with_optimized_routing(mut self, enabled: bool) -> Self {
        self.optimized_routing = enabled;
        self
    }

    /// Set the number of connections used without optimized routing.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the interval between resolution passes.
    pub fn with_resolve_interval(mut self, interval: Duration) -> Self {
        self.resolve_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Interval between resolution passes.
    pub fn resolve_interval(&self) -> Duration {
        Duration::from_millis(self.resolve_interval_ms)
    }

    /// Per-connection settings derived from this configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_attempts: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_pending_requests: self.max_pending_requests,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            watch_timeout: Duration::from_millis(self.watch_timeout_ms),
        }
    }
}

/// Options for [`RoutingClient::dial`](crate::RoutingClient::dial).
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Client configuration.
    pub config: RoutingConfig,
    /// Credentials attached to every call.
    pub authenticator: Option<Authenticator>,
}

impl DialOptions {
    /// Options with the given configuration and no credentials.
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config,
            authenticator: None,
        }
    }

    /// Attach credentials.
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }
}
