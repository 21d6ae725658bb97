//! Target parsing and name resolution.

use crate::error::{RoutingError, RoutingResult};
use async_trait::async_trait;
use shardgate_core::Address;
use tracing::debug;

/// A parsed dial target: a hostname or IP literal plus a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    /// Create a target from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6
    /// literal, with an optional `scheme://` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidTarget`] for an empty host or an
    /// unparsable port.
    pub fn parse(target: &str, default_port: u16) -> RoutingResult<Self> {
        let invalid = |reason: &str| RoutingError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let rest = match target.find("://") {
            Some(idx) => &target[idx + 3..],
            None => target,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = if let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']').ok_or_else(|| invalid("unterminated '['"))?;
            let host = &stripped[..end];
            let tail = &stripped[end + 1..];
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(p),
                None if tail.is_empty() => None,
                None => return Err(invalid("unexpected characters after ']'")),
            };
            (host, port)
        } else if rest.matches(':').count() > 1 {
            // Bare IPv6 literal, no port.
            (rest, None)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => default_port,
        };

        Ok(Self::new(host, port))
    }

    /// The hostname or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The target itself as a single address.
    pub fn address(&self) -> Address {
        Address::from_host_port(&self.host, self.port)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Resolves a target into candidate node addresses.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Look up all addresses for `target`.
    async fn resolve(&self, target: &Target) -> RoutingResult<Vec<Address>>;
}

/// Resolves through the operating system, IPv4 and IPv6 alike.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve(&self, target: &Target) -> RoutingResult<Vec<Address>> {
        let addrs = tokio::net::lookup_host((target.host(), target.port()))
            .await
            .map_err(|source| RoutingError::Lookup {
                host: target.host().to_string(),
                source,
            })?;

        let addresses: Vec<Address> = addrs.map(Address::from).collect();
        debug!("Resolved {} to {} address(es)", target, addresses.len());
        Ok(addresses)
    }
}

/// Drop repeated addresses, keeping first-seen order.
pub(crate) fn dedupe(addresses: Vec<Address>) -> Vec<Address> {
    let mut seen = std::collections::HashSet::with_capacity(addresses.len());
    addresses
        .into_iter()
        .filter(|a| seen.insert(a.clone()))
        .collect()
}
