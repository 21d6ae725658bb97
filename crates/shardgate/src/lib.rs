//! # Shardgate
//!
//! Topology-aware routing client for a sharded key-value and query service
//! reached over tarpc. The client discovers gateway nodes by name
//! resolution, learns which node owns each vbucket of each bucket by
//! watching the nodes' routing, and sends every call to the owner of its
//! key, falling back to round-robin where ownership is unknown.

pub mod auth;
pub mod balancer;
pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod resolver;
pub mod rpc;
pub mod services;

pub use auth::{
    Authenticator, AuthenticatorKind, BasicAuthenticator, CertificateAuthenticator,
    ClientCertificate,
};
pub use balancer::RoutingBalancer;
pub use client::{ConnectionState, RoutingClient};
pub use config::{DialOptions, RoutingConfig, DEFAULT_PORT, DEFAULT_RESOLVE_INTERVAL_MS};
pub use error::{RoutingError, RoutingResult};
pub use pool::ConnectionPool;
pub use resolver::{
    NameResolver, ResolverConfig, ResolverPhase, StateListener, SystemResolver, Target,
    TopologyResolver,
};
pub use rpc::{ClientConfig, Connection, Dialer, RoutingWatch, TcpDialer};
pub use services::{
    AnalyticsV1, BucketAdminV1, CollectionAdminV1, KvV1, QueryAdminV1, QueryV1, RoutingV2,
    SearchAdminV1, SearchV1, ViewV1,
};
pub use shardgate_core::{Address, BucketRouting, RoutingHint};
