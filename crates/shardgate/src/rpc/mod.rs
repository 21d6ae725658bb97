//! RPC protocol definitions using tarpc.
//!
//! This module implements the tarpc-based RPC layer between the routing
//! client and gateway nodes:
//! - Service definition and serializable error type
//! - Request/response messages
//! - Connections, the dialer seam and TCP connection helpers
//!
//! # Architecture
//!
//! - **Protocol**: the [`GatewayService`] trait; one service per node
//!   multiplexes routing, KV, query, analytics, search and admin calls
//! - **Messages**: minimal payloads, only bucket names and keys are
//!   interpreted by the router
//! - **Client**: [`Connection`], [`RoutingWatch`], [`Dialer`] and
//!   [`TcpDialer`]
//!
//! # Example: Connecting to a node
//!
//! ```rust,ignore
//! use shardgate::rpc::{connect_with_retry, ClientConfig};
//!
//! let conn = connect_with_retry(&"127.0.0.1:18098".into(), &ClientConfig::default(), None).await?;
//! let buckets = conn.list_buckets().await?;
//! ```

pub mod client;
pub mod messages;
pub mod protocol;

// Protocol exports
pub use protocol::{
    CallMetadata, GatewayService, GatewayServiceClient, GatewayServiceRequest,
    GatewayServiceResponse, ServiceError, ServiceResult,
};

// Message exports
pub use messages::{
    AnalyticsQueryRequest, BucketInfo, CreateBucketRequest, CreateCollectionRequest,
    CreatePrimaryIndexRequest, CreateScopeRequest, CreateSearchIndexRequest,
    DeleteBucketRequest, DeleteCollectionRequest, DeleteScopeRequest, DocumentId,
    GetAllIndexesRequest, GetAllIndexesResponse, GetRequest, GetResponse, ListBucketsResponse,
    ListCollectionsRequest, ListCollectionsResponse, ListSearchIndexesResponse,
    MutationResponse, QueryIndex, QueryRequest, QueryResponse, RemoveRequest, ScopeSpec,
    SearchHit, SearchIndex, SearchQueryRequest, SearchQueryResponse, UpsertRequest,
    VbucketDataRouting, ViewQueryRequest, ViewQueryResponse, ViewRow, WatchRoutingRequest,
    WatchRoutingResponse,
};

// Client exports
pub use client::{
    connect_with_config, connect_with_retry, ClientConfig, Connection, Dialer, RoutingWatch,
    TcpDialer,
};
