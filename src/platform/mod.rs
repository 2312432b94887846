//! Typed surface of the ngrok API consumed by the reconcilers
//!
//! The reconcilers only see the [`NgrokApi`] trait. [`HttpNgrokApi`] talks to
//! the real service; tests substitute an in-memory implementation.

mod http;
pub mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::Deserialize;
use thiserror::Error;

pub use http::HttpNgrokApi;
pub use types::*;

/// Error codes the API returns for transient conflicts
pub mod codes {
    /// The reserved domain is still attached to an edge or endpoint
    pub const DOMAIN_STILL_ATTACHED: &str = "ERR_NGROK_446";
    /// A dangling DNS record still points at the domain
    pub const DANGLING_DNS_RECORD: &str = "ERR_NGROK_7132";
    /// The hostport is already claimed by another edge
    pub const HOSTPORT_BUSY: &str = "ERR_NGROK_7117";

    pub const RETRYABLE: &[&str] = &[DOMAIN_STILL_ATTACHED, DANGLING_DNS_RECORD, HOSTPORT_BUSY];
}

/// Structured error body returned by the API
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub msg: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.error_code.is_empty() {
            write!(f, "HTTP {}: {}", self.status_code, self.msg)
        } else {
            write!(f, "HTTP {} {}: {}", self.status_code, self.error_code, self.msg)
        }
    }
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("{0}")]
    Api(ApiError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PlatformError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::Api(ApiError {
            error_code: String::new(),
            status_code: 404,
            msg: msg.into(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(e) if e.status_code == 404)
    }

    pub fn is_error_code(&self, codes: &[&str]) -> bool {
        matches!(self, Self::Api(e) if codes.iter().any(|c| *c == e.error_code))
    }

    /// The server message without transport noise, suitable for a condition
    pub fn sanitized_message(&self) -> String {
        match self {
            Self::Api(e) => e.msg.lines().next().unwrap_or_default().trim().to_string(),
            other => other.to_string(),
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Paged listing; the stream ends after the last page.
pub type Paged<'a, T> = BoxStream<'a, PlatformResult<T>>;

/// Drain a paged listing into memory
pub async fn collect_all<T>(pages: Paged<'_, T>) -> PlatformResult<Vec<T>> {
    pages.try_collect().await
}

#[async_trait]
pub trait NgrokApi: Send + Sync {
    async fn create_reserved_domain(
        &self,
        req: &ReservedDomainCreate,
    ) -> PlatformResult<ReservedDomain>;
    async fn get_reserved_domain(&self, id: &str) -> PlatformResult<ReservedDomain>;
    fn list_reserved_domains(&self) -> Paged<'_, ReservedDomain>;
    async fn update_reserved_domain(
        &self,
        req: &ReservedDomainUpdate,
    ) -> PlatformResult<ReservedDomain>;
    async fn delete_reserved_domain(&self, id: &str) -> PlatformResult<()>;

    async fn create_reserved_addr(&self, req: &ReservedAddrCreate) -> PlatformResult<ReservedAddr>;
    async fn get_reserved_addr(&self, id: &str) -> PlatformResult<ReservedAddr>;
    fn list_reserved_addrs(&self) -> Paged<'_, ReservedAddr>;
    async fn update_reserved_addr(&self, req: &ReservedAddrUpdate) -> PlatformResult<ReservedAddr>;
    async fn delete_reserved_addr(&self, id: &str) -> PlatformResult<()>;

    async fn create_tunnel_group_backend(
        &self,
        req: &TunnelGroupBackendCreate,
    ) -> PlatformResult<TunnelGroupBackend>;
    async fn get_tunnel_group_backend(&self, id: &str) -> PlatformResult<TunnelGroupBackend>;
    fn list_tunnel_group_backends(&self) -> Paged<'_, TunnelGroupBackend>;
    async fn update_tunnel_group_backend(
        &self,
        req: &TunnelGroupBackendUpdate,
    ) -> PlatformResult<TunnelGroupBackend>;
    async fn delete_tunnel_group_backend(&self, id: &str) -> PlatformResult<()>;

    async fn create_https_edge(&self, req: &HttpsEdgeCreate) -> PlatformResult<HttpsEdge>;
    async fn get_https_edge(&self, id: &str) -> PlatformResult<HttpsEdge>;
    fn list_https_edges(&self) -> Paged<'_, HttpsEdge>;
    async fn update_https_edge(&self, req: &HttpsEdgeUpdate) -> PlatformResult<HttpsEdge>;
    async fn delete_https_edge(&self, id: &str) -> PlatformResult<()>;

    async fn create_https_edge_route(
        &self,
        req: &HttpsEdgeRouteCreate,
    ) -> PlatformResult<HttpsEdgeRoute>;
    async fn get_https_edge_route(&self, edge_id: &str, id: &str)
        -> PlatformResult<HttpsEdgeRoute>;
    async fn update_https_edge_route(
        &self,
        req: &HttpsEdgeRouteUpdate,
    ) -> PlatformResult<HttpsEdgeRoute>;
    async fn delete_https_edge_route(&self, edge_id: &str, id: &str) -> PlatformResult<()>;

    async fn create_tls_edge(&self, req: &TlsEdgeCreate) -> PlatformResult<TlsEdge>;
    async fn get_tls_edge(&self, id: &str) -> PlatformResult<TlsEdge>;
    fn list_tls_edges(&self) -> Paged<'_, TlsEdge>;
    async fn update_tls_edge(&self, req: &TlsEdgeUpdate) -> PlatformResult<TlsEdge>;
    async fn delete_tls_edge(&self, id: &str) -> PlatformResult<()>;

    async fn create_tcp_edge(&self, req: &TcpEdgeCreate) -> PlatformResult<TcpEdge>;
    async fn get_tcp_edge(&self, id: &str) -> PlatformResult<TcpEdge>;
    fn list_tcp_edges(&self) -> Paged<'_, TcpEdge>;
    async fn update_tcp_edge(&self, req: &TcpEdgeUpdate) -> PlatformResult<TcpEdge>;
    async fn delete_tcp_edge(&self, id: &str) -> PlatformResult<()>;

    async fn replace_route_module(
        &self,
        edge_id: &str,
        route_id: &str,
        module: &RouteModule,
    ) -> PlatformResult<()>;
    async fn delete_route_module(
        &self,
        edge_id: &str,
        route_id: &str,
        kind: RouteModuleKind,
    ) -> PlatformResult<()>;
    async fn replace_edge_module(
        &self,
        edge: EdgeKind,
        edge_id: &str,
        module: &EdgeModule,
    ) -> PlatformResult<()>;
    async fn delete_edge_module(
        &self,
        edge: EdgeKind,
        edge_id: &str,
        kind: EdgeModuleKind,
    ) -> PlatformResult<()>;

    async fn create_ip_policy(&self, req: &IpPolicyCreate) -> PlatformResult<IpPolicy>;
    async fn get_ip_policy(&self, id: &str) -> PlatformResult<IpPolicy>;
    async fn update_ip_policy(&self, req: &IpPolicyUpdate) -> PlatformResult<IpPolicy>;
    async fn delete_ip_policy(&self, id: &str) -> PlatformResult<()>;
    fn list_ip_policies(&self) -> Paged<'_, IpPolicy>;

    fn list_ip_policy_rules(&self, policy_id: &str) -> Paged<'_, IpPolicyRule>;
    async fn create_ip_policy_rule(&self, req: &IpPolicyRuleCreate)
        -> PlatformResult<IpPolicyRule>;
    async fn update_ip_policy_rule(&self, req: &IpPolicyRuleUpdate)
        -> PlatformResult<IpPolicyRule>;
    async fn delete_ip_policy_rule(&self, id: &str) -> PlatformResult<()>;
}
