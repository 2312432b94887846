//! ngrok API client over HTTPS

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::types::*;
use super::{ApiError, NgrokApi, Paged, PlatformError, PlatformResult};

const API_VERSION: &str = "2";

/// ngrok API client
#[derive(Clone)]
pub struct HttpNgrokApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpNgrokApi {
    /// Create new ngrok API client
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header("Ngrok-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> PlatformResult<Option<Value>> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.bytes().await?;
        if status.is_success() {
            if body.is_empty() {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_slice(&body)?));
        }

        let mut err: ApiError = serde_json::from_slice(&body).unwrap_or_default();
        err.status_code = status.as_u16();
        if err.msg.is_empty() {
            err.msg = String::from_utf8_lossy(&body).into_owned();
        }
        Err(PlatformError::Api(err))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> PlatformResult<T> {
        let value = self.call_raw(method, path, body).await?;
        Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
    }

    async fn call_empty(&self, method: Method, path: &str, body: Option<Value>) -> PlatformResult<()> {
        self.call_raw(method, path, body).await?;
        Ok(())
    }

    async fn call_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> PlatformResult<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("ngrok API {} {}", method, url);
        let mut request = self.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request).await
    }

    /// Follow `next_page_uri` until the listing is exhausted
    fn paginate<T>(&self, path: String, key: &'static str) -> Paged<'_, T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let first = format!("{}{}", self.base_url, path);
        stream::try_unfold(Some(first), move |next| async move {
            let Some(url) = next else {
                return Ok::<_, PlatformError>(None);
            };
            debug!("ngrok API GET {}", url);
            let page = self
                .send(self.request(Method::GET, &url))
                .await?
                .unwrap_or(Value::Null);
            let items: Vec<T> = match page.get(key) {
                Some(items) => serde_json::from_value(items.clone())?,
                None => Vec::new(),
            };
            let next = page
                .get("next_page_uri")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            Ok(Some((
                stream::iter(items.into_iter().map(Ok::<T, PlatformError>)),
                next,
            )))
        })
        .try_flatten()
        .boxed()
    }
}

fn json<T: Serialize>(value: &T) -> PlatformResult<Option<Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

#[async_trait]
impl NgrokApi for HttpNgrokApi {
    async fn create_reserved_domain(
        &self,
        req: &ReservedDomainCreate,
    ) -> PlatformResult<ReservedDomain> {
        self.call(Method::POST, "/reserved_domains", json(req)?).await
    }

    async fn get_reserved_domain(&self, id: &str) -> PlatformResult<ReservedDomain> {
        self.call(Method::GET, &format!("/reserved_domains/{id}"), None)
            .await
    }

    fn list_reserved_domains(&self) -> Paged<'_, ReservedDomain> {
        self.paginate("/reserved_domains".to_string(), "reserved_domains")
    }

    async fn update_reserved_domain(
        &self,
        req: &ReservedDomainUpdate,
    ) -> PlatformResult<ReservedDomain> {
        self.call(
            Method::PATCH,
            &format!("/reserved_domains/{}", req.id),
            json(req)?,
        )
        .await
    }

    async fn delete_reserved_domain(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(Method::DELETE, &format!("/reserved_domains/{id}"), None)
            .await
    }

    async fn create_reserved_addr(&self, req: &ReservedAddrCreate) -> PlatformResult<ReservedAddr> {
        self.call(Method::POST, "/reserved_addrs", json(req)?).await
    }

    async fn get_reserved_addr(&self, id: &str) -> PlatformResult<ReservedAddr> {
        self.call(Method::GET, &format!("/reserved_addrs/{id}"), None)
            .await
    }

    fn list_reserved_addrs(&self) -> Paged<'_, ReservedAddr> {
        self.paginate("/reserved_addrs".to_string(), "reserved_addrs")
    }

    async fn update_reserved_addr(&self, req: &ReservedAddrUpdate) -> PlatformResult<ReservedAddr> {
        self.call(
            Method::PATCH,
            &format!("/reserved_addrs/{}", req.id),
            json(req)?,
        )
        .await
    }

    async fn delete_reserved_addr(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(Method::DELETE, &format!("/reserved_addrs/{id}"), None)
            .await
    }

    async fn create_tunnel_group_backend(
        &self,
        req: &TunnelGroupBackendCreate,
    ) -> PlatformResult<TunnelGroupBackend> {
        self.call(Method::POST, "/backends/tunnel_group", json(req)?)
            .await
    }

    async fn get_tunnel_group_backend(&self, id: &str) -> PlatformResult<TunnelGroupBackend> {
        self.call(Method::GET, &format!("/backends/tunnel_group/{id}"), None)
            .await
    }

    fn list_tunnel_group_backends(&self) -> Paged<'_, TunnelGroupBackend> {
        self.paginate("/backends/tunnel_group".to_string(), "backends")
    }

    async fn update_tunnel_group_backend(
        &self,
        req: &TunnelGroupBackendUpdate,
    ) -> PlatformResult<TunnelGroupBackend> {
        self.call(
            Method::PATCH,
            &format!("/backends/tunnel_group/{}", req.id),
            json(req)?,
        )
        .await
    }

    async fn delete_tunnel_group_backend(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(
            Method::DELETE,
            &format!("/backends/tunnel_group/{id}"),
            None,
        )
        .await
    }

    async fn create_https_edge(&self, req: &HttpsEdgeCreate) -> PlatformResult<HttpsEdge> {
        self.call(Method::POST, "/edges/https", json(req)?).await
    }

    async fn get_https_edge(&self, id: &str) -> PlatformResult<HttpsEdge> {
        self.call(Method::GET, &format!("/edges/https/{id}"), None)
            .await
    }

    fn list_https_edges(&self) -> Paged<'_, HttpsEdge> {
        self.paginate("/edges/https".to_string(), "https_edges")
    }

    async fn update_https_edge(&self, req: &HttpsEdgeUpdate) -> PlatformResult<HttpsEdge> {
        self.call(Method::PATCH, &format!("/edges/https/{}", req.id), json(req)?)
            .await
    }

    async fn delete_https_edge(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(Method::DELETE, &format!("/edges/https/{id}"), None)
            .await
    }

    async fn create_https_edge_route(
        &self,
        req: &HttpsEdgeRouteCreate,
    ) -> PlatformResult<HttpsEdgeRoute> {
        self.call(
            Method::POST,
            &format!("/edges/https/{}/routes", req.edge_id),
            json(req)?,
        )
        .await
    }

    async fn get_https_edge_route(
        &self,
        edge_id: &str,
        id: &str,
    ) -> PlatformResult<HttpsEdgeRoute> {
        self.call(
            Method::GET,
            &format!("/edges/https/{edge_id}/routes/{id}"),
            None,
        )
        .await
    }

    async fn update_https_edge_route(
        &self,
        req: &HttpsEdgeRouteUpdate,
    ) -> PlatformResult<HttpsEdgeRoute> {
        self.call(
            Method::PATCH,
            &format!("/edges/https/{}/routes/{}", req.edge_id, req.id),
            json(req)?,
        )
        .await
    }

    async fn delete_https_edge_route(&self, edge_id: &str, id: &str) -> PlatformResult<()> {
        self.call_empty(
            Method::DELETE,
            &format!("/edges/https/{edge_id}/routes/{id}"),
            None,
        )
        .await
    }

    async fn create_tls_edge(&self, req: &TlsEdgeCreate) -> PlatformResult<TlsEdge> {
        self.call(Method::POST, "/edges/tls", json(req)?).await
    }

    async fn get_tls_edge(&self, id: &str) -> PlatformResult<TlsEdge> {
        self.call(Method::GET, &format!("/edges/tls/{id}"), None).await
    }

    fn list_tls_edges(&self) -> Paged<'_, TlsEdge> {
        self.paginate("/edges/tls".to_string(), "tls_edges")
    }

    async fn update_tls_edge(&self, req: &TlsEdgeUpdate) -> PlatformResult<TlsEdge> {
        self.call(Method::PATCH, &format!("/edges/tls/{}", req.id), json(req)?)
            .await
    }

    async fn delete_tls_edge(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(Method::DELETE, &format!("/edges/tls/{id}"), None)
            .await
    }

    async fn create_tcp_edge(&self, req: &TcpEdgeCreate) -> PlatformResult<TcpEdge> {
        self.call(Method::POST, "/edges/tcp", json(req)?).await
    }

    async fn get_tcp_edge(&self, id: &str) -> PlatformResult<TcpEdge> {
        self.call(Method::GET, &format!("/edges/tcp/{id}"), None).await
    }

    fn list_tcp_edges(&self) -> Paged<'_, TcpEdge> {
        self.paginate("/edges/tcp".to_string(), "tcp_edges")
    }

    async fn update_tcp_edge(&self, req: &TcpEdgeUpdate) -> PlatformResult<TcpEdge> {
        self.call(Method::PATCH, &format!("/edges/tcp/{}", req.id), json(req)?)
            .await
    }

    async fn delete_tcp_edge(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(Method::DELETE, &format!("/edges/tcp/{id}"), None)
            .await
    }

    async fn replace_route_module(
        &self,
        edge_id: &str,
        route_id: &str,
        module: &RouteModule,
    ) -> PlatformResult<()> {
        let path = format!(
            "/edges/https/{edge_id}/routes/{route_id}/{}",
            module.kind().path_segment()
        );
        self.call_empty(Method::PUT, &path, Some(module.payload()?))
            .await
    }

    async fn delete_route_module(
        &self,
        edge_id: &str,
        route_id: &str,
        kind: RouteModuleKind,
    ) -> PlatformResult<()> {
        let path = format!(
            "/edges/https/{edge_id}/routes/{route_id}/{}",
            kind.path_segment()
        );
        self.call_empty(Method::DELETE, &path, None).await
    }

    async fn replace_edge_module(
        &self,
        edge: EdgeKind,
        edge_id: &str,
        module: &EdgeModule,
    ) -> PlatformResult<()> {
        let path = format!(
            "/edges/{}/{edge_id}/{}",
            edge.path_segment(),
            module.kind().path_segment()
        );
        self.call_empty(Method::PUT, &path, Some(module.payload()?))
            .await
    }

    async fn delete_edge_module(
        &self,
        edge: EdgeKind,
        edge_id: &str,
        kind: EdgeModuleKind,
    ) -> PlatformResult<()> {
        let path = format!(
            "/edges/{}/{edge_id}/{}",
            edge.path_segment(),
            kind.path_segment()
        );
        self.call_empty(Method::DELETE, &path, None).await
    }

    async fn create_ip_policy(&self, req: &IpPolicyCreate) -> PlatformResult<IpPolicy> {
        self.call(Method::POST, "/ip_policies", json(req)?).await
    }

    async fn get_ip_policy(&self, id: &str) -> PlatformResult<IpPolicy> {
        self.call(Method::GET, &format!("/ip_policies/{id}"), None)
            .await
    }

    async fn update_ip_policy(&self, req: &IpPolicyUpdate) -> PlatformResult<IpPolicy> {
        self.call(Method::PATCH, &format!("/ip_policies/{}", req.id), json(req)?)
            .await
    }

    async fn delete_ip_policy(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(Method::DELETE, &format!("/ip_policies/{id}"), None)
            .await
    }

    fn list_ip_policies(&self) -> Paged<'_, IpPolicy> {
        self.paginate("/ip_policies".to_string(), "ip_policies")
    }

    fn list_ip_policy_rules(&self, policy_id: &str) -> Paged<'_, IpPolicyRule> {
        let policy_id = policy_id.to_string();
        self.paginate::<IpPolicyRule>("/ip_policy_rules".to_string(), "ip_policy_rules")
            .try_filter(move |rule| futures::future::ready(rule.ip_policy.id == policy_id))
            .boxed()
    }

    async fn create_ip_policy_rule(
        &self,
        req: &IpPolicyRuleCreate,
    ) -> PlatformResult<IpPolicyRule> {
        self.call(Method::POST, "/ip_policy_rules", json(req)?).await
    }

    async fn update_ip_policy_rule(
        &self,
        req: &IpPolicyRuleUpdate,
    ) -> PlatformResult<IpPolicyRule> {
        self.call(
            Method::PATCH,
            &format!("/ip_policy_rules/{}", req.id),
            json(req)?,
        )
        .await
    }

    async fn delete_ip_policy_rule(&self, id: &str) -> PlatformResult<()> {
        self.call_empty(Method::DELETE, &format!("/ip_policy_rules/{id}"), None)
            .await
    }
}
