use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::platform::*;

#[derive(Default)]
struct State {
    next_id: u64,
    domains: BTreeMap<String, ReservedDomain>,
    addrs: BTreeMap<String, ReservedAddr>,
    backends: BTreeMap<String, TunnelGroupBackend>,
    https_edges: BTreeMap<String, HttpsEdge>,
    tls_edges: BTreeMap<String, TlsEdge>,
    tcp_edges: BTreeMap<String, TcpEdge>,
    ip_policies: BTreeMap<String, IpPolicy>,
    ip_policy_rules: BTreeMap<String, IpPolicyRule>,
    failures: BTreeMap<&'static str, ApiError>,
    writes: Vec<String>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn write(&mut self, call: String) {
        self.writes.push(call);
    }

    fn fail(&mut self, method: &'static str) -> PlatformResult<()> {
        match self.failures.remove(method) {
            Some(e) => Err(PlatformError::Api(e)),
            None => Ok(()),
        }
    }
}

fn not_found(kind: &str, id: &str) -> PlatformError {
    PlatformError::not_found(format!("{kind} {id} not found"))
}

fn backend_ref(m: &Option<EndpointBackendMutate>) -> Option<EndpointBackend> {
    m.as_ref().map(|b| EndpointBackend {
        enabled: b.enabled,
        backend: Ref::new(&b.backend_id),
    })
}

fn observed_ip_policy(m: &EndpointIpPolicyMutate) -> EndpointIpPolicy {
    EndpointIpPolicy {
        enabled: m.enabled,
        ip_policies: m.ip_policy_ids.iter().map(Ref::new).collect(),
    }
}

fn paged<'a, T: Send + 'a>(items: Vec<T>) -> Paged<'a, T> {
    futures::stream::iter(items.into_iter().map(Ok)).boxed()
}

/// In-memory ngrok API recording every mutating call in order
#[derive(Default)]
pub struct FakeNgrok {
    state: Mutex<State>,
}

impl FakeNgrok {
    /// Mutating calls made so far, e.g. `create_https_edge` or `replace_route_module saml`
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Fail the next call of `method` with `error`
    pub fn fail_next(&self, method: &'static str, error: ApiError) {
        self.state.lock().failures.insert(method, error);
    }

    pub fn insert_domain(&self, domain: ReservedDomain) {
        self.state.lock().domains.insert(domain.id.clone(), domain);
    }

    pub fn insert_addr(&self, addr: ReservedAddr) {
        self.state.lock().addrs.insert(addr.id.clone(), addr);
    }

    pub fn insert_backend(&self, backend: TunnelGroupBackend) {
        self.state.lock().backends.insert(backend.id.clone(), backend);
    }

    pub fn insert_https_edge(&self, edge: HttpsEdge) {
        self.state.lock().https_edges.insert(edge.id.clone(), edge);
    }

    pub fn insert_tcp_edge(&self, edge: TcpEdge) {
        self.state.lock().tcp_edges.insert(edge.id.clone(), edge);
    }

    pub fn insert_tls_edge(&self, edge: TlsEdge) {
        self.state.lock().tls_edges.insert(edge.id.clone(), edge);
    }

    pub fn insert_ip_policy_rule(&self, rule: IpPolicyRule) {
        self.state.lock().ip_policy_rules.insert(rule.id.clone(), rule);
    }

    pub fn domains(&self) -> Vec<ReservedDomain> {
        self.state.lock().domains.values().cloned().collect()
    }

    pub fn addrs(&self) -> Vec<ReservedAddr> {
        self.state.lock().addrs.values().cloned().collect()
    }

    pub fn backends(&self) -> Vec<TunnelGroupBackend> {
        self.state.lock().backends.values().cloned().collect()
    }

    pub fn https_edges(&self) -> Vec<HttpsEdge> {
        self.state.lock().https_edges.values().cloned().collect()
    }

    pub fn tls_edges(&self) -> Vec<TlsEdge> {
        self.state.lock().tls_edges.values().cloned().collect()
    }

    pub fn tcp_edges(&self) -> Vec<TcpEdge> {
        self.state.lock().tcp_edges.values().cloned().collect()
    }

    pub fn ip_policies(&self) -> Vec<IpPolicy> {
        self.state.lock().ip_policies.values().cloned().collect()
    }

    pub fn ip_policy_rules(&self) -> Vec<IpPolicyRule> {
        self.state.lock().ip_policy_rules.values().cloned().collect()
    }

    fn with_route<T>(
        &self,
        edge_id: &str,
        route_id: &str,
        f: impl FnOnce(&mut HttpsEdgeRoute) -> T,
    ) -> PlatformResult<T> {
        let mut state = self.state.lock();
        let edge = state
            .https_edges
            .get_mut(edge_id)
            .ok_or_else(|| not_found("https edge", edge_id))?;
        let route = edge
            .routes
            .iter_mut()
            .find(|r| r.id == route_id)
            .ok_or_else(|| not_found("https edge route", route_id))?;
        Ok(f(route))
    }
}

#[async_trait]
impl NgrokApi for FakeNgrok {
    async fn create_reserved_domain(
        &self,
        req: &ReservedDomainCreate,
    ) -> PlatformResult<ReservedDomain> {
        let mut s = self.state.lock();
        s.fail("create_reserved_domain")?;
        let id = s.id("rd");
        let managed = req.domain.ends_with(".ngrok.app") || req.domain.ends_with(".ngrok.io");
        let domain = ReservedDomain {
            id: id.clone(),
            uri: format!("https://api.ngrok.com/reserved_domains/{id}"),
            domain: req.domain.clone(),
            region: req.region.clone(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
            cname_target: (!managed).then(|| format!("{id}.cname.ngrok.app")),
            certificate_management_policy: (!managed).then(|| CertificateManagementPolicy {
                authority: "letsencrypt".to_string(),
                private_key_type: "ecdsa".to_string(),
            }),
            ..Default::default()
        };
        s.domains.insert(id, domain.clone());
        s.write(format!("create_reserved_domain {}", req.domain));
        Ok(domain)
    }

    async fn get_reserved_domain(&self, id: &str) -> PlatformResult<ReservedDomain> {
        let mut s = self.state.lock();
        s.fail("get_reserved_domain")?;
        s.domains.get(id).cloned().ok_or_else(|| not_found("reserved domain", id))
    }

    fn list_reserved_domains(&self) -> Paged<'_, ReservedDomain> {
        paged(self.domains())
    }

    async fn update_reserved_domain(
        &self,
        req: &ReservedDomainUpdate,
    ) -> PlatformResult<ReservedDomain> {
        let mut s = self.state.lock();
        s.fail("update_reserved_domain")?;
        let domain = s
            .domains
            .get_mut(&req.id)
            .ok_or_else(|| not_found("reserved domain", &req.id))?;
        if let Some(d) = &req.description {
            domain.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            domain.metadata.clone_from(m);
        }
        let domain = domain.clone();
        s.write(format!("update_reserved_domain {}", req.id));
        Ok(domain)
    }

    async fn delete_reserved_domain(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.fail("delete_reserved_domain")?;
        s.domains
            .remove(id)
            .ok_or_else(|| not_found("reserved domain", id))?;
        s.write(format!("delete_reserved_domain {id}"));
        Ok(())
    }

    async fn create_reserved_addr(&self, req: &ReservedAddrCreate) -> PlatformResult<ReservedAddr> {
        let mut s = self.state.lock();
        s.fail("create_reserved_addr")?;
        let id = s.id("ra");
        let addr = ReservedAddr {
            id: id.clone(),
            uri: String::new(),
            addr: format!("1.tcp.ngrok.io:{}", 20000 + s.next_id),
            region: req.region.clone(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
        };
        s.addrs.insert(id, addr.clone());
        s.write("create_reserved_addr".to_string());
        Ok(addr)
    }

    async fn get_reserved_addr(&self, id: &str) -> PlatformResult<ReservedAddr> {
        self.state
            .lock()
            .addrs
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("reserved addr", id))
    }

    fn list_reserved_addrs(&self) -> Paged<'_, ReservedAddr> {
        paged(self.addrs())
    }

    async fn update_reserved_addr(&self, req: &ReservedAddrUpdate) -> PlatformResult<ReservedAddr> {
        let mut s = self.state.lock();
        let addr = s
            .addrs
            .get_mut(&req.id)
            .ok_or_else(|| not_found("reserved addr", &req.id))?;
        if let Some(d) = &req.description {
            addr.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            addr.metadata.clone_from(m);
        }
        let addr = addr.clone();
        s.write(format!("update_reserved_addr {}", req.id));
        Ok(addr)
    }

    async fn delete_reserved_addr(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.addrs.remove(id).ok_or_else(|| not_found("reserved addr", id))?;
        s.write(format!("delete_reserved_addr {id}"));
        Ok(())
    }

    async fn create_tunnel_group_backend(
        &self,
        req: &TunnelGroupBackendCreate,
    ) -> PlatformResult<TunnelGroupBackend> {
        let mut s = self.state.lock();
        s.fail("create_tunnel_group_backend")?;
        let id = s.id("bkdtg");
        let backend = TunnelGroupBackend {
            id: id.clone(),
            uri: String::new(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
            labels: req.labels.clone(),
        };
        s.backends.insert(id.clone(), backend.clone());
        s.write(format!("create_tunnel_group_backend {id}"));
        Ok(backend)
    }

    async fn get_tunnel_group_backend(&self, id: &str) -> PlatformResult<TunnelGroupBackend> {
        self.state
            .lock()
            .backends
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("tunnel group backend", id))
    }

    fn list_tunnel_group_backends(&self) -> Paged<'_, TunnelGroupBackend> {
        paged(self.backends())
    }

    async fn update_tunnel_group_backend(
        &self,
        req: &TunnelGroupBackendUpdate,
    ) -> PlatformResult<TunnelGroupBackend> {
        let mut s = self.state.lock();
        let backend = s
            .backends
            .get_mut(&req.id)
            .ok_or_else(|| not_found("tunnel group backend", &req.id))?;
        backend.labels = req.labels.clone();
        if let Some(d) = &req.description {
            backend.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            backend.metadata.clone_from(m);
        }
        let backend = backend.clone();
        s.write(format!("update_tunnel_group_backend {}", req.id));
        Ok(backend)
    }

    async fn delete_tunnel_group_backend(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.backends
            .remove(id)
            .ok_or_else(|| not_found("tunnel group backend", id))?;
        s.write(format!("delete_tunnel_group_backend {id}"));
        Ok(())
    }

    async fn create_https_edge(&self, req: &HttpsEdgeCreate) -> PlatformResult<HttpsEdge> {
        let mut s = self.state.lock();
        s.fail("create_https_edge")?;
        let id = s.id("edghts");
        let edge = HttpsEdge {
            id: id.clone(),
            uri: String::new(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
            hostports: req.hostports.clone(),
            ..Default::default()
        };
        s.https_edges.insert(id.clone(), edge.clone());
        s.write(format!("create_https_edge {id}"));
        Ok(edge)
    }

    async fn get_https_edge(&self, id: &str) -> PlatformResult<HttpsEdge> {
        let mut s = self.state.lock();
        s.fail("get_https_edge")?;
        s.https_edges.get(id).cloned().ok_or_else(|| not_found("https edge", id))
    }

    fn list_https_edges(&self) -> Paged<'_, HttpsEdge> {
        paged(self.https_edges())
    }

    async fn update_https_edge(&self, req: &HttpsEdgeUpdate) -> PlatformResult<HttpsEdge> {
        let mut s = self.state.lock();
        let edge = s
            .https_edges
            .get_mut(&req.id)
            .ok_or_else(|| not_found("https edge", &req.id))?;
        if let Some(h) = &req.hostports {
            edge.hostports.clone_from(h);
        }
        if let Some(d) = &req.description {
            edge.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            edge.metadata.clone_from(m);
        }
        let edge = edge.clone();
        s.write(format!("update_https_edge {}", req.id));
        Ok(edge)
    }

    async fn delete_https_edge(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.https_edges
            .remove(id)
            .ok_or_else(|| not_found("https edge", id))?;
        s.write(format!("delete_https_edge {id}"));
        Ok(())
    }

    async fn create_https_edge_route(
        &self,
        req: &HttpsEdgeRouteCreate,
    ) -> PlatformResult<HttpsEdgeRoute> {
        let mut s = self.state.lock();
        let id = s.id("edghtsrt");
        let route = HttpsEdgeRoute {
            id: id.clone(),
            edge_id: req.edge_id.clone(),
            uri: String::new(),
            match_type: req.match_type.clone(),
            match_: req.match_.clone(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
            backend: backend_ref(&req.backend),
            ..Default::default()
        };
        let edge = s
            .https_edges
            .get_mut(&req.edge_id)
            .ok_or_else(|| not_found("https edge", &req.edge_id))?;
        edge.routes.push(route.clone());
        s.write(format!("create_https_edge_route {}", req.match_));
        Ok(route)
    }

    async fn get_https_edge_route(
        &self,
        edge_id: &str,
        id: &str,
    ) -> PlatformResult<HttpsEdgeRoute> {
        self.with_route(edge_id, id, |r| r.clone())
    }

    async fn update_https_edge_route(
        &self,
        req: &HttpsEdgeRouteUpdate,
    ) -> PlatformResult<HttpsEdgeRoute> {
        let route = self.with_route(&req.edge_id, &req.id, |r| {
            r.match_type.clone_from(&req.match_type);
            r.match_.clone_from(&req.match_);
            r.description.clone_from(&req.description);
            r.metadata.clone_from(&req.metadata);
            r.backend = backend_ref(&req.backend);
            r.clone()
        })?;
        let backend = req
            .backend
            .as_ref()
            .map_or("none".to_string(), |b| b.backend_id.clone());
        self.state
            .lock()
            .write(format!("update_https_edge_route {} backend={backend}", req.match_));
        Ok(route)
    }

    async fn delete_https_edge_route(&self, edge_id: &str, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        let edge = s
            .https_edges
            .get_mut(edge_id)
            .ok_or_else(|| not_found("https edge", edge_id))?;
        let before = edge.routes.len();
        edge.routes.retain(|r| r.id != id);
        if edge.routes.len() == before {
            return Err(not_found("https edge route", id));
        }
        s.write(format!("delete_https_edge_route {id}"));
        Ok(())
    }

    async fn create_tls_edge(&self, req: &TlsEdgeCreate) -> PlatformResult<TlsEdge> {
        let mut s = self.state.lock();
        s.fail("create_tls_edge")?;
        let id = s.id("edgtls");
        let edge = TlsEdge {
            id: id.clone(),
            uri: String::new(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
            hostports: req.hostports.clone(),
            backend: backend_ref(&req.backend),
            ..Default::default()
        };
        s.tls_edges.insert(id.clone(), edge.clone());
        s.write(format!("create_tls_edge {id}"));
        Ok(edge)
    }

    async fn get_tls_edge(&self, id: &str) -> PlatformResult<TlsEdge> {
        self.state
            .lock()
            .tls_edges
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("tls edge", id))
    }

    fn list_tls_edges(&self) -> Paged<'_, TlsEdge> {
        paged(self.tls_edges())
    }

    async fn update_tls_edge(&self, req: &TlsEdgeUpdate) -> PlatformResult<TlsEdge> {
        let mut s = self.state.lock();
        s.fail("update_tls_edge")?;
        let edge = s
            .tls_edges
            .get_mut(&req.id)
            .ok_or_else(|| not_found("tls edge", &req.id))?;
        if let Some(h) = &req.hostports {
            edge.hostports.clone_from(h);
        }
        if req.backend.is_some() {
            edge.backend = backend_ref(&req.backend);
        }
        if let Some(d) = &req.description {
            edge.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            edge.metadata.clone_from(m);
        }
        let edge = edge.clone();
        s.write(format!("update_tls_edge {}", req.id));
        Ok(edge)
    }

    async fn delete_tls_edge(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.tls_edges.remove(id).ok_or_else(|| not_found("tls edge", id))?;
        s.write(format!("delete_tls_edge {id}"));
        Ok(())
    }

    async fn create_tcp_edge(&self, req: &TcpEdgeCreate) -> PlatformResult<TcpEdge> {
        let mut s = self.state.lock();
        s.fail("create_tcp_edge")?;
        let id = s.id("edgtcp");
        let edge = TcpEdge {
            id: id.clone(),
            uri: String::new(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
            hostports: req.hostports.clone(),
            backend: backend_ref(&req.backend),
            ..Default::default()
        };
        s.tcp_edges.insert(id.clone(), edge.clone());
        s.write(format!("create_tcp_edge {id}"));
        Ok(edge)
    }

    async fn get_tcp_edge(&self, id: &str) -> PlatformResult<TcpEdge> {
        self.state
            .lock()
            .tcp_edges
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("tcp edge", id))
    }

    fn list_tcp_edges(&self) -> Paged<'_, TcpEdge> {
        paged(self.tcp_edges())
    }

    async fn update_tcp_edge(&self, req: &TcpEdgeUpdate) -> PlatformResult<TcpEdge> {
        let mut s = self.state.lock();
        let edge = s
            .tcp_edges
            .get_mut(&req.id)
            .ok_or_else(|| not_found("tcp edge", &req.id))?;
        if let Some(h) = &req.hostports {
            edge.hostports.clone_from(h);
        }
        if req.backend.is_some() {
            edge.backend = backend_ref(&req.backend);
        }
        if let Some(d) = &req.description {
            edge.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            edge.metadata.clone_from(m);
        }
        let edge = edge.clone();
        s.write(format!("update_tcp_edge {}", req.id));
        Ok(edge)
    }

    async fn delete_tcp_edge(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.tcp_edges.remove(id).ok_or_else(|| not_found("tcp edge", id))?;
        s.write(format!("delete_tcp_edge {id}"));
        Ok(())
    }

    async fn replace_route_module(
        &self,
        edge_id: &str,
        route_id: &str,
        module: &RouteModule,
    ) -> PlatformResult<()> {
        self.with_route(edge_id, route_id, |r| match module.clone() {
            RouteModule::CircuitBreaker(m) => r.circuit_breaker = Some(m),
            RouteModule::Compression(m) => r.compression = Some(m),
            RouteModule::IpRestriction(m) => r.ip_restriction = Some(observed_ip_policy(&m)),
            RouteModule::RequestHeaders(m) => r.request_headers = Some(m),
            RouteModule::ResponseHeaders(m) => r.response_headers = Some(m),
            RouteModule::OAuth(m) => r.oauth = Some(m),
            RouteModule::Oidc(m) => r.oidc = Some(m),
            RouteModule::Saml(m) => r.saml = Some(m),
            RouteModule::WebhookVerification(m) => r.webhook_verification = Some(m),
            RouteModule::TrafficPolicy(m) => r.traffic_policy = Some(m),
        })?;
        self.state.lock().write(format!(
            "replace_route_module {}",
            module.kind().path_segment()
        ));
        Ok(())
    }

    async fn delete_route_module(
        &self,
        edge_id: &str,
        route_id: &str,
        kind: RouteModuleKind,
    ) -> PlatformResult<()> {
        self.with_route(edge_id, route_id, |r| match kind {
            RouteModuleKind::CircuitBreaker => r.circuit_breaker = None,
            RouteModuleKind::Compression => r.compression = None,
            RouteModuleKind::IpRestriction => r.ip_restriction = None,
            RouteModuleKind::RequestHeaders => r.request_headers = None,
            RouteModuleKind::ResponseHeaders => r.response_headers = None,
            RouteModuleKind::OAuth => r.oauth = None,
            RouteModuleKind::Oidc => r.oidc = None,
            RouteModuleKind::Saml => r.saml = None,
            RouteModuleKind::WebhookVerification => r.webhook_verification = None,
            RouteModuleKind::TrafficPolicy => r.traffic_policy = None,
        })?;
        self.state
            .lock()
            .write(format!("delete_route_module {}", kind.path_segment()));
        Ok(())
    }

    async fn replace_edge_module(
        &self,
        edge: EdgeKind,
        edge_id: &str,
        module: &EdgeModule,
    ) -> PlatformResult<()> {
        let mut s = self.state.lock();
        match (edge, module.clone()) {
            (EdgeKind::Https, EdgeModule::TlsTermination(m)) => {
                s.https_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("https edge", edge_id))?
                    .tls_termination = Some(m)
            }
            (EdgeKind::Https, EdgeModule::MutualTls(m)) => {
                s.https_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("https edge", edge_id))?
                    .mutual_tls = Some(EndpointMutualTls {
                    enabled: m.enabled,
                    certificate_authorities: m.certificate_authority_ids.iter().map(Ref::new).collect(),
                })
            }
            (EdgeKind::Tls, module) => {
                let e = s
                    .tls_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("tls edge", edge_id))?;
                match module {
                    EdgeModule::TlsTermination(m) => e.tls_termination = Some(m),
                    EdgeModule::MutualTls(m) => {
                        e.mutual_tls = Some(EndpointMutualTls {
                            enabled: m.enabled,
                            certificate_authorities: m
                                .certificate_authority_ids
                                .iter()
                                .map(Ref::new)
                                .collect(),
                        })
                    }
                    EdgeModule::IpRestriction(m) => e.ip_restriction = Some(observed_ip_policy(&m)),
                    EdgeModule::TrafficPolicy(m) => e.traffic_policy = Some(m),
                }
            }
            (EdgeKind::Tcp, EdgeModule::IpRestriction(m)) => {
                s.tcp_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("tcp edge", edge_id))?
                    .ip_restriction = Some(observed_ip_policy(&m))
            }
            (EdgeKind::Tcp, EdgeModule::TrafficPolicy(m)) => {
                s.tcp_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("tcp edge", edge_id))?
                    .traffic_policy = Some(m)
            }
            (kind, module) => {
                return Err(PlatformError::Api(ApiError {
                    error_code: String::new(),
                    status_code: 400,
                    msg: format!("{:?} edges do not support {:?}", kind, module.kind()),
                }))
            }
        }
        s.write(format!(
            "replace_edge_module {} {}",
            edge.path_segment(),
            module.kind().path_segment()
        ));
        Ok(())
    }

    async fn delete_edge_module(
        &self,
        edge: EdgeKind,
        edge_id: &str,
        kind: EdgeModuleKind,
    ) -> PlatformResult<()> {
        let mut s = self.state.lock();
        match edge {
            EdgeKind::Https => {
                let e = s
                    .https_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("https edge", edge_id))?;
                match kind {
                    EdgeModuleKind::TlsTermination => e.tls_termination = None,
                    EdgeModuleKind::MutualTls => e.mutual_tls = None,
                    _ => {}
                }
            }
            EdgeKind::Tls => {
                let e = s
                    .tls_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("tls edge", edge_id))?;
                match kind {
                    EdgeModuleKind::TlsTermination => e.tls_termination = None,
                    EdgeModuleKind::MutualTls => e.mutual_tls = None,
                    EdgeModuleKind::IpRestriction => e.ip_restriction = None,
                    EdgeModuleKind::TrafficPolicy => e.traffic_policy = None,
                }
            }
            EdgeKind::Tcp => {
                let e = s
                    .tcp_edges
                    .get_mut(edge_id)
                    .ok_or_else(|| not_found("tcp edge", edge_id))?;
                match kind {
                    EdgeModuleKind::IpRestriction => e.ip_restriction = None,
                    EdgeModuleKind::TrafficPolicy => e.traffic_policy = None,
                    _ => {}
                }
            }
        }
        s.write(format!(
            "delete_edge_module {} {}",
            edge.path_segment(),
            kind.path_segment()
        ));
        Ok(())
    }

    async fn create_ip_policy(&self, req: &IpPolicyCreate) -> PlatformResult<IpPolicy> {
        let mut s = self.state.lock();
        let id = s.id("ipp");
        let policy = IpPolicy {
            id: id.clone(),
            uri: String::new(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
        };
        s.ip_policies.insert(id.clone(), policy.clone());
        s.write(format!("create_ip_policy {id}"));
        Ok(policy)
    }

    async fn get_ip_policy(&self, id: &str) -> PlatformResult<IpPolicy> {
        self.state
            .lock()
            .ip_policies
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("ip policy", id))
    }

    async fn update_ip_policy(&self, req: &IpPolicyUpdate) -> PlatformResult<IpPolicy> {
        let mut s = self.state.lock();
        let policy = s
            .ip_policies
            .get_mut(&req.id)
            .ok_or_else(|| not_found("ip policy", &req.id))?;
        if let Some(d) = &req.description {
            policy.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            policy.metadata.clone_from(m);
        }
        let policy = policy.clone();
        s.write(format!("update_ip_policy {}", req.id));
        Ok(policy)
    }

    async fn delete_ip_policy(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.ip_policies
            .remove(id)
            .ok_or_else(|| not_found("ip policy", id))?;
        s.ip_policy_rules.retain(|_, r| r.ip_policy.id != id);
        s.write(format!("delete_ip_policy {id}"));
        Ok(())
    }

    fn list_ip_policies(&self) -> Paged<'_, IpPolicy> {
        paged(self.ip_policies())
    }

    fn list_ip_policy_rules(&self, policy_id: &str) -> Paged<'_, IpPolicyRule> {
        let rules: Vec<IpPolicyRule> = self
            .ip_policy_rules()
            .into_iter()
            .filter(|r| r.ip_policy.id == policy_id)
            .collect();
        paged(rules)
    }

    async fn create_ip_policy_rule(
        &self,
        req: &IpPolicyRuleCreate,
    ) -> PlatformResult<IpPolicyRule> {
        let mut s = self.state.lock();
        let id = s.id("ipr");
        let rule = IpPolicyRule {
            id: id.clone(),
            uri: String::new(),
            description: req.description.clone(),
            metadata: req.metadata.clone(),
            cidr: req.cidr.clone(),
            action: req.action.clone(),
            ip_policy: Ref::new(&req.ip_policy_id),
        };
        s.ip_policy_rules.insert(id, rule.clone());
        s.write(format!("create_ip_policy_rule {} {}", req.cidr, req.action));
        Ok(rule)
    }

    async fn update_ip_policy_rule(
        &self,
        req: &IpPolicyRuleUpdate,
    ) -> PlatformResult<IpPolicyRule> {
        let mut s = self.state.lock();
        let rule = s
            .ip_policy_rules
            .get_mut(&req.id)
            .ok_or_else(|| not_found("ip policy rule", &req.id))?;
        if let Some(d) = &req.description {
            rule.description.clone_from(d);
        }
        if let Some(m) = &req.metadata {
            rule.metadata.clone_from(m);
        }
        let rule = rule.clone();
        s.write(format!("update_ip_policy_rule {}", req.id));
        Ok(rule)
    }

    async fn delete_ip_policy_rule(&self, id: &str) -> PlatformResult<()> {
        let mut s = self.state.lock();
        s.ip_policy_rules
            .remove(id)
            .ok_or_else(|| not_found("ip policy rule", id))?;
        s.write(format!("delete_ip_policy_rule {id}"));
        Ok(())
    }
}
