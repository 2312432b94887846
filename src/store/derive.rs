//! Desired Domain, HTTPSEdge and Tunnel objects computed from the store
//!
//! [`derive`] is a pure function of the store contents: the same store always
//! yields the same [`Desired`] set, in the same order.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, Ingress, IngressLoadBalancerIngress, IngressServiceBackend,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;
use tracing::{debug, warn};

use super::Store;
use crate::annotations;
use crate::config::OperatorConfig;
use crate::crd::{
    forwards_to, hyphenate_host, Domain, DomainSpec, Gateway, HttpsEdge, HttpsEdgeRouteSpec,
    HttpsEdgeSpec, ModuleSetModules, NgrokModuleSet, NgrokTrafficPolicy, ReclaimPolicy, Tunnel,
    TunnelBackend, TunnelGroupBackend, TunnelSpec, MATCH_TYPE_EXACT_PATH, MATCH_TYPE_PATH_PREFIX,
};

pub const LABEL_CONTROLLER_NAME: &str = "k8s.ngrok.com/controller-name";
pub const LABEL_CONTROLLER_NAMESPACE: &str = "k8s.ngrok.com/controller-namespace";

pub const BACKEND_LABEL_NAMESPACE: &str = "namespace";
pub const BACKEND_LABEL_SERVICE: &str = "service";
pub const BACKEND_LABEL_PORT: &str = "port";
pub const BACKEND_LABEL_SERVICE_UID: &str = "service-uid";

const APP_PROTOCOL_HTTP2: &str = "k8s.ngrok.com/http2";
const APP_PROTOCOL_HTTPS: &str = "k8s.ngrok.com/https";

#[derive(Clone, Debug, Default)]
pub struct DeriveConfig {
    pub manager_name: String,
    pub manager_namespace: String,
    pub enable_gateway: bool,
    pub description: String,
    pub metadata: String,
}

impl From<&OperatorConfig> for DeriveConfig {
    fn from(cfg: &OperatorConfig) -> Self {
        Self {
            manager_name: cfg.manager_name.clone(),
            manager_namespace: cfg.namespace.clone(),
            enable_gateway: cfg.enable_gateway,
            description: cfg.description.clone(),
            metadata: cfg.metadata.clone(),
        }
    }
}

impl DeriveConfig {
    /// Labels stamped on every derived object
    pub fn controller_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_CONTROLLER_NAME.to_string(), self.manager_name.clone()),
            (
                LABEL_CONTROLLER_NAMESPACE.to_string(),
                self.manager_namespace.clone(),
            ),
        ])
    }

    /// Selector matching [`DeriveConfig::controller_labels`]
    pub fn label_selector(&self) -> String {
        format!(
            "{LABEL_CONTROLLER_NAME}={},{LABEL_CONTROLLER_NAMESPACE}={}",
            self.manager_name, self.manager_namespace
        )
    }

    fn meta(&self, name: &str, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(self.controller_labels()),
            ..Default::default()
        }
    }
}

/// Load balancer status to publish on one ingress
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngressStatusUpdate {
    pub namespace: String,
    pub name: String,
    pub ingress: Vec<IngressLoadBalancerIngress>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Desired {
    pub domains: Vec<Domain>,
    pub https_edges: Vec<HttpsEdge>,
    pub tunnels: Vec<Tunnel>,
    pub ingress_statuses: Vec<IngressStatusUpdate>,
}

/// `Exact` maps to `exact_path`; `Prefix`, `ImplementationSpecific` and unset to `path_prefix`
pub fn map_path_type(path_type: &str) -> &'static str {
    match path_type {
        "Exact" => MATCH_TYPE_EXACT_PATH,
        _ => MATCH_TYPE_PATH_PREFIX,
    }
}

/// Labels joining an edge route to the tunnel of a service port
pub fn backend_labels(namespace: &str, service: &str, port: i32) -> BTreeMap<String, String> {
    BTreeMap::from([
        (BACKEND_LABEL_NAMESPACE.to_string(), namespace.to_string()),
        (BACKEND_LABEL_SERVICE.to_string(), service.to_string()),
        (BACKEND_LABEL_PORT.to_string(), port.to_string()),
    ])
}

/// Tunnel backend protocol for a service port appProtocol
pub fn backend_protocol(app_protocol: Option<&str>) -> Option<&'static str> {
    match app_protocol? {
        APP_PROTOCOL_HTTP2 => Some("HTTP2"),
        APP_PROTOCOL_HTTPS => Some("HTTPS"),
        _ => None,
    }
}

/// Service port with its resolved number
struct ResolvedBackend {
    service: String,
    port: i32,
    protocol: Option<&'static str>,
}

fn resolve_backend(
    store: &Store,
    namespace: &str,
    backend: &IngressServiceBackend,
) -> Option<ResolvedBackend> {
    let port = backend.port.as_ref()?;
    let (number, app_protocol) = match (port.number, port.name.as_deref()) {
        (Some(n), _) => (n, store.service_app_protocol(namespace, &backend.name, n)),
        (None, Some(name)) => store.service_port(namespace, &backend.name, name)?,
        (None, None) => return None,
    };
    Some(ResolvedBackend {
        service: backend.name.clone(),
        port: number,
        protocol: backend_protocol(app_protocol.as_deref()),
    })
}

struct EdgeBuilder {
    namespace: String,
    routes: Vec<HttpsEdgeRouteSpec>,
    modules: ModuleSetModules,
}

pub fn derive(store: &Store, cfg: &DeriveConfig) -> Desired {
    let ingresses = store.list_our_ingresses();

    let mut domains: BTreeMap<String, Domain> = BTreeMap::new();
    let mut edges: BTreeMap<String, EdgeBuilder> = BTreeMap::new();
    let mut tunnels: BTreeMap<(String, String, i32), Tunnel> = BTreeMap::new();

    for ingress in &ingresses {
        let namespace = ingress.namespace().unwrap_or_default();
        let modules = annotations::extract_modules(&ingress.metadata, |name| {
            store.find::<NgrokModuleSet>(name, &namespace)
        });
        let policy = annotations::extract_traffic_policy(&ingress.metadata, |name| {
            store.find::<NgrokTrafficPolicy>(name, &namespace)
        });

        let rules = ingress
            .spec
            .as_ref()
            .and_then(|s| s.rules.as_ref())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for rule in rules {
            let Some(host) = rule.host.as_deref().filter(|h| !h.is_empty()) else {
                continue;
            };

            domains
                .entry(host.to_string())
                .or_insert_with(|| domain_for(cfg, host, &namespace));

            let edge = edges.entry(host.to_string()).or_insert_with(|| EdgeBuilder {
                namespace: namespace.clone(),
                routes: Vec::new(),
                modules: ModuleSetModules::default(),
            });
            if edge.modules.tls_termination.is_none() {
                edge.modules.tls_termination.clone_from(&modules.tls_termination);
            }
            if edge.modules.mutual_tls.is_none() {
                edge.modules.mutual_tls.clone_from(&modules.mutual_tls);
            }

            let paths = rule
                .http
                .as_ref()
                .map(|h| h.paths.as_slice())
                .unwrap_or_default();
            for path in paths {
                let Some(resolved) = path
                    .backend
                    .service
                    .as_ref()
                    .and_then(|b| resolve_backend(store, &namespace, b))
                else {
                    warn!(
                        "Skipping path {:?} of {}/{}: backend service port not resolvable",
                        path.path,
                        namespace,
                        ingress.name_any()
                    );
                    continue;
                };

                let route = route_for(cfg, path, &namespace, &resolved, &modules, &policy);
                if edge.routes.iter().any(|r| r.match_ == route.match_) {
                    warn!(
                        "Duplicate route {} for host {} in {}/{}, keeping the first",
                        route.match_,
                        host,
                        namespace,
                        ingress.name_any()
                    );
                } else {
                    edge.routes.push(route);
                }

                tunnels
                    .entry((namespace.clone(), resolved.service.clone(), resolved.port))
                    .or_insert_with(|| tunnel_for(cfg, &namespace, &resolved));
            }
        }
    }

    if cfg.enable_gateway {
        for gateway in store.list::<Gateway>() {
            let namespace = gateway.namespace().unwrap_or_default();
            for listener in &gateway.spec.listeners {
                let Some(host) = listener.hostname.as_deref().filter(|h| !h.is_empty()) else {
                    continue;
                };
                if domains.contains_key(host) {
                    debug!("Gateway {} host {} already claimed by an ingress", gateway.name_any(), host);
                    continue;
                }
                domains.insert(host.to_string(), domain_for(cfg, host, &namespace));
            }
        }
    }

    let https_edges = edges
        .into_iter()
        .map(|(host, builder)| {
            let mut edge = HttpsEdge::new(
                &hyphenate_host(&host),
                HttpsEdgeSpec {
                    description: cfg.description.clone(),
                    metadata: cfg.metadata.clone(),
                    hostports: vec![format!("{host}:443")],
                    routes: builder.routes,
                    tls_termination: builder.modules.tls_termination,
                    mutual_tls: builder.modules.mutual_tls,
                },
            );
            edge.metadata = cfg.meta(&hyphenate_host(&host), &builder.namespace);
            edge
        })
        .collect();

    let ingress_statuses = ingresses
        .iter()
        .map(|ing| ingress_status(store, ing))
        .collect();

    Desired {
        domains: domains.into_values().collect(),
        https_edges,
        tunnels: tunnels.into_values().collect(),
        ingress_statuses,
    }
}

/// A reserved domain is unique per account, so a host gets one Domain no
/// matter how many ingresses name it. It lives in the namespace of the first
/// ingress, in store key order, that claims the host.
fn domain_for(cfg: &DeriveConfig, host: &str, namespace: &str) -> Domain {
    let name = hyphenate_host(host);
    let mut domain = Domain::new(
        &name,
        DomainSpec {
            domain: host.to_string(),
            region: String::new(),
            reclaim_policy: ReclaimPolicy::Delete,
            description: cfg.description.clone(),
            metadata: cfg.metadata.clone(),
        },
    );
    domain.metadata = cfg.meta(&name, namespace);
    domain
}

fn tunnel_for(cfg: &DeriveConfig, namespace: &str, backend: &ResolvedBackend) -> Tunnel {
    let name = format!("{}-{}", backend.service, backend.port);
    let mut tunnel = Tunnel::new(
        &name,
        TunnelSpec {
            forwards_to: forwards_to(&backend.service, namespace, backend.port),
            labels: backend_labels(namespace, &backend.service, backend.port),
            backend: backend.protocol.map(|p| TunnelBackend {
                protocol: p.to_string(),
            }),
        },
    );
    tunnel.metadata = cfg.meta(&name, namespace);
    tunnel
}

fn route_for(
    cfg: &DeriveConfig,
    path: &HTTPIngressPath,
    namespace: &str,
    backend: &ResolvedBackend,
    modules: &ModuleSetModules,
    policy: &Option<serde_json::Value>,
) -> HttpsEdgeRouteSpec {
    let match_ = path
        .path
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());

    HttpsEdgeRouteSpec {
        description: cfg.description.clone(),
        metadata: cfg.metadata.clone(),
        match_type: map_path_type(&path.path_type).to_string(),
        match_,
        backend: TunnelGroupBackend {
            labels: backend_labels(namespace, &backend.service, backend.port),
            ..Default::default()
        },
        circuit_breaker: modules.circuit_breaker.clone(),
        compression: modules.compression.clone(),
        ip_restriction: modules.ip_restriction.clone(),
        headers: modules.headers.clone(),
        oauth: modules.oauth.clone(),
        oidc: modules.oidc.clone(),
        saml: modules.saml.clone(),
        webhook_verification: modules.webhook_verification.clone(),
        policy: policy.clone(),
    }
}

/// Distinct CNAME targets (or hostnames, for ngrok-managed domains) of an ingress
fn ingress_status(store: &Store, ingress: &Ingress) -> IngressStatusUpdate {
    let namespace = ingress.namespace().unwrap_or_default();
    let hosts: BTreeSet<&str> = ingress
        .spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|r| r.host.as_deref())
        .filter(|h| !h.is_empty())
        .collect();

    let hostnames: BTreeSet<String> = hosts
        .into_iter()
        .filter_map(|host| {
            let domain = store.find::<Domain>(&hyphenate_host(host), &namespace)?;
            let status = domain.status.as_ref().filter(|s| !s.id.is_empty())?;
            Some(
                status
                    .cname_target
                    .clone()
                    .unwrap_or_else(|| domain.spec.domain.clone()),
            )
        })
        .collect();

    IngressStatusUpdate {
        namespace,
        name: ingress.name_any(),
        ingress: hostnames
            .into_iter()
            .map(|hostname| IngressLoadBalancerIngress {
                hostname: Some(hostname),
                ..Default::default()
            })
            .collect(),
    }
}
