//! LoadBalancer Service reconciler
//!
//! A Service with `type: LoadBalancer` and `loadBalancerClass: ngrok` gets one
//! Tunnel plus either a TLSEdge (when it carries a `k8s.ngrok.com/domain`
//! annotation) or a TCPEdge. All three are owner-referenced to the service and
//! named after it. The edge's public address is published back as the
//! service's `status.loadBalancer.ingress`.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{LoadBalancerIngress, PortStatus, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::core::object::HasSpec;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::finalizers::{add_finalizer, has_finalizer, is_being_deleted, remove_finalizer};
use super::kube_io::{object_ref, reasons, EventRecorder, EventType, NamespacedKind, ResourceClient};
use super::requeue::ReconcileOutcome;
use crate::annotations::{self, extract_modules, extract_traffic_policy, parse_optional};
use crate::crd::{
    forwards_to, NgrokModuleSet, NgrokTrafficPolicy, TcpEdge, TcpEdgeSpec, TlsEdge, TlsEdgeSpec,
    Tunnel, TunnelBackend, TunnelGroupBackend, TunnelSpec,
};
use crate::error::{Error, Result};
use crate::store::{backend_labels, backend_protocol, DeriveConfig, Store, BACKEND_LABEL_SERVICE_UID};

pub const LOAD_BALANCER_CLASS: &str = "ngrok";
pub const TLS_EDGE_PORT: i32 = 443;

/// Poll interval while the edge has no public address yet
pub const ADDRESS_PENDING_REQUEUE: Duration = Duration::from_secs(10);
/// Poll interval while owned children are still finalizing
pub const TEARDOWN_REQUEUE: Duration = Duration::from_secs(5);

/// Whether the service asks for an ngrok load balancer
pub fn is_ngrok_load_balancer(svc: &Service) -> bool {
    svc.spec.as_ref().is_some_and(|s| {
        s.type_.as_deref() == Some("LoadBalancer")
            && s.load_balancer_class.as_deref() == Some(LOAD_BALANCER_CLASS)
    })
}

fn owned_by<K: Resource>(obj: &K, uid: &str) -> bool {
    obj.owner_references().iter().any(|o| o.uid == uid)
}

/// Edge synthesized for a service
#[derive(Clone, Debug, PartialEq)]
pub enum LoadBalancerEdge {
    Tls(TlsEdge),
    Tcp(TcpEdge),
}

/// Objects a service should own
#[derive(Clone, Debug, PartialEq)]
pub struct LoadBalancerObjects {
    pub tunnel: Tunnel,
    pub edge: LoadBalancerEdge,
}

/// Build the tunnel and edge for a service from its first port
pub fn desired_objects(
    svc: &Service,
    cfg: &DeriveConfig,
    modules: &crate::crd::ModuleSetModules,
    policy: Option<serde_json::Value>,
) -> Result<LoadBalancerObjects> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    let uid = svc
        .uid()
        .ok_or_else(|| Error::InvalidConfiguration(format!("service {namespace}/{name} has no uid")))?;
    let port: &ServicePort = svc
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|p| p.first())
        .ok_or_else(|| Error::InvalidConfiguration(format!("service {namespace}/{name} has no ports")))?;
    let owner = svc.controller_owner_ref(&()).ok_or_else(|| {
        Error::InvalidConfiguration(format!("service {namespace}/{name} has no uid"))
    })?;

    let mut labels = backend_labels(&namespace, &name, port.port);
    labels.insert(BACKEND_LABEL_SERVICE_UID.to_string(), uid);

    let meta = |owner: OwnerReference| ObjectMeta {
        name: Some(name.clone()),
        namespace: Some(namespace.clone()),
        labels: Some(labels.clone()),
        owner_references: Some(vec![owner]),
        ..Default::default()
    };

    let tunnel = Tunnel {
        metadata: meta(owner.clone()),
        spec: TunnelSpec {
            forwards_to: forwards_to(&name, &namespace, port.port),
            labels: labels.clone(),
            backend: backend_protocol(port.app_protocol.as_deref()).map(|p| TunnelBackend {
                protocol: p.to_string(),
            }),
        },
    };

    let backend = TunnelGroupBackend {
        description: cfg.description.clone(),
        metadata: cfg.metadata.clone(),
        labels: labels.clone(),
    };

    let edge = match parse_optional::<annotations::Domain>(&svc.metadata)? {
        Some(domain) => LoadBalancerEdge::Tls(TlsEdge {
            metadata: meta(owner),
            spec: TlsEdgeSpec {
                description: cfg.description.clone(),
                metadata: cfg.metadata.clone(),
                hostports: vec![format!("{domain}:{TLS_EDGE_PORT}")],
                backend,
                ip_restriction: modules.ip_restriction.clone(),
                tls_termination: modules.tls_termination.clone(),
                mutual_tls: modules.mutual_tls.clone(),
                policy,
            },
            status: None,
        }),
        None => LoadBalancerEdge::Tcp(TcpEdge {
            metadata: meta(owner),
            spec: TcpEdgeSpec {
                description: cfg.description.clone(),
                metadata: cfg.metadata.clone(),
                backend,
                ip_restriction: modules.ip_restriction.clone(),
                policy,
            },
            status: None,
        }),
    };

    Ok(LoadBalancerObjects { tunnel, edge })
}

/// Public address of an edge, `None` until the edge reconciler has filled its status
pub fn load_balancer_ingress(edge: &LoadBalancerEdge) -> Option<LoadBalancerIngress> {
    let (host, port) = match edge {
        LoadBalancerEdge::Tls(edge) => {
            let status = edge.status.as_ref().filter(|s| !s.id.is_empty())?;
            let domain = edge
                .spec
                .hostports
                .first()
                .map(|hp| super::tls_edge::host_of(hp).to_string())?;
            let host = status
                .cname_targets
                .get(&domain)
                .cloned()
                .unwrap_or(domain);
            (host, TLS_EDGE_PORT)
        }
        LoadBalancerEdge::Tcp(edge) => {
            let hostport = edge.status.as_ref()?.hostports.first()?;
            let (host, port) = hostport.rsplit_once(':')?;
            (host.to_string(), port.parse().ok()?)
        }
    };
    Some(LoadBalancerIngress {
        hostname: Some(host),
        ports: Some(vec![PortStatus {
            port,
            protocol: "TCP".to_string(),
            error: None,
        }]),
        ..Default::default()
    })
}

/// Create the object, or replace spec and labels when they drifted
async fn apply<K>(client: &dyn ResourceClient<K>, want: K, owner_uid: &str) -> Result<K>
where
    K: NamespacedKind + HasSpec,
    K::Spec: PartialEq + Clone,
{
    let namespace = want.namespace().unwrap_or_default();
    let name = want.name_any();
    match client.get(&namespace, &name).await? {
        None => {
            info!("Creating {} {}/{}", K::kind(&()), namespace, name);
            client.create(&want).await
        }
        Some(have) if !owned_by(&have, owner_uid) => Err(Error::InvalidConfiguration(format!(
            "{} {namespace}/{name} exists and is not owned by the service",
            K::kind(&())
        ))),
        Some(have) if have.spec() == want.spec() && have.labels() == want.labels() => Ok(have),
        Some(mut have) => {
            info!("Updating {} {}/{}", K::kind(&()), namespace, name);
            *have.spec_mut() = want.spec().clone();
            have.meta_mut().labels = want.meta().labels.clone();
            client.replace(&have).await
        }
    }
}

/// Delete every object in `namespace` owned by `uid`; returns how many still exist
async fn delete_owned<K: NamespacedKind>(
    client: &dyn ResourceClient<K>,
    namespace: &str,
    uid: &str,
) -> Result<usize> {
    let owned: Vec<K> = client
        .list(Some(namespace), "")
        .await?
        .into_iter()
        .filter(|o| owned_by(o, uid))
        .collect();
    for obj in &owned {
        if obj.meta().deletion_timestamp.is_none() {
            info!("Deleting {} {}/{}", K::kind(&()), namespace, obj.name_any());
            client.delete(namespace, &obj.name_any()).await?;
        }
    }
    let remaining = client
        .list(Some(namespace), "")
        .await?
        .into_iter()
        .filter(|o| owned_by(o, uid))
        .count();
    Ok(remaining)
}

/// Clients the service reconciler writes through
#[derive(Clone)]
pub struct ServiceClients {
    pub services: Arc<dyn ResourceClient<Service>>,
    pub tunnels: Arc<dyn ResourceClient<Tunnel>>,
    pub tls_edges: Arc<dyn ResourceClient<TlsEdge>>,
    pub tcp_edges: Arc<dyn ResourceClient<TcpEdge>>,
}

pub struct ServiceReconciler {
    clients: ServiceClients,
    events: Arc<dyn EventRecorder>,
    store: Arc<Store>,
    cfg: DeriveConfig,
}

impl ServiceReconciler {
    pub fn new(
        clients: ServiceClients,
        events: Arc<dyn EventRecorder>,
        store: Arc<Store>,
        cfg: DeriveConfig,
    ) -> Self {
        Self {
            clients,
            events,
            store,
            cfg,
        }
    }

    #[instrument(skip(self), fields(kind = "Service"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let Some(svc) = self.clients.services.get(namespace, name).await? else {
            return Ok(ReconcileOutcome::Done);
        };

        if is_being_deleted(&svc) || !is_ngrok_load_balancer(&svc) {
            if !has_finalizer(&svc) {
                return Ok(ReconcileOutcome::Done);
            }
            return self.teardown(&svc).await;
        }

        add_finalizer(&*self.clients.services, &svc).await?;

        match self.converge(&svc).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Failed to reconcile load balancer {}/{}: {}", namespace, name, e);
                self.events
                    .publish(object_ref(&svc), EventType::Warning, reasons::FAILED_UPDATE, &e.sanitized_message())
                    .await;
                Err(e)
            }
        }
    }

    async fn converge(&self, svc: &Service) -> Result<ReconcileOutcome> {
        let namespace = svc.namespace().unwrap_or_default();
        let uid = svc.uid().unwrap_or_default();

        let modules = extract_modules(&svc.metadata, |n| self.store.find::<NgrokModuleSet>(n, &namespace));
        let policy = extract_traffic_policy(&svc.metadata, |n| {
            self.store.find::<NgrokTrafficPolicy>(n, &namespace)
        });
        let want = desired_objects(svc, &self.cfg, &modules, policy)?;

        apply(&*self.clients.tunnels, want.tunnel, &uid).await?;

        let edge = match want.edge {
            LoadBalancerEdge::Tls(edge) => {
                delete_owned(&*self.clients.tcp_edges, &namespace, &uid).await?;
                LoadBalancerEdge::Tls(apply(&*self.clients.tls_edges, edge, &uid).await?)
            }
            LoadBalancerEdge::Tcp(edge) => {
                delete_owned(&*self.clients.tls_edges, &namespace, &uid).await?;
                LoadBalancerEdge::Tcp(apply(&*self.clients.tcp_edges, edge, &uid).await?)
            }
        };

        let Some(ingress) = load_balancer_ingress(&edge) else {
            debug!("Edge for {}/{} has no address yet", namespace, svc.name_any());
            return Ok(ReconcileOutcome::Requeue(ADDRESS_PENDING_REQUEUE));
        };

        let current = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref());
        if current.map(Vec::as_slice) != Some(std::slice::from_ref(&ingress)) {
            info!(
                "Publishing load balancer address {} for {}/{}",
                ingress.hostname.as_deref().unwrap_or_default(),
                namespace,
                svc.name_any()
            );
            self.clients
                .services
                .patch_status(svc, json!({ "loadBalancer": { "ingress": [ingress] } }))
                .await?;
        }
        Ok(ReconcileOutcome::Done)
    }

    async fn teardown(&self, svc: &Service) -> Result<ReconcileOutcome> {
        let namespace = svc.namespace().unwrap_or_default();
        let uid = svc.uid().unwrap_or_default();

        let remaining = delete_owned(&*self.clients.tls_edges, &namespace, &uid).await?
            + delete_owned(&*self.clients.tcp_edges, &namespace, &uid).await?
            + delete_owned(&*self.clients.tunnels, &namespace, &uid).await?;
        if remaining > 0 {
            debug!("{} owned objects of {}/{} still finalizing", remaining, namespace, svc.name_any());
            return Ok(ReconcileOutcome::Requeue(TEARDOWN_REQUEUE));
        }

        if !is_being_deleted(svc) {
            self.clients
                .services
                .patch_status(svc, json!({ "loadBalancer": { "ingress": null } }))
                .await?;
        }
        remove_finalizer(&*self.clients.services, svc).await?;
        self.events
            .publish(object_ref(svc), EventType::Normal, reasons::DELETED, "Load balancer released")
            .await;
        Ok(ReconcileOutcome::Done)
    }
}
