//! TLSEdge reconciler

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::backends;
use super::base::{BaseController, NgrokResource, RemoteLifecycle};
use super::conditions::{set_condition, CONDITION_TYPE_READY};
use super::kube_io::{object_ref, EventRecorder, ResourceClient};
use super::requeue::ReconcileOutcome;
use super::route_modules::{EdgeModules, ModuleReconciler, ObservedEdgeModules};
use crate::crd::{hyphenate_host, Domain, DomainSpec, ReclaimPolicy, TlsEdge, TlsEdgeStatus, TunnelGroupBackendStatus};
use crate::error::{Error, Result};
use crate::platform::{
    self, collect_all, EdgeKind, EndpointBackendMutate, NgrokApi, TlsEdgeCreate, TlsEdgeUpdate,
};

pub const CONDITION_TLS_EDGE_CREATED: &str = "TLSEdgeCreated";
pub const CONDITION_BACKEND_CONFIGURED: &str = "BackendConfigured";

pub const REASON_TLS_EDGE_CREATED: &str = "TLSEdgeCreated";
pub const REASON_BACKEND_CONFIGURED: &str = "BackendConfigured";
pub const REASON_MODULES_FAILED: &str = "ModuleConfigurationFailed";
pub const REASON_EDGE_ACTIVE: &str = "EdgeActive";

impl NgrokResource for TlsEdge {
    fn status_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Host part of a `host:port` pair
pub fn host_of(hostport: &str) -> &str {
    hostport
        .rsplit_once(':')
        .map_or(hostport, |(host, _)| host)
}

fn sorted(hostports: &[String]) -> Vec<&str> {
    let mut v: Vec<&str> = hostports.iter().map(String::as_str).collect();
    v.sort_unstable();
    v
}

pub struct TlsEdgeReconciler {
    base: BaseController<TlsEdge>,
    domains: Arc<dyn ResourceClient<Domain>>,
    ngrok: Arc<dyn NgrokApi>,
    modules: ModuleReconciler,
}

impl TlsEdgeReconciler {
    pub fn new(
        client: Arc<dyn ResourceClient<TlsEdge>>,
        domains: Arc<dyn ResourceClient<Domain>>,
        events: Arc<dyn EventRecorder>,
        ngrok: Arc<dyn NgrokApi>,
        modules: ModuleReconciler,
    ) -> Self {
        Self {
            base: BaseController::new(client, events),
            domains,
            ngrok,
            modules,
        }
    }

    #[instrument(skip(self), fields(kind = "TLSEdge"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        self.base.reconcile(self, namespace, name).await
    }

    /// Make sure a Domain exists for every hostport; extras are left alone
    ///
    /// Returns the CNAME targets keyed by host once every domain is reserved,
    /// [`Error::NotAllDomainsReadyYet`] before that.
    async fn ensure_domains(&self, edge: &TlsEdge) -> Result<BTreeMap<String, String>> {
        let namespace = edge.namespace().unwrap_or_default();
        let mut cname_targets = BTreeMap::new();
        let mut pending = Vec::new();
        for hostport in &edge.spec.hostports {
            let host = host_of(hostport);
            let name = hyphenate_host(host);
            match self.domains.get(&namespace, &name).await? {
                Some(domain) => {
                    let status = domain.status.unwrap_or_default();
                    if status.id.is_empty() {
                        pending.push(host.to_string());
                    }
                    if let Some(target) = status.cname_target {
                        cname_targets.insert(host.to_string(), target);
                    }
                }
                None => {
                    info!("Creating Domain {}/{} for {}", namespace, name, host);
                    let domain = Domain {
                        metadata: ObjectMeta {
                            name: Some(name),
                            namespace: Some(namespace.clone()),
                            ..Default::default()
                        },
                        spec: DomainSpec {
                            domain: host.to_string(),
                            region: String::new(),
                            reclaim_policy: ReclaimPolicy::Delete,
                            description: edge.spec.description.clone(),
                            metadata: edge.spec.metadata.clone(),
                        },
                        status: None,
                    };
                    self.domains.create(&domain).await?;
                    pending.push(host.to_string());
                }
            }
        }
        if !pending.is_empty() {
            debug!("Waiting for domains {:?} of {}", pending, edge.name_any());
            return Err(Error::NotAllDomainsReadyYet);
        }
        Ok(cname_targets)
    }

    async fn find_by_backend(&self, backend_id: &str) -> Result<Option<platform::TlsEdge>> {
        Ok(collect_all(self.ngrok.list_tls_edges())
            .await?
            .into_iter()
            .find(|e| e.backend.as_ref().is_some_and(|b| b.backend.id == backend_id)))
    }

    async fn converge(&self, edge: &TlsEdge, existing: Option<platform::TlsEdge>) -> Result<ReconcileOutcome> {
        let generation = edge.metadata.generation;
        let spec = &edge.spec;
        let cname_targets = self.ensure_domains(edge).await?;

        let recorded_backend = edge
            .status
            .as_ref()
            .map(|s| s.backend.id.as_str())
            .unwrap_or_default();
        let backend = backends::ensure(&*self.ngrok, recorded_backend, &spec.backend).await?;

        let existing = match existing {
            Some(remote) => Some(remote),
            None => self.find_by_backend(&backend.id).await?,
        };
        let remote = match existing {
            None => {
                let remote = self
                    .ngrok
                    .create_tls_edge(&TlsEdgeCreate {
                        description: spec.description.clone(),
                        metadata: spec.metadata.clone(),
                        hostports: spec.hostports.clone(),
                        backend: Some(EndpointBackendMutate::new(&backend.id)),
                    })
                    .await?;
                info!("Created tls edge {}", remote.id);
                remote
            }
            Some(remote) => {
                let attached = remote.backend.as_ref().map(|b| b.backend.id.as_str());
                if sorted(&remote.hostports) != sorted(&spec.hostports)
                    || attached != Some(backend.id.as_str())
                    || remote.description != spec.description
                    || remote.metadata != spec.metadata
                {
                    info!("Updating tls edge {}", remote.id);
                    self.ngrok
                        .update_tls_edge(&TlsEdgeUpdate {
                            id: remote.id.clone(),
                            description: Some(spec.description.clone()),
                            metadata: Some(spec.metadata.clone()),
                            hostports: Some(spec.hostports.clone()),
                            backend: Some(EndpointBackendMutate::new(&backend.id)),
                        })
                        .await?
                } else {
                    remote
                }
            }
        };

        let mut status = edge.status.clone().unwrap_or_default();
        status.id.clone_from(&remote.id);
        status.uri.clone_from(&remote.uri);
        status.hostports.clone_from(&remote.hostports);
        status.backend = TunnelGroupBackendStatus { id: backend.id };
        status.cname_targets = cname_targets;
        set_condition(&mut status.conditions, CONDITION_TLS_EDGE_CREATED, true, REASON_TLS_EDGE_CREATED, "TLS edge exists", generation);
        set_condition(&mut status.conditions, CONDITION_BACKEND_CONFIGURED, true, REASON_BACKEND_CONFIGURED, "Backend attached", generation);

        let modules = self
            .modules
            .reconcile_edge(
                &object_ref(edge),
                &edge.namespace().unwrap_or_default(),
                EdgeKind::Tls,
                &remote.id,
                EdgeModules {
                    tls_termination: spec.tls_termination.as_ref(),
                    mutual_tls: spec.mutual_tls.as_ref(),
                    ip_restriction: spec.ip_restriction.as_ref(),
                    policy: spec.policy.as_ref(),
                },
                ObservedEdgeModules {
                    tls_termination: remote.tls_termination.as_ref(),
                    mutual_tls: remote.mutual_tls.as_ref(),
                    ip_restriction: remote.ip_restriction.as_ref(),
                    traffic_policy: remote.traffic_policy.as_ref(),
                },
            )
            .await;

        match modules {
            Ok(()) => {
                set_condition(&mut status.conditions, CONDITION_TYPE_READY, true, REASON_EDGE_ACTIVE, "TLS edge is active", generation);
                self.write_status(edge, &status).await?;
                Ok(ReconcileOutcome::Done)
            }
            Err(e) => {
                set_condition(&mut status.conditions, CONDITION_TYPE_READY, false, REASON_MODULES_FAILED, &e.sanitized_message(), generation);
                self.write_status(edge, &status).await?;
                Err(e)
            }
        }
    }

    async fn write_status(&self, edge: &TlsEdge, status: &TlsEdgeStatus) -> Result<()> {
        self.base
            .client
            .patch_status(edge, serde_json::to_value(status)?)
            .await
    }
}

#[async_trait]
impl RemoteLifecycle<TlsEdge> for TlsEdgeReconciler {
    async fn create(&self, edge: &TlsEdge) -> Result<ReconcileOutcome> {
        self.converge(edge, None).await
    }

    async fn update(&self, edge: &TlsEdge) -> Result<ReconcileOutcome> {
        let id = edge.status_id().unwrap_or_default();
        let remote = self.ngrok.get_tls_edge(id).await?;
        self.converge(edge, Some(remote)).await
    }

    async fn delete(&self, edge: &TlsEdge) -> Result<()> {
        let id = edge.status_id().unwrap_or_default();
        info!("Deleting tls edge {}", id);
        Ok(self.ngrok.delete_tls_edge(id).await?)
    }

    async fn clear_status_id(&self, edge: &TlsEdge) -> Result<()> {
        self.base
            .client
            .patch_status(edge, json!({ "id": null }))
            .await
    }
}
