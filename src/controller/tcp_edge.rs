//! TCPEdge reconciler
//!
//! A TCP edge listens on a reserved address. The reservation carries a JSON
//! metadata record naming its owner so it can be found again after a restart
//! instead of leaking a fresh address.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::backends;
use super::base::{BaseController, NgrokResource, RemoteLifecycle};
use super::conditions::{set_condition, CONDITION_TYPE_READY};
use super::kube_io::{object_ref, EventRecorder, ResourceClient};
use super::requeue::ReconcileOutcome;
use super::route_modules::{EdgeModules, ModuleReconciler, ObservedEdgeModules};
use crate::crd::{TcpEdge, TcpEdgeStatus, TunnelGroupBackendStatus};
use crate::error::Result;
use crate::platform::{
    self, collect_all, EdgeKind, EndpointBackendMutate, NgrokApi, ReservedAddr,
    ReservedAddrCreate, ReservedAddrUpdate, TcpEdgeCreate, TcpEdgeUpdate,
};

pub const CONDITION_TCP_EDGE_CREATED: &str = "TCPEdgeCreated";
pub const CONDITION_ADDRESS_RESERVED: &str = "AddressReserved";

pub const REASON_TCP_EDGE_CREATED: &str = "TCPEdgeCreated";
pub const REASON_ADDRESS_RESERVED: &str = "AddressReserved";
pub const REASON_MODULES_FAILED: &str = "ModuleConfigurationFailed";
pub const REASON_EDGE_ACTIVE: &str = "EdgeActive";

impl NgrokResource for TcpEdge {
    fn status_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerKey {
    pub kind: String,
    pub name: String,
}

/// Metadata stored on a reserved address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddrOwner {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<OwnerKey>,
}

impl AddrOwner {
    pub fn of(edge: &TcpEdge) -> Self {
        let owners = edge.owner_references();
        let owner = owners
            .iter()
            .find(|o| o.controller == Some(true))
            .or_else(|| owners.first())
            .map(|o| OwnerKey {
                kind: o.kind.clone(),
                name: o.name.clone(),
            });
        Self {
            namespace: edge.namespace().unwrap_or_default(),
            name: edge.name_any(),
            owner_ref: owner,
        }
    }

    /// Same namespace, then owner equality when either side has one, else name
    pub fn matches(&self, other: &AddrOwner) -> bool {
        if self.namespace != other.namespace {
            return false;
        }
        if self.owner_ref.is_some() || other.owner_ref.is_some() {
            self.owner_ref == other.owner_ref
        } else {
            self.name == other.name
        }
    }

    fn description(&self) -> String {
        format!("Reserved for {}/{}", self.namespace, self.name)
    }
}

pub struct TcpEdgeReconciler {
    base: BaseController<TcpEdge>,
    ngrok: Arc<dyn NgrokApi>,
    modules: ModuleReconciler,
    region: String,
}

impl TcpEdgeReconciler {
    pub fn new(
        client: Arc<dyn ResourceClient<TcpEdge>>,
        events: Arc<dyn EventRecorder>,
        ngrok: Arc<dyn NgrokApi>,
        modules: ModuleReconciler,
        region: String,
    ) -> Self {
        Self {
            base: BaseController::new(client, events),
            ngrok,
            modules,
            region,
        }
    }

    #[instrument(skip(self), fields(kind = "TCPEdge"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        self.base.reconcile(self, namespace, name).await
    }

    /// Hostports for the edge, adopting or creating a reservation when none is recorded
    async fn reserve_addr(&self, edge: &TcpEdge) -> Result<Vec<String>> {
        if let Some(status) = &edge.status {
            if !status.hostports.is_empty() {
                return Ok(status.hostports.clone());
            }
        }

        let owner = AddrOwner::of(edge);
        let metadata = serde_json::to_string(&owner)?;
        let adopted = collect_all(self.ngrok.list_reserved_addrs())
            .await?
            .into_iter()
            .find(|addr| {
                serde_json::from_str::<AddrOwner>(&addr.metadata)
                    .is_ok_and(|theirs| owner.matches(&theirs))
            });

        let addr: ReservedAddr = match adopted {
            Some(addr) => {
                info!("Adopting reserved address {} ({})", addr.addr, addr.id);
                self.ngrok
                    .update_reserved_addr(&ReservedAddrUpdate {
                        id: addr.id.clone(),
                        description: Some(owner.description()),
                        metadata: Some(metadata),
                    })
                    .await?
            }
            None => {
                let addr = self
                    .ngrok
                    .create_reserved_addr(&ReservedAddrCreate {
                        description: owner.description(),
                        metadata,
                        region: self.region.clone(),
                    })
                    .await?;
                info!("Reserved address {} ({})", addr.addr, addr.id);
                addr
            }
        };
        Ok(vec![addr.addr])
    }

    async fn find_by_backend(&self, backend_id: &str) -> Result<Option<platform::TcpEdge>> {
        Ok(collect_all(self.ngrok.list_tcp_edges())
            .await?
            .into_iter()
            .find(|e| e.backend.as_ref().is_some_and(|b| b.backend.id == backend_id)))
    }

    async fn converge(&self, edge: &TcpEdge, existing: Option<platform::TcpEdge>) -> Result<ReconcileOutcome> {
        let generation = edge.metadata.generation;
        let spec = &edge.spec;
        let hostports = self.reserve_addr(edge).await?;

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
                    .create_tcp_edge(&TcpEdgeCreate {
                        description: spec.description.clone(),
                        metadata: spec.metadata.clone(),
                        hostports: hostports.clone(),
                        backend: Some(EndpointBackendMutate::new(&backend.id)),
                    })
                    .await?;
                info!("Created tcp edge {}", remote.id);
                remote
            }
            Some(remote) => {
                let attached = remote.backend.as_ref().map(|b| b.backend.id.as_str());
                if remote.hostports != hostports
                    || attached != Some(backend.id.as_str())
                    || remote.description != spec.description
                    || remote.metadata != spec.metadata
                {
                    info!("Updating tcp edge {}", remote.id);
                    self.ngrok
                        .update_tcp_edge(&TcpEdgeUpdate {
                            id: remote.id.clone(),
                            description: Some(spec.description.clone()),
                            metadata: Some(spec.metadata.clone()),
                            hostports: Some(hostports.clone()),
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
        status.hostports = hostports;
        status.backend = TunnelGroupBackendStatus { id: backend.id };
        set_condition(&mut status.conditions, CONDITION_ADDRESS_RESERVED, true, REASON_ADDRESS_RESERVED, "TCP address reserved", generation);
        set_condition(&mut status.conditions, CONDITION_TCP_EDGE_CREATED, true, REASON_TCP_EDGE_CREATED, "TCP edge exists", generation);

        let modules = self
            .modules
            .reconcile_edge(
                &object_ref(edge),
                &edge.namespace().unwrap_or_default(),
                EdgeKind::Tcp,
                &remote.id,
                EdgeModules {
                    ip_restriction: spec.ip_restriction.as_ref(),
                    policy: spec.policy.as_ref(),
                    ..Default::default()
                },
                ObservedEdgeModules {
                    ip_restriction: remote.ip_restriction.as_ref(),
                    traffic_policy: remote.traffic_policy.as_ref(),
                    ..Default::default()
                },
            )
            .await;

        match modules {
            Ok(()) => {
                set_condition(&mut status.conditions, CONDITION_TYPE_READY, true, REASON_EDGE_ACTIVE, "TCP edge is active", generation);
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

    async fn write_status(&self, edge: &TcpEdge, status: &TcpEdgeStatus) -> Result<()> {
        self.base
            .client
            .patch_status(edge, serde_json::to_value(status)?)
            .await
    }

    /// Release the reservation backing the edge's first hostport
    async fn release_addr(&self, edge: &TcpEdge) -> Result<()> {
        let Some(hostport) = edge.status.as_ref().and_then(|s| s.hostports.first()) else {
            return Ok(());
        };
        let reserved = collect_all(self.ngrok.list_reserved_addrs())
            .await?
            .into_iter()
            .find(|a| &a.addr == hostport);
        match reserved {
            Some(addr) => {
                info!("Releasing reserved address {} ({})", addr.addr, addr.id);
                match self.ngrok.delete_reserved_addr(&addr.id).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            None => {
                debug!("No reservation found for {}", hostport);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RemoteLifecycle<TcpEdge> for TcpEdgeReconciler {
    async fn create(&self, edge: &TcpEdge) -> Result<ReconcileOutcome> {
        self.converge(edge, None).await
    }

    async fn update(&self, edge: &TcpEdge) -> Result<ReconcileOutcome> {
        let id = edge.status_id().unwrap_or_default();
        let remote = self.ngrok.get_tcp_edge(id).await?;
        self.converge(edge, Some(remote)).await
    }

    async fn delete(&self, edge: &TcpEdge) -> Result<()> {
        let id = edge.status_id().unwrap_or_default();
        info!("Deleting tcp edge {}", id);
        match self.ngrok.delete_tcp_edge(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.release_addr(edge).await
    }

    async fn clear_status_id(&self, edge: &TcpEdge) -> Result<()> {
        self.base
            .client
            .patch_status(edge, json!({ "id": null }))
            .await
    }
}
