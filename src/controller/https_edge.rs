//! HTTPSEdge reconciler
//!
//! Converges the edge, its routes (each with its own backend and modules)
//! and the edge-level TLS modules.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::backends;
use super::base::{BaseController, NgrokResource, RemoteLifecycle};
use super::conditions::{set_condition, CONDITION_TYPE_READY};
use super::kube_io::{object_ref, EventRecorder, ResourceClient};
use super::requeue::ReconcileOutcome;
use super::route_modules::{EdgeModules, ModuleReconciler, ObservedEdgeModules};
use crate::crd::{
    HttpsEdge, HttpsEdgeRouteSpec, HttpsEdgeRouteStatus, HttpsEdgeStatus,
    TunnelGroupBackendStatus,
};
use crate::error::Result;
use crate::platform::{
    self, collect_all, EdgeKind, EndpointBackendMutate, HttpsEdgeCreate, HttpsEdgeRoute,
    HttpsEdgeRouteCreate, HttpsEdgeRouteUpdate, HttpsEdgeUpdate, NgrokApi, RouteModuleKind,
};

pub const CONDITION_HTTPS_EDGE_CREATED: &str = "HTTPSEdgeCreated";
pub const CONDITION_ROUTES_CONFIGURED: &str = "RoutesConfigured";

pub const REASON_EDGE_CREATED: &str = "HTTPSEdgeCreated";
pub const REASON_ROUTES_CONFIGURED: &str = "RoutesConfigured";
pub const REASON_ROUTE_FAILED: &str = "RouteConfigurationFailed";
pub const REASON_EDGE_ACTIVE: &str = "EdgeActive";

impl NgrokResource for HttpsEdge {
    fn status_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

fn sorted(hostports: &[String]) -> Vec<&str> {
    let mut v: Vec<&str> = hostports.iter().map(String::as_str).collect();
    v.sort_unstable();
    v.dedup();
    v
}

/// Auth modules present on a remote route
fn observed_auth(route: &HttpsEdgeRoute) -> Vec<RouteModuleKind> {
    let mut kinds = Vec::new();
    if route.oauth.is_some() {
        kinds.push(RouteModuleKind::OAuth);
    }
    if route.oidc.is_some() {
        kinds.push(RouteModuleKind::Oidc);
    }
    if route.saml.is_some() {
        kinds.push(RouteModuleKind::Saml);
    }
    kinds
}

/// The auth module a route spec asks for, OAuth taking precedence
fn desired_auth(spec: &HttpsEdgeRouteSpec) -> Option<RouteModuleKind> {
    if spec.oauth.as_ref().and_then(|o| o.provided()).is_some() {
        Some(RouteModuleKind::OAuth)
    } else if spec.oidc.is_some() {
        Some(RouteModuleKind::Oidc)
    } else if spec.saml.is_some() {
        Some(RouteModuleKind::Saml)
    } else {
        None
    }
}

/// Switching between auth providers needs the old one removed first
pub fn needs_auth_migration(route: &HttpsEdgeRoute, spec: &HttpsEdgeRouteSpec) -> bool {
    match (observed_auth(route).as_slice(), desired_auth(spec)) {
        ([current], Some(wanted)) => *current != wanted,
        _ => false,
    }
}

pub struct HttpsEdgeReconciler {
    base: BaseController<HttpsEdge>,
    ngrok: Arc<dyn NgrokApi>,
    modules: ModuleReconciler,
}

impl HttpsEdgeReconciler {
    pub fn new(
        client: Arc<dyn ResourceClient<HttpsEdge>>,
        events: Arc<dyn EventRecorder>,
        ngrok: Arc<dyn NgrokApi>,
        modules: ModuleReconciler,
    ) -> Self {
        Self {
            base: BaseController::new(client, events),
            ngrok,
            modules,
        }
    }

    #[instrument(skip(self), fields(kind = "HTTPSEdge"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        self.base.reconcile(self, namespace, name).await
    }

    async fn write_status(&self, edge: &HttpsEdge, status: &HttpsEdgeStatus) -> Result<()> {
        self.base
            .client
            .patch_status(edge, serde_json::to_value(status)?)
            .await
    }

    /// Remote edge claiming exactly the desired hostports
    async fn find_by_hostports(&self, edge: &HttpsEdge) -> Result<Option<platform::HttpsEdge>> {
        let wanted = sorted(&edge.spec.hostports);
        Ok(collect_all(self.ngrok.list_https_edges())
            .await?
            .into_iter()
            .find(|remote| sorted(&remote.hostports) == wanted))
    }

    async fn update_edge(
        &self,
        edge: &HttpsEdge,
        remote: platform::HttpsEdge,
    ) -> Result<platform::HttpsEdge> {
        let spec = &edge.spec;
        if sorted(&remote.hostports) == sorted(&spec.hostports)
            && remote.description == spec.description
            && remote.metadata == spec.metadata
        {
            return Ok(remote);
        }
        info!("Updating https edge {}", remote.id);
        Ok(self
            .ngrok
            .update_https_edge(&HttpsEdgeUpdate {
                id: remote.id.clone(),
                description: Some(spec.description.clone()),
                metadata: Some(spec.metadata.clone()),
                hostports: Some(spec.hostports.clone()),
            })
            .await?)
    }

    /// Detach the route and strip its auth modules
    async fn take_route_offline(&self, edge_id: &str, route: &mut HttpsEdgeRoute) -> Result<()> {
        info!("Taking route {} offline to switch auth provider", route.match_);
        *route = self
            .ngrok
            .update_https_edge_route(&HttpsEdgeRouteUpdate {
                edge_id: edge_id.to_string(),
                id: route.id.clone(),
                match_type: route.match_type.clone(),
                match_: route.match_.clone(),
                description: route.description.clone(),
                metadata: route.metadata.clone(),
                backend: None,
            })
            .await?;
        for kind in observed_auth(route) {
            self.ngrok
                .delete_route_module(edge_id, &route.id, kind)
                .await?;
            match kind {
                RouteModuleKind::OAuth => route.oauth = None,
                RouteModuleKind::Oidc => route.oidc = None,
                _ => route.saml = None,
            }
        }
        Ok(())
    }

    async fn reconcile_route(
        &self,
        regarding: &ObjectReference,
        namespace: &str,
        edge_id: &str,
        existing: Option<&HttpsEdgeRoute>,
        spec: &HttpsEdgeRouteSpec,
    ) -> Result<HttpsEdgeRouteStatus> {
        let mut route = match existing {
            Some(route) => route.clone(),
            None => {
                info!("Creating route {} on edge {}", spec.match_, edge_id);
                self.ngrok
                    .create_https_edge_route(&HttpsEdgeRouteCreate {
                        edge_id: edge_id.to_string(),
                        match_type: spec.match_type.clone(),
                        match_: spec.match_.clone(),
                        description: spec.description.clone(),
                        metadata: spec.metadata.clone(),
                        backend: None,
                    })
                    .await?
            }
        };

        if needs_auth_migration(&route, spec) {
            self.take_route_offline(edge_id, &mut route).await?;
        }

        self.modules
            .reconcile_route(regarding, namespace, edge_id, &route, spec)
            .await?;

        let backend = backends::find_or_create(&*self.ngrok, &spec.backend).await?;
        let attached = route.backend.as_ref().map(|b| b.backend.id.as_str());
        if attached != Some(backend.id.as_str())
            || route.match_type != spec.match_type
            || route.description != spec.description
            || route.metadata != spec.metadata
        {
            route = self
                .ngrok
                .update_https_edge_route(&HttpsEdgeRouteUpdate {
                    edge_id: edge_id.to_string(),
                    id: route.id.clone(),
                    match_type: spec.match_type.clone(),
                    match_: spec.match_.clone(),
                    description: spec.description.clone(),
                    metadata: spec.metadata.clone(),
                    backend: Some(EndpointBackendMutate::new(&backend.id)),
                })
                .await?;
        }

        Ok(HttpsEdgeRouteStatus {
            id: route.id,
            uri: route.uri,
            match_: route.match_,
            match_type: route.match_type,
            backend: Some(TunnelGroupBackendStatus { id: backend.id }),
        })
    }

    async fn converge(
        &self,
        edge: &HttpsEdge,
        remote: platform::HttpsEdge,
    ) -> Result<ReconcileOutcome> {
        let namespace = edge.namespace().unwrap_or_default();
        let generation = edge.metadata.generation;
        let regarding = object_ref(edge);
        let remote = self.update_edge(edge, remote).await?;

        let mut status = edge.status.clone().unwrap_or_default();
        status.id.clone_from(&remote.id);
        status.uri.clone_from(&remote.uri);
        set_condition(
            &mut status.conditions,
            CONDITION_HTTPS_EDGE_CREATED,
            true,
            REASON_EDGE_CREATED,
            "HTTPS edge exists",
            generation,
        );

        match self.converge_routes(edge, &remote, &regarding, &namespace).await {
            Ok(routes) => {
                status.routes = routes;
                set_condition(
                    &mut status.conditions,
                    CONDITION_ROUTES_CONFIGURED,
                    true,
                    REASON_ROUTES_CONFIGURED,
                    "All routes configured",
                    generation,
                );
                set_condition(
                    &mut status.conditions,
                    CONDITION_TYPE_READY,
                    true,
                    REASON_EDGE_ACTIVE,
                    "HTTPS edge is active",
                    generation,
                );
                self.write_status(edge, &status).await?;
                Ok(ReconcileOutcome::Done)
            }
            Err(e) => {
                let msg = e.sanitized_message();
                set_condition(&mut status.conditions, CONDITION_ROUTES_CONFIGURED, false, REASON_ROUTE_FAILED, &msg, generation);
                set_condition(&mut status.conditions, CONDITION_TYPE_READY, false, REASON_ROUTE_FAILED, &msg, generation);
                self.write_status(edge, &status).await?;
                Err(e)
            }
        }
    }

    async fn converge_routes(
        &self,
        edge: &HttpsEdge,
        remote: &platform::HttpsEdge,
        regarding: &ObjectReference,
        namespace: &str,
    ) -> Result<Vec<HttpsEdgeRouteStatus>> {
        let mut statuses = Vec::with_capacity(edge.spec.routes.len());
        let mut seen = BTreeSet::new();
        for spec in &edge.spec.routes {
            if !seen.insert(spec.match_.as_str()) {
                warn!("Skipping duplicate route match {} on {}", spec.match_, edge.name_any());
                continue;
            }
            let existing = remote.routes.iter().find(|r| r.match_ == spec.match_);
            statuses.push(
                self.reconcile_route(regarding, namespace, &remote.id, existing, spec)
                    .await?,
            );
        }

        for stale in remote.routes.iter().filter(|r| !seen.contains(r.match_.as_str())) {
            info!("Deleting route {} ({}) from edge {}", stale.match_, stale.id, remote.id);
            match self.ngrok.delete_https_edge_route(&remote.id, &stale.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.modules
            .reconcile_edge(
                regarding,
                namespace,
                EdgeKind::Https,
                &remote.id,
                EdgeModules {
                    tls_termination: edge.spec.tls_termination.as_ref(),
                    mutual_tls: edge.spec.mutual_tls.as_ref(),
                    ..Default::default()
                },
                ObservedEdgeModules {
                    tls_termination: remote.tls_termination.as_ref(),
                    mutual_tls: remote.mutual_tls.as_ref(),
                    ..Default::default()
                },
            )
            .await?;

        Ok(statuses)
    }
}

#[async_trait]
impl RemoteLifecycle<HttpsEdge> for HttpsEdgeReconciler {
    async fn create(&self, edge: &HttpsEdge) -> Result<ReconcileOutcome> {
        let remote = match self.find_by_hostports(edge).await? {
            Some(remote) => {
                info!("Adopting https edge {} for {:?}", remote.id, remote.hostports);
                remote
            }
            None => {
                let remote = self
                    .ngrok
                    .create_https_edge(&HttpsEdgeCreate {
                        description: edge.spec.description.clone(),
                        metadata: edge.spec.metadata.clone(),
                        hostports: edge.spec.hostports.clone(),
                    })
                    .await?;
                info!("Created https edge {}", remote.id);
                remote
            }
        };
        self.converge(edge, remote).await
    }

    async fn update(&self, edge: &HttpsEdge) -> Result<ReconcileOutcome> {
        let id = edge.status_id().unwrap_or_default();
        let remote = self.ngrok.get_https_edge(id).await?;
        self.converge(edge, remote).await
    }

    async fn delete(&self, edge: &HttpsEdge) -> Result<()> {
        let id = edge.status_id().unwrap_or_default();
        info!("Deleting https edge {}", id);
        Ok(self.ngrok.delete_https_edge(id).await?)
    }

    async fn clear_status_id(&self, edge: &HttpsEdge) -> Result<()> {
        self.base
            .client
            .patch_status(edge, json!({ "id": null, "routes": [] }))
            .await
    }
}
