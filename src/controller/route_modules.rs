//! Convergence of the optional modules attached to routes and edges
//!
//! Every module follows the same contract: nothing desired and nothing
//! observed is a no-op, nothing desired but something observed deletes the
//! attachment, and a desired module is built into a payload (resolving
//! secrets and IP policy names) and replaced only when it differs from what
//! the platform reports. Secrets are write-only on the platform, so they are
//! left out of that comparison.

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::kube_io::{reasons, EventRecorder, EventType};
use crate::crd::{self, HttpsEdgeRouteSpec, SecretKeyRef};
use crate::error::{Error, Result};
use crate::platform::{
    self, EdgeKind, EdgeModule, EdgeModuleKind, HttpsEdgeRoute, NgrokApi, RouteModule,
    RouteModuleKind,
};
use crate::resolvers::{IpPolicyResolver, SecretResolver};

/// Webhook providers that verify without a shared secret
const SECRETLESS_WEBHOOK_PROVIDERS: &[&str] = &["sns"];

/// What a single module sub-reconciler should do
#[derive(Debug, PartialEq)]
pub enum Plan<M> {
    Keep,
    Delete,
    Replace(M),
}

impl<M> Plan<M> {
    pub fn new<D, O>(
        desired: Option<D>,
        observed: Option<&O>,
        same: impl FnOnce(&D, &O) -> bool,
        wrap: impl FnOnce(D) -> M,
    ) -> Self {
        match (desired, observed) {
            (None, None) => Plan::Keep,
            (None, Some(_)) => Plan::Delete,
            (Some(d), Some(o)) if same(&d, o) => Plan::Keep,
            (Some(d), _) => Plan::Replace(wrap(d)),
        }
    }
}

/// Modules desired on an edge itself rather than on a route
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeModules<'a> {
    pub tls_termination: Option<&'a crd::EndpointTlsTermination>,
    pub mutual_tls: Option<&'a crd::EndpointMutualTls>,
    pub ip_restriction: Option<&'a crd::EndpointIpPolicy>,
    pub policy: Option<&'a Value>,
}

/// Edge modules as currently reported by the platform
#[derive(Clone, Copy, Debug, Default)]
pub struct ObservedEdgeModules<'a> {
    pub tls_termination: Option<&'a platform::EndpointTlsTermination>,
    pub mutual_tls: Option<&'a platform::EndpointMutualTls>,
    pub ip_restriction: Option<&'a platform::EndpointIpPolicy>,
    pub traffic_policy: Option<&'a platform::EndpointTrafficPolicy>,
}

/// Parsed traffic policy and the deprecations found while auditing it
#[derive(Debug, PartialEq)]
pub struct ParsedPolicy {
    pub payload: platform::EndpointTrafficPolicy,
    pub deprecations: Vec<String>,
}

/// Parse a traffic policy document once
///
/// Accepts either a JSON object or a string holding one. A top-level
/// `enabled` flag is lifted into the payload and stripped from the document.
pub fn parse_traffic_policy(raw: &Value) -> std::result::Result<ParsedPolicy, String> {
    let doc = match raw {
        Value::String(s) => serde_json::from_str::<Value>(s).map_err(|e| e.to_string())?,
        other => other.clone(),
    };
    let Value::Object(mut doc) = doc else {
        return Err("traffic policy must be a JSON object".to_string());
    };

    let mut deprecations = Vec::new();
    if doc.contains_key("inbound") || doc.contains_key("outbound") {
        deprecations.push(
            "Traffic policy uses the legacy inbound/outbound directions; use on_http_request/on_http_response"
                .to_string(),
        );
    }
    let enabled = match doc.remove("enabled") {
        Some(v) => {
            deprecations.push(
                "Traffic policy field 'enabled' is deprecated and will be ignored in the future"
                    .to_string(),
            );
            v.as_bool().unwrap_or(true)
        }
        None => true,
    };

    let value = serde_json::to_string(&Value::Object(doc)).map_err(|e| e.to_string())?;
    Ok(ParsedPolicy {
        payload: platform::EndpointTrafficPolicy {
            enabled: Some(enabled),
            value,
        },
        deprecations,
    })
}

fn same_policy(desired: &platform::EndpointTrafficPolicy, observed: &platform::EndpointTrafficPolicy) -> bool {
    let parse = |s: &str| serde_json::from_str::<Value>(s).unwrap_or(Value::Null);
    desired.enabled == observed.enabled && parse(&desired.value) == parse(&observed.value)
}

fn circuit_breaker_payload(spec: &crd::EndpointCircuitBreaker) -> platform::EndpointCircuitBreaker {
    platform::EndpointCircuitBreaker {
        enabled: Some(true),
        tripped_duration: spec.tripped_duration,
        rolling_window: spec.rolling_window,
        num_buckets: spec.num_buckets,
        volume_threshold: spec.volume_threshold,
        error_threshold_percentage: spec.error_threshold_percentage,
    }
}

fn tls_termination_payload(spec: &crd::EndpointTlsTermination) -> platform::EndpointTlsTermination {
    platform::EndpointTlsTermination {
        enabled: Some(true),
        terminate_at: spec.terminate_at.clone(),
        min_version: spec.min_version.clone(),
    }
}

fn saml_payload(spec: &crd::EndpointSaml) -> platform::EndpointSaml {
    platform::EndpointSaml {
        enabled: Some(true),
        options_passthrough: spec.options_passthrough,
        cookie_prefix: spec.cookie_prefix.clone(),
        inactivity_timeout: spec.inactivity_timeout,
        maximum_duration: spec.maximum_duration,
        idp_metadata: spec.idp_metadata.clone(),
        force_authn: spec.force_authn,
        allow_idp_initiated: spec.allow_idp_initiated,
        authorized_groups: spec.authorized_groups.clone(),
        nameid_format: spec.nameid_format.clone(),
    }
}

/// Runs the module sub-reconcilers against one route or edge
#[derive(Clone)]
pub struct ModuleReconciler {
    ngrok: Arc<dyn NgrokApi>,
    secrets: Arc<dyn SecretResolver>,
    ip_policies: Arc<dyn IpPolicyResolver>,
    events: Arc<dyn EventRecorder>,
}

impl ModuleReconciler {
    pub fn new(
        ngrok: Arc<dyn NgrokApi>,
        secrets: Arc<dyn SecretResolver>,
        ip_policies: Arc<dyn IpPolicyResolver>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            ngrok,
            secrets,
            ip_policies,
            events,
        }
    }

    async fn secret(&self, namespace: &str, key_ref: &SecretKeyRef) -> Result<String> {
        self.secrets.get(namespace, &key_ref.name, &key_ref.key).await
    }

    async fn ip_policy_payload(
        &self,
        namespace: &str,
        spec: &crd::EndpointIpPolicy,
    ) -> Result<platform::EndpointIpPolicyMutate> {
        if let Err(e) = self.ip_policies.validate(namespace, &spec.policies).await {
            warn!("IP restriction in {}: {}, passing unknown names through as IDs", namespace, e);
        }
        let ids = self.ip_policies.resolve(namespace, &spec.policies).await?;
        Ok(platform::EndpointIpPolicyMutate {
            enabled: Some(true),
            ip_policy_ids: ids,
        })
    }

    /// Parse a policy, reporting failures and deprecations as events
    async fn traffic_policy_payload(
        &self,
        regarding: &ObjectReference,
        raw: &Value,
    ) -> Result<platform::EndpointTrafficPolicy> {
        match parse_traffic_policy(raw) {
            Ok(parsed) => {
                for msg in &parsed.deprecations {
                    self.events
                        .publish(regarding.clone(), EventType::Warning, reasons::POLICY_DEPRECATION, msg)
                        .await;
                }
                Ok(parsed.payload)
            }
            Err(e) => {
                let msg = format!("Failed to parse traffic policy: {e}");
                self.events
                    .publish(
                        regarding.clone(),
                        EventType::Warning,
                        reasons::TRAFFIC_POLICY_PARSE_FAILED,
                        &msg,
                    )
                    .await;
                Err(Error::InvalidConfiguration(msg))
            }
        }
    }

    async fn oauth_payload(
        &self,
        namespace: &str,
        spec: &crd::EndpointOAuth,
    ) -> Result<Option<platform::EndpointOAuth>> {
        let Some((kind, provider)) = spec.provided() else {
            return Ok(None);
        };
        let secret = match provider.client_secret_key_ref() {
            Some(key_ref) => Some(self.secret(namespace, key_ref).await?),
            None => None,
        };
        Ok(Some(provider.to_payload(kind, secret)))
    }

    async fn oidc_payload(
        &self,
        namespace: &str,
        spec: &crd::EndpointOidc,
    ) -> Result<platform::EndpointOidc> {
        let key_ref = spec.client_secret.as_ref().ok_or_else(|| {
            Error::InvalidConfiguration("OIDC requires a client secret".to_string())
        })?;
        let client_secret = self.secret(namespace, key_ref).await?;
        Ok(platform::EndpointOidc {
            enabled: Some(true),
            options_passthrough: spec.options_passthrough,
            cookie_prefix: spec.cookie_prefix.clone(),
            inactivity_timeout: spec.inactivity_timeout,
            maximum_duration: spec.maximum_duration,
            issuer: spec.issuer.clone(),
            client_id: spec.client_id.clone(),
            client_secret,
            scopes: spec.scopes.clone(),
        })
    }

    async fn webhook_payload(
        &self,
        namespace: &str,
        spec: &crd::EndpointWebhookVerification,
    ) -> Result<platform::EndpointWebhookValidation> {
        let secret = if SECRETLESS_WEBHOOK_PROVIDERS.contains(&spec.provider.as_str()) {
            String::new()
        } else {
            let key_ref = spec.secret.as_ref().ok_or_else(|| {
                Error::InvalidConfiguration(format!(
                    "webhook verification for provider {} requires a secret",
                    spec.provider
                ))
            })?;
            self.secret(namespace, key_ref).await?
        };
        Ok(platform::EndpointWebhookValidation {
            enabled: Some(true),
            provider: spec.provider.clone(),
            secret,
        })
    }

    async fn apply_route(
        &self,
        edge_id: &str,
        route_id: &str,
        kind: RouteModuleKind,
        plan: Plan<RouteModule>,
    ) -> Result<()> {
        match plan {
            Plan::Keep => Ok(()),
            Plan::Delete => {
                info!("Removing {} module from route {}", kind.path_segment(), route_id);
                Ok(self.ngrok.delete_route_module(edge_id, route_id, kind).await?)
            }
            Plan::Replace(module) => {
                info!("Applying {} module to route {}", kind.path_segment(), route_id);
                Ok(self.ngrok.replace_route_module(edge_id, route_id, &module).await?)
            }
        }
    }

    async fn apply_edge(
        &self,
        edge: EdgeKind,
        edge_id: &str,
        kind: EdgeModuleKind,
        plan: Plan<EdgeModule>,
    ) -> Result<()> {
        match plan {
            Plan::Keep => Ok(()),
            Plan::Delete => {
                info!("Removing {} module from edge {}", kind.path_segment(), edge_id);
                Ok(self.ngrok.delete_edge_module(edge, edge_id, kind).await?)
            }
            Plan::Replace(module) => {
                info!("Applying {} module to edge {}", kind.path_segment(), edge_id);
                Ok(self.ngrok.replace_edge_module(edge, edge_id, &module).await?)
            }
        }
    }

    /// Converge every route module, in a fixed order
    pub async fn reconcile_route(
        &self,
        regarding: &ObjectReference,
        namespace: &str,
        edge_id: &str,
        route: &HttpsEdgeRoute,
        spec: &HttpsEdgeRouteSpec,
    ) -> Result<()> {
        let route_id = route.id.as_str();
        debug!("Reconciling modules of route {} ({})", route.match_, route_id);

        let plan = Plan::new(
            spec.circuit_breaker.as_ref().map(circuit_breaker_payload),
            route.circuit_breaker.as_ref(),
            |d, o| d == o,
            RouteModule::CircuitBreaker,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::CircuitBreaker, plan)
            .await?;

        let plan = Plan::new(
            spec.compression.as_ref().map(|c| platform::EndpointCompression {
                enabled: Some(c.enabled),
            }),
            route.compression.as_ref(),
            |d, o| d == o,
            RouteModule::Compression,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::Compression, plan)
            .await?;

        let desired = match &spec.ip_restriction {
            Some(r) => Some(self.ip_policy_payload(namespace, r).await?),
            None => None,
        };
        let plan = Plan::new(
            desired,
            route.ip_restriction.as_ref(),
            |d, o| d.matches(o),
            RouteModule::IpRestriction,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::IpRestriction, plan)
            .await?;

        let headers = spec.headers.as_ref();
        let plan = Plan::new(
            headers
                .and_then(|h| h.request.as_ref())
                .map(|r| platform::EndpointRequestHeaders {
                    enabled: Some(true),
                    add: r.add.clone(),
                    remove: r.remove.clone(),
                }),
            route.request_headers.as_ref(),
            |d, o| d == o,
            RouteModule::RequestHeaders,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::RequestHeaders, plan)
            .await?;

        let plan = Plan::new(
            headers
                .and_then(|h| h.response.as_ref())
                .map(|r| platform::EndpointResponseHeaders {
                    enabled: Some(true),
                    add: r.add.clone(),
                    remove: r.remove.clone(),
                }),
            route.response_headers.as_ref(),
            |d, o| d == o,
            RouteModule::ResponseHeaders,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::ResponseHeaders, plan)
            .await?;

        let desired = match &spec.oauth {
            Some(o) => self.oauth_payload(namespace, o).await?,
            None => None,
        };
        let plan = Plan::new(
            desired,
            route.oauth.as_ref(),
            |d, o| d.redacted() == o.redacted(),
            RouteModule::OAuth,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::OAuth, plan)
            .await?;

        let desired = match &spec.oidc {
            Some(o) => Some(self.oidc_payload(namespace, o).await?),
            None => None,
        };
        let plan = Plan::new(
            desired,
            route.oidc.as_ref(),
            |d, o| d.redacted() == o.redacted(),
            RouteModule::Oidc,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::Oidc, plan)
            .await?;

        let plan = Plan::new(
            spec.saml.as_ref().map(saml_payload),
            route.saml.as_ref(),
            |d, o| d == o,
            RouteModule::Saml,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::Saml, plan)
            .await?;

        let desired = match &spec.webhook_verification {
            Some(w) => Some(self.webhook_payload(namespace, w).await?),
            None => None,
        };
        let plan = Plan::new(
            desired,
            route.webhook_verification.as_ref(),
            |d, o| d.redacted() == o.redacted(),
            RouteModule::WebhookVerification,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::WebhookVerification, plan)
            .await?;

        let desired = match &spec.policy {
            Some(p) => Some(self.traffic_policy_payload(regarding, p).await?),
            None => None,
        };
        let plan = Plan::new(
            desired,
            route.traffic_policy.as_ref(),
            same_policy,
            RouteModule::TrafficPolicy,
        );
        self.apply_route(edge_id, route_id, RouteModuleKind::TrafficPolicy, plan)
            .await
    }

    /// Converge the modules attached to an edge itself
    ///
    /// Callers only populate the modules their edge kind supports.
    pub async fn reconcile_edge(
        &self,
        regarding: &ObjectReference,
        namespace: &str,
        edge: EdgeKind,
        edge_id: &str,
        desired: EdgeModules<'_>,
        observed: ObservedEdgeModules<'_>,
    ) -> Result<()> {
        let plan = Plan::new(
            desired.tls_termination.map(tls_termination_payload),
            observed.tls_termination,
            |d, o| d == o,
            EdgeModule::TlsTermination,
        );
        self.apply_edge(edge, edge_id, EdgeModuleKind::TlsTermination, plan)
            .await?;

        let plan = Plan::new(
            desired.mutual_tls.map(|m| platform::EndpointMutualTlsMutate {
                enabled: Some(true),
                certificate_authority_ids: m.certificate_authorities.clone(),
            }),
            observed.mutual_tls,
            |d, o| d.matches(o),
            EdgeModule::MutualTls,
        );
        self.apply_edge(edge, edge_id, EdgeModuleKind::MutualTls, plan)
            .await?;

        let ip = match desired.ip_restriction {
            Some(r) => Some(self.ip_policy_payload(namespace, r).await?),
            None => None,
        };
        let plan = Plan::new(ip, observed.ip_restriction, |d, o| d.matches(o), EdgeModule::IpRestriction);
        self.apply_edge(edge, edge_id, EdgeModuleKind::IpRestriction, plan)
            .await?;

        let policy = match desired.policy {
            Some(p) => Some(self.traffic_policy_payload(regarding, p).await?),
            None => None,
        };
        let plan = Plan::new(policy, observed.traffic_policy, same_policy, EdgeModule::TrafficPolicy);
        self.apply_edge(edge, edge_id, EdgeModuleKind::TrafficPolicy, plan)
            .await
    }
}
