//! Shared types used across the ngrok Custom Resource Definitions
//!
//! Route modules, backend selectors, secret references and status conditions
//! live here so that edges, module sets and the derivation pipeline agree on
//! a single representation.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::platform;

/// Reclaim policy applied to remote objects when the owning resource is deleted
///
/// # Examples
///
/// ```rust
/// use ngrok_operator::crd::ReclaimPolicy;
///
/// assert_eq!(ReclaimPolicy::default(), ReclaimPolicy::Delete);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ReclaimPolicy {
    /// Delete the remote object with the resource
    #[default]
    Delete,
    /// Leave the remote object in place
    Retain,
}

/// Reference to a key within a Secret in the same namespace
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Label selector joining an edge or route to agent tunnels
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelGroupBackend {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelGroupBackendStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

// ── Route and edge modules ─────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointCompression {
    #[serde(default)]
    pub enabled: bool,
}

/// IP restriction by IP policy name or platform ID
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointIpPolicy {
    #[serde(default)]
    pub policies: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHeaderChanges {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<EndpointHeaderChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<EndpointHeaderChanges>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointCircuitBreaker {
    /// Seconds the breaker stays open once tripped
    #[serde(default)]
    pub tripped_duration: u32,
    /// Statistical rolling window in seconds
    #[serde(default)]
    pub rolling_window: u32,
    #[serde(default)]
    pub num_buckets: u32,
    #[serde(default)]
    pub volume_threshold: u32,
    /// Error ratio (0.0 to 1.0) above which the breaker trips
    #[serde(default)]
    pub error_threshold_percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTlsTermination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMutualTls {
    /// Certificate authority IDs
    #[serde(default)]
    pub certificate_authorities: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointWebhookVerification {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretKeyRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointOidc {
    #[serde(default)]
    pub options_passthrough: bool,
    #[serde(default)]
    pub cookie_prefix: String,
    #[serde(default)]
    pub inactivity_timeout: u32,
    #[serde(default)]
    pub maximum_duration: u32,
    pub issuer: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretKeyRef>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSaml {
    #[serde(default)]
    pub options_passthrough: bool,
    #[serde(default)]
    pub cookie_prefix: String,
    #[serde(default)]
    pub inactivity_timeout: u32,
    #[serde(default)]
    pub maximum_duration: u32,
    #[serde(default)]
    pub idp_metadata: String,
    #[serde(default)]
    pub force_authn: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_idp_initiated: Option<bool>,
    #[serde(default)]
    pub authorized_groups: Vec<String>,
    #[serde(default)]
    pub nameid_format: String,
}

/// Settings shared by every OAuth identity provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuthProviderSpec {
    #[serde(default)]
    pub options_passthrough: bool,
    #[serde(default)]
    pub cookie_prefix: String,
    #[serde(default)]
    pub inactivity_timeout: u32,
    #[serde(default)]
    pub maximum_duration: u32,
    #[serde(default)]
    pub auth_check_interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretKeyRef>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub email_addresses: Vec<String>,
    #[serde(default)]
    pub email_domains: Vec<String>,
    /// GitHub only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<String>,
    /// GitHub only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OAuthProviderKind {
    Google,
    Github,
    Gitlab,
    Amazon,
    Facebook,
    Microsoft,
    Twitch,
    Linkedin,
}

/// OAuth with exactly one of the supported identity providers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointOAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<OAuthProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<OAuthProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<OAuthProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amazon: Option<OAuthProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook: Option<OAuthProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microsoft: Option<OAuthProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitch: Option<OAuthProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<OAuthProviderSpec>,
}

impl EndpointOAuth {
    fn providers(&self) -> [(OAuthProviderKind, Option<&OAuthProviderSpec>); 8] {
        [
            (OAuthProviderKind::Google, self.google.as_ref()),
            (OAuthProviderKind::Github, self.github.as_ref()),
            (OAuthProviderKind::Gitlab, self.gitlab.as_ref()),
            (OAuthProviderKind::Amazon, self.amazon.as_ref()),
            (OAuthProviderKind::Facebook, self.facebook.as_ref()),
            (OAuthProviderKind::Microsoft, self.microsoft.as_ref()),
            (OAuthProviderKind::Twitch, self.twitch.as_ref()),
            (OAuthProviderKind::Linkedin, self.linkedin.as_ref()),
        ]
    }

    /// The first configured provider, in table order
    pub fn provided(&self) -> Option<(OAuthProviderKind, &OAuthProviderSpec)> {
        self.providers()
            .into_iter()
            .find_map(|(kind, spec)| spec.map(|s| (kind, s)))
    }
}

impl OAuthProviderSpec {
    pub fn client_secret_key_ref(&self) -> Option<&SecretKeyRef> {
        self.client_secret.as_ref()
    }

    pub fn to_payload(
        &self,
        kind: OAuthProviderKind,
        client_secret: Option<String>,
    ) -> platform::EndpointOAuth {
        let config = platform::OAuthProviderConfig {
            client_id: self.client_id.clone(),
            client_secret,
            scopes: self.scopes.clone(),
            email_addresses: self.email_addresses.clone(),
            email_domains: self.email_domains.clone(),
            teams: self.teams.clone(),
            organizations: self.organizations.clone(),
        };
        let provider = match kind {
            OAuthProviderKind::Google => platform::EndpointOAuthProvider::Google(config),
            OAuthProviderKind::Github => platform::EndpointOAuthProvider::Github(config),
            OAuthProviderKind::Gitlab => platform::EndpointOAuthProvider::Gitlab(config),
            OAuthProviderKind::Amazon => platform::EndpointOAuthProvider::Amazon(config),
            OAuthProviderKind::Facebook => platform::EndpointOAuthProvider::Facebook(config),
            OAuthProviderKind::Microsoft => platform::EndpointOAuthProvider::Microsoft(config),
            OAuthProviderKind::Twitch => platform::EndpointOAuthProvider::Twitch(config),
            OAuthProviderKind::Linkedin => platform::EndpointOAuthProvider::Linkedin(config),
        };
        platform::EndpointOAuth {
            enabled: Some(true),
            provider,
            options_passthrough: self.options_passthrough,
            cookie_prefix: self.cookie_prefix.clone(),
            inactivity_timeout: self.inactivity_timeout,
            maximum_duration: self.maximum_duration,
            auth_check_interval: self.auth_check_interval,
        }
    }
}

/// Bundle of optional route modules
///
/// `a.merge(b)` lets every module set in `b` override the one in `a`; modules
/// absent from `b` keep their value from `a`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSetModules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<EndpointCircuitBreaker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<EndpointCompression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<EndpointHeaders>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_restriction: Option<EndpointIpPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<EndpointOAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<EndpointOidc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saml: Option<EndpointSaml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_termination: Option<EndpointTlsTermination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutual_tls: Option<EndpointMutualTls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_verification: Option<EndpointWebhookVerification>,
}

impl ModuleSetModules {
    pub fn merge(&mut self, other: &ModuleSetModules) {
        fn take<T: Clone>(into: &mut Option<T>, from: &Option<T>) {
            if from.is_some() {
                into.clone_from(from);
            }
        }
        take(&mut self.circuit_breaker, &other.circuit_breaker);
        take(&mut self.compression, &other.compression);
        take(&mut self.headers, &other.headers);
        take(&mut self.ip_restriction, &other.ip_restriction);
        take(&mut self.oauth, &other.oauth);
        take(&mut self.oidc, &other.oidc);
        take(&mut self.saml, &other.saml);
        take(&mut self.tls_termination, &other.tls_termination);
        take(&mut self.mutual_tls, &other.mutual_tls);
        take(&mut self.webhook_verification, &other.webhook_verification);
    }
}

// ── Conditions ─────────────────────────────────────────────────────────────

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "DomainCreated", "CertificateReady")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation that the condition was set based upon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Set the observed generation for this condition
    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }
}
