//! Records returned by the ngrok API and the payloads sent to it
//!
//! Field names follow the API's snake_case wire format. Every module payload
//! derives `PartialEq` so sub-reconcilers can compare desired and observed
//! attachments without a remote write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reference to another API object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub id: String,
    #[serde(default)]
    pub uri: String,
}

impl Ref {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: String::new(),
        }
    }
}

// ── Reserved domains ───────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservedDomain {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    pub domain: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub cname_target: Option<String>,
    #[serde(default)]
    pub acme_challenge_cname_target: Option<String>,
    #[serde(default)]
    pub certificate: Option<Ref>,
    #[serde(default)]
    pub certificate_management_policy: Option<CertificateManagementPolicy>,
    #[serde(default)]
    pub certificate_management_status: Option<CertificateManagementStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateManagementPolicy {
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub private_key_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateManagementStatus {
    #[serde(default)]
    pub renews_at: Option<String>,
    #[serde(default)]
    pub provisioning_job: Option<ProvisioningJob>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningJob {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub retries_at: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReservedDomainCreate {
    pub domain: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
    pub description: String,
    pub metadata: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReservedDomainUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

// ── Reserved TCP addresses ─────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedAddr {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    pub addr: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReservedAddrCreate {
    pub description: String,
    pub metadata: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub region: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReservedAddrUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

// ── Tunnel group backends ──────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelGroupBackend {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TunnelGroupBackendCreate {
    pub description: String,
    pub metadata: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TunnelGroupBackendUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Backend attachment as reported on edges and routes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointBackend {
    #[serde(default)]
    pub enabled: Option<bool>,
    pub backend: Ref,
}

/// Backend attachment as sent on create/update
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EndpointBackendMutate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub backend_id: String,
}

impl EndpointBackendMutate {
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            enabled: Some(true),
            backend_id: backend_id.into(),
        }
    }
}

// ── Edges ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpsEdge {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub hostports: Vec<String>,
    #[serde(default)]
    pub mutual_tls: Option<EndpointMutualTls>,
    #[serde(default)]
    pub tls_termination: Option<EndpointTlsTermination>,
    #[serde(default)]
    pub routes: Vec<HttpsEdgeRoute>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HttpsEdgeCreate {
    pub description: String,
    pub metadata: String,
    pub hostports: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HttpsEdgeUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostports: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpsEdgeRoute {
    pub id: String,
    #[serde(default)]
    pub edge_id: String,
    #[serde(default)]
    pub uri: String,
    pub match_type: String,
    #[serde(rename = "match")]
    pub match_: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub backend: Option<EndpointBackend>,
    #[serde(default)]
    pub ip_restriction: Option<EndpointIpPolicy>,
    #[serde(default)]
    pub circuit_breaker: Option<EndpointCircuitBreaker>,
    #[serde(default)]
    pub compression: Option<EndpointCompression>,
    #[serde(default)]
    pub request_headers: Option<EndpointRequestHeaders>,
    #[serde(default)]
    pub response_headers: Option<EndpointResponseHeaders>,
    #[serde(default)]
    pub webhook_verification: Option<EndpointWebhookValidation>,
    #[serde(default)]
    pub oauth: Option<EndpointOAuth>,
    #[serde(default)]
    pub saml: Option<EndpointSaml>,
    #[serde(default)]
    pub oidc: Option<EndpointOidc>,
    #[serde(default)]
    pub traffic_policy: Option<EndpointTrafficPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HttpsEdgeRouteCreate {
    #[serde(skip)]
    pub edge_id: String,
    pub match_type: String,
    #[serde(rename = "match")]
    pub match_: String,
    pub description: String,
    pub metadata: String,
    pub backend: Option<EndpointBackendMutate>,
}

/// A `None` backend detaches the route from any tunnel group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HttpsEdgeRouteUpdate {
    #[serde(skip)]
    pub edge_id: String,
    #[serde(skip)]
    pub id: String,
    pub match_type: String,
    #[serde(rename = "match")]
    pub match_: String,
    pub description: String,
    pub metadata: String,
    pub backend: Option<EndpointBackendMutate>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsEdge {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub hostports: Vec<String>,
    #[serde(default)]
    pub backend: Option<EndpointBackend>,
    #[serde(default)]
    pub ip_restriction: Option<EndpointIpPolicy>,
    #[serde(default)]
    pub mutual_tls: Option<EndpointMutualTls>,
    #[serde(default)]
    pub tls_termination: Option<EndpointTlsTermination>,
    #[serde(default)]
    pub traffic_policy: Option<EndpointTrafficPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TlsEdgeCreate {
    pub description: String,
    pub metadata: String,
    pub hostports: Vec<String>,
    pub backend: Option<EndpointBackendMutate>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TlsEdgeUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostports: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<EndpointBackendMutate>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpEdge {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub hostports: Vec<String>,
    #[serde(default)]
    pub backend: Option<EndpointBackend>,
    #[serde(default)]
    pub ip_restriction: Option<EndpointIpPolicy>,
    #[serde(default)]
    pub traffic_policy: Option<EndpointTrafficPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TcpEdgeCreate {
    pub description: String,
    pub metadata: String,
    pub hostports: Vec<String>,
    pub backend: Option<EndpointBackendMutate>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TcpEdgeUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostports: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<EndpointBackendMutate>,
}

// ── IP policies ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPolicy {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IpPolicyCreate {
    pub description: String,
    pub metadata: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IpPolicyUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPolicyRule {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    pub cidr: String,
    pub action: String,
    #[serde(default)]
    pub ip_policy: Ref,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IpPolicyRuleCreate {
    pub description: String,
    pub metadata: String,
    pub cidr: String,
    pub action: String,
    pub ip_policy_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IpPolicyRuleUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

// ── Module payloads ────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCompression {
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// IP restriction as reported by the API
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIpPolicy {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub ip_policies: Vec<Ref>,
}

/// IP restriction as sent to the API
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIpPolicyMutate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub ip_policy_ids: Vec<String>,
}

impl EndpointIpPolicyMutate {
    /// Compares against the observed attachment by policy id set
    pub fn matches(&self, observed: &EndpointIpPolicy) -> bool {
        let mut desired: Vec<&str> = self.ip_policy_ids.iter().map(String::as_str).collect();
        let mut current: Vec<&str> = observed.ip_policies.iter().map(|r| r.id.as_str()).collect();
        desired.sort_unstable();
        current.sort_unstable();
        self.enabled == observed.enabled && desired == current
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRequestHeaders {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub add: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointResponseHeaders {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub add: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointCircuitBreaker {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tripped_duration: u32,
    #[serde(default)]
    pub rolling_window: u32,
    #[serde(default)]
    pub num_buckets: u32,
    #[serde(default)]
    pub volume_threshold: u32,
    #[serde(default)]
    pub error_threshold_percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub email_addresses: Vec<String>,
    #[serde(default)]
    pub email_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
}

/// Exactly one identity provider, serialized as `{"<provider>": {...}}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointOAuthProvider {
    Google(OAuthProviderConfig),
    Github(OAuthProviderConfig),
    Gitlab(OAuthProviderConfig),
    Amazon(OAuthProviderConfig),
    Facebook(OAuthProviderConfig),
    Microsoft(OAuthProviderConfig),
    Twitch(OAuthProviderConfig),
    Linkedin(OAuthProviderConfig),
}

impl EndpointOAuthProvider {
    fn config_mut(&mut self) -> &mut OAuthProviderConfig {
        match self {
            Self::Google(c)
            | Self::Github(c)
            | Self::Gitlab(c)
            | Self::Amazon(c)
            | Self::Facebook(c)
            | Self::Microsoft(c)
            | Self::Twitch(c)
            | Self::Linkedin(c) => c,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOAuth {
    #[serde(default)]
    pub enabled: Option<bool>,
    pub provider: EndpointOAuthProvider,
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
}

impl EndpointOAuth {
    /// Copy without the client secret, which the platform never returns
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.provider.config_mut().client_secret = None;
        copy
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOidc {
    #[serde(default)]
    pub enabled: Option<bool>,
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
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl EndpointOidc {
    pub fn redacted(&self) -> Self {
        Self {
            client_secret: String::new(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSaml {
    #[serde(default)]
    pub enabled: Option<bool>,
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
    #[serde(default)]
    pub allow_idp_initiated: Option<bool>,
    #[serde(default)]
    pub authorized_groups: Vec<String>,
    #[serde(default)]
    pub nameid_format: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointWebhookValidation {
    #[serde(default)]
    pub enabled: Option<bool>,
    pub provider: String,
    #[serde(default)]
    pub secret: String,
}

impl EndpointWebhookValidation {
    pub fn redacted(&self) -> Self {
        Self {
            secret: String::new(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTlsTermination {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_at: Option<String>,
    #[serde(default)]
    pub min_version: Option<String>,
}

/// Mutual TLS as reported by the API
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMutualTls {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub certificate_authorities: Vec<Ref>,
}

/// Mutual TLS as sent to the API
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMutualTlsMutate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub certificate_authority_ids: Vec<String>,
}

impl EndpointMutualTlsMutate {
    pub fn matches(&self, observed: &EndpointMutualTls) -> bool {
        let mut desired: Vec<&str> = self
            .certificate_authority_ids
            .iter()
            .map(String::as_str)
            .collect();
        let mut current: Vec<&str> = observed
            .certificate_authorities
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        desired.sort_unstable();
        current.sort_unstable();
        self.enabled == observed.enabled && desired == current
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTrafficPolicy {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub value: String,
}

// ── Module dispatch ────────────────────────────────────────────────────────

/// Route-level module attachment
#[derive(Clone, Debug, PartialEq)]
pub enum RouteModule {
    CircuitBreaker(EndpointCircuitBreaker),
    Compression(EndpointCompression),
    IpRestriction(EndpointIpPolicyMutate),
    RequestHeaders(EndpointRequestHeaders),
    ResponseHeaders(EndpointResponseHeaders),
    OAuth(EndpointOAuth),
    Oidc(EndpointOidc),
    Saml(EndpointSaml),
    WebhookVerification(EndpointWebhookValidation),
    TrafficPolicy(EndpointTrafficPolicy),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteModuleKind {
    CircuitBreaker,
    Compression,
    IpRestriction,
    RequestHeaders,
    ResponseHeaders,
    OAuth,
    Oidc,
    Saml,
    WebhookVerification,
    TrafficPolicy,
}

impl RouteModuleKind {
    /// Path segment of the module under `/edges/https/{edge}/routes/{route}/`
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::CircuitBreaker => "circuit_breaker",
            Self::Compression => "compression",
            Self::IpRestriction => "ip_restriction",
            Self::RequestHeaders => "request_headers",
            Self::ResponseHeaders => "response_headers",
            Self::OAuth => "oauth",
            Self::Oidc => "oidc",
            Self::Saml => "saml",
            Self::WebhookVerification => "webhook_verification",
            Self::TrafficPolicy => "traffic_policy",
        }
    }
}

impl RouteModule {
    pub fn kind(&self) -> RouteModuleKind {
        match self {
            Self::CircuitBreaker(_) => RouteModuleKind::CircuitBreaker,
            Self::Compression(_) => RouteModuleKind::Compression,
            Self::IpRestriction(_) => RouteModuleKind::IpRestriction,
            Self::RequestHeaders(_) => RouteModuleKind::RequestHeaders,
            Self::ResponseHeaders(_) => RouteModuleKind::ResponseHeaders,
            Self::OAuth(_) => RouteModuleKind::OAuth,
            Self::Oidc(_) => RouteModuleKind::Oidc,
            Self::Saml(_) => RouteModuleKind::Saml,
            Self::WebhookVerification(_) => RouteModuleKind::WebhookVerification,
            Self::TrafficPolicy(_) => RouteModuleKind::TrafficPolicy,
        }
    }

    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::CircuitBreaker(m) => serde_json::to_value(m),
            Self::Compression(m) => serde_json::to_value(m),
            Self::IpRestriction(m) => serde_json::to_value(m),
            Self::RequestHeaders(m) => serde_json::to_value(m),
            Self::ResponseHeaders(m) => serde_json::to_value(m),
            Self::OAuth(m) => serde_json::to_value(m),
            Self::Oidc(m) => serde_json::to_value(m),
            Self::Saml(m) => serde_json::to_value(m),
            Self::WebhookVerification(m) => serde_json::to_value(m),
            Self::TrafficPolicy(m) => serde_json::to_value(m),
        }
    }
}

/// Edge-level module attachment
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeModule {
    TlsTermination(EndpointTlsTermination),
    MutualTls(EndpointMutualTlsMutate),
    IpRestriction(EndpointIpPolicyMutate),
    TrafficPolicy(EndpointTrafficPolicy),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeModuleKind {
    TlsTermination,
    MutualTls,
    IpRestriction,
    TrafficPolicy,
}

impl EdgeModuleKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::TlsTermination => "tls_termination",
            Self::MutualTls => "mutual_tls",
            Self::IpRestriction => "ip_restriction",
            Self::TrafficPolicy => "traffic_policy",
        }
    }
}

impl EdgeModule {
    pub fn kind(&self) -> EdgeModuleKind {
        match self {
            Self::TlsTermination(_) => EdgeModuleKind::TlsTermination,
            Self::MutualTls(_) => EdgeModuleKind::MutualTls,
            Self::IpRestriction(_) => EdgeModuleKind::IpRestriction,
            Self::TrafficPolicy(_) => EdgeModuleKind::TrafficPolicy,
        }
    }

    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::TlsTermination(m) => serde_json::to_value(m),
            Self::MutualTls(m) => serde_json::to_value(m),
            Self::IpRestriction(m) => serde_json::to_value(m),
            Self::TrafficPolicy(m) => serde_json::to_value(m),
        }
    }
}

/// Edge flavour, used to address edge-level modules
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Https,
    Tls,
    Tcp,
}

impl EdgeKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Tls => "tls",
            Self::Tcp => "tcp",
        }
    }
}
