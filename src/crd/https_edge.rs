//! HTTPSEdge Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, EndpointCircuitBreaker, EndpointCompression, EndpointHeaders, EndpointIpPolicy,
    EndpointMutualTls, EndpointOAuth, EndpointOidc, EndpointSaml, EndpointTlsTermination,
    EndpointWebhookVerification, TunnelGroupBackend, TunnelGroupBackendStatus,
};

pub const MATCH_TYPE_PATH_PREFIX: &str = "path_prefix";
pub const MATCH_TYPE_EXACT_PATH: &str = "exact_path";

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ingress.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "HTTPSEdge",
    root = "HttpsEdge",
    namespaced,
    status = "HttpsEdgeStatus",
    shortname = "httpsedge",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"Hostports","type":"string","jsonPath":".spec.hostports"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HttpsEdgeSpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: String,

    pub hostports: Vec<String>,

    /// Routes keyed by their `match` string
    #[serde(default)]
    pub routes: Vec<HttpsEdgeRouteSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_termination: Option<EndpointTlsTermination>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutual_tls: Option<EndpointMutualTls>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpsEdgeRouteSpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: String,

    /// Either `exact_path` or `path_prefix`
    pub match_type: String,

    #[serde(rename = "match")]
    pub match_: String,

    pub backend: TunnelGroupBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<EndpointCircuitBreaker>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<EndpointCompression>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_restriction: Option<EndpointIpPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<EndpointHeaders>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<EndpointOAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<EndpointOidc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saml: Option<EndpointSaml>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_verification: Option<EndpointWebhookVerification>,

    /// Raw traffic policy document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpsEdgeStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default)]
    pub routes: Vec<HttpsEdgeRouteStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpsEdgeRouteStatus {
    pub id: String,
    #[serde(default)]
    pub uri: String,
    #[serde(rename = "match")]
    pub match_: String,
    pub match_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<TunnelGroupBackendStatus>,
}
