//! TLSEdge Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, EndpointIpPolicy, EndpointMutualTls, EndpointTlsTermination, TunnelGroupBackend,
    TunnelGroupBackendStatus,
};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    derive = "PartialEq",
    group = "ingress.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "TLSEdge",
    root = "TlsEdge",
    namespaced,
    status = "TlsEdgeStatus",
    shortname = "tlsedge",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"Hostports","type":"string","jsonPath":".status.hostports"}"#,
    printcolumn = r#"{"name":"Backend ID","type":"string","jsonPath":".status.backend.id"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TlsEdgeSpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: String,

    pub hostports: Vec<String>,

    pub backend: TunnelGroupBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_restriction: Option<EndpointIpPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_termination: Option<EndpointTlsTermination>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutual_tls: Option<EndpointMutualTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsEdgeStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default)]
    pub hostports: Vec<String>,
    #[serde(default)]
    pub backend: TunnelGroupBackendStatus,
    /// Host to CNAME target for custom domains
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cname_targets: BTreeMap<String, String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
