//! TCPEdge Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, EndpointIpPolicy, TunnelGroupBackend, TunnelGroupBackendStatus};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    derive = "PartialEq",
    group = "ingress.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "TCPEdge",
    root = "TcpEdge",
    namespaced,
    status = "TcpEdgeStatus",
    shortname = "tcpedge",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"Hostports","type":"string","jsonPath":".status.hostports"}"#,
    printcolumn = r#"{"name":"Backend ID","type":"string","jsonPath":".status.backend.id"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TcpEdgeSpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: String,

    pub backend: TunnelGroupBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_restriction: Option<EndpointIpPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpEdgeStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Reserved `host:port` the edge listens on
    #[serde(default)]
    pub hostports: Vec<String>,
    #[serde(default)]
    pub backend: TunnelGroupBackendStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
