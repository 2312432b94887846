//! Tunnel Custom Resource Definition
//!
//! Tunnels are consumed by the agent: each forwards label-matched traffic to
//! an in-cluster address.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    derive = "PartialEq",
    group = "ingress.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "Tunnel",
    namespaced,
    shortname = "tunnel",
    printcolumn = r#"{"name":"Forwards To","type":"string","jsonPath":".spec.forwardsTo"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSpec {
    /// `<service>.<namespace>.svc.cluster.local:<port>`
    pub forwards_to: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<TunnelBackend>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelBackend {
    /// Upstream protocol, e.g. `HTTP2` or `HTTPS`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

/// Forwarding address of a tunnel to a cluster service
pub fn forwards_to(service: &str, namespace: &str, port: i32) -> String {
    format!("{service}.{namespace}.svc.cluster.local:{port}")
}
