//! IPPolicy Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

pub const IP_POLICY_ACTION_ALLOW: &str = "allow";
pub const IP_POLICY_ACTION_DENY: &str = "deny";

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ingress.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "IPPolicy",
    root = "IpPolicy",
    namespaced,
    status = "IpPolicyStatus",
    shortname = "ippolicy",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IpPolicySpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: String,

    #[serde(default)]
    pub rules: Vec<IpPolicyRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpPolicyRule {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    pub cidr: String,
    /// `allow` or `deny`
    pub action: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpPolicyStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub rules: Vec<IpPolicyRuleStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpPolicyRuleStatus {
    pub id: String,
    pub cidr: String,
    pub action: String,
}
