//! NgrokModuleSet and NgrokTrafficPolicy Custom Resource Definitions

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ModuleSetModules;

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ingress.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "NgrokModuleSet",
    namespaced,
    shortname = "nms"
)]
#[serde(rename_all = "camelCase")]
pub struct NgrokModuleSetSpec {
    #[serde(default)]
    pub modules: ModuleSetModules,
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ngrok.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "NgrokTrafficPolicy",
    namespaced,
    shortname = "ntp"
)]
#[serde(rename_all = "camelCase")]
pub struct NgrokTrafficPolicySpec {
    /// Traffic policy document, opaque to the operator
    #[serde(default)]
    pub policy: serde_json::Value,
}
