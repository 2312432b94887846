//! Domain Custom Resource Definition
//!
//! A Domain reserves a hostname on ngrok. Its status mirrors the reserved
//! domain record: CNAME targets, certificate, and certificate provisioning.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ReclaimPolicy};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ingress.k8s.ngrok.com",
    version = "v1alpha1",
    kind = "Domain",
    namespaced,
    status = "DomainStatus",
    shortname = "domain",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"Domain","type":"string","jsonPath":".spec.domain"}"#,
    printcolumn = r#"{"name":"CNAME Target","type":"string","jsonPath":".status.cnameTarget"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    /// Fully qualified hostname to reserve, possibly a wildcard
    pub domain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub metadata: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Present only for custom (non ngrok-managed) domains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname_target: Option<String>,
    /// Present only for wildcard domains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme_challenge_cname_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<DomainCertificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_management_policy: Option<DomainCertificateManagementPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_management_status: Option<DomainCertificateManagementStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainCertificate {
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainCertificateManagementPolicy {
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub private_key_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainCertificateManagementStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renews_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_job: Option<DomainProvisioningJob>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainProvisioningJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries_at: Option<String>,
}

/// Kubernetes resource name for a hostname: `.` becomes `-`, `*` becomes `wildcard`
///
/// # Examples
///
/// ```rust
/// use ngrok_operator::crd::hyphenate_host;
///
/// assert_eq!(hyphenate_host("*.example.com"), "wildcard-example-com");
/// ```
pub fn hyphenate_host(host: &str) -> String {
    host.replace('*', "wildcard").replace('.', "-")
}
