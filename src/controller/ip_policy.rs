//! IPPolicy reconciler: the policy itself plus its rule set

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::base::{BaseController, NgrokResource, RemoteLifecycle};
use super::conditions::{set_condition, CONDITION_TYPE_READY};
use super::ip_policy_rules::RuleDiff;
use super::kube_io::{EventRecorder, ResourceClient};
use super::requeue::ReconcileOutcome;
use crate::crd::{IpPolicy, IpPolicyRuleStatus, IpPolicyStatus};
use crate::error::{Error, Result};
use crate::platform::{
    self, collect_all, IpPolicyCreate, IpPolicyRuleCreate, IpPolicyRuleUpdate, IpPolicyUpdate,
    NgrokApi,
};

pub const CONDITION_IP_POLICY_CREATED: &str = "IPPolicyCreated";
pub const CONDITION_RULES_CONFIGURED: &str = "RulesConfigured";

pub const REASON_IP_POLICY_CREATED: &str = "IPPolicyCreated";
pub const REASON_RULES_CONFIGURED: &str = "RulesConfigured";
pub const REASON_INVALID_CIDR: &str = "IPPolicyInvalidCIDR";
pub const REASON_RULES_FAILED: &str = "IPPolicyRulesConfigurationError";
pub const REASON_IP_POLICY_ACTIVE: &str = "IPPolicyActive";

impl NgrokResource for IpPolicy {
    fn status_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Reject the rule set if any CIDR does not parse
pub fn validate_cidrs(policy: &IpPolicy) -> Result<()> {
    let invalid: Vec<&str> = policy
        .spec
        .rules
        .iter()
        .filter(|r| r.cidr.parse::<IpNet>().is_err())
        .map(|r| r.cidr.as_str())
        .collect();
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidCidr(invalid.join(", ")))
    }
}

/// Metadata stored on a remote IP policy: the owning object plus the user's own metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOwner {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,
}

impl PolicyOwner {
    pub fn of(policy: &IpPolicy) -> Self {
        Self {
            namespace: policy.namespace().unwrap_or_default(),
            name: policy.name_any(),
            metadata: policy.spec.metadata.clone(),
        }
    }

    pub fn matches(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }

    /// Owner parsed from a remote policy, if it carries one
    pub fn parse(metadata: &str) -> Option<Self> {
        serde_json::from_str(metadata).ok()
    }

    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub struct IpPolicyReconciler {
    base: BaseController<IpPolicy>,
    ngrok: Arc<dyn NgrokApi>,
}

impl IpPolicyReconciler {
    pub fn new(
        client: Arc<dyn ResourceClient<IpPolicy>>,
        events: Arc<dyn EventRecorder>,
        ngrok: Arc<dyn NgrokApi>,
    ) -> Self {
        Self {
            base: BaseController::new(client, events),
            ngrok,
        }
    }

    #[instrument(skip(self), fields(kind = "IPPolicy"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        self.base.reconcile(self, namespace, name).await
    }

    async fn write_status(&self, policy: &IpPolicy, status: &IpPolicyStatus) -> Result<()> {
        self.base
            .client
            .patch_status(policy, serde_json::to_value(status)?)
            .await
    }

    async fn apply_rules(&self, policy: &IpPolicy, policy_id: &str) -> Result<Vec<platform::IpPolicyRule>> {
        let remote = collect_all(self.ngrok.list_ip_policy_rules(policy_id)).await?;

        for batch in RuleDiff::new(&remote, &policy.spec.rules) {
            debug!("Applying rule changes for {}", batch.cidr);
            for rule in &batch.delete {
                info!("Deleting ip policy rule {} ({} {})", rule.id, rule.cidr, rule.action);
                match self.ngrok.delete_ip_policy_rule(&rule.id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            for rule in &batch.create {
                info!("Creating ip policy rule {} {}", rule.cidr, rule.action);
                self.ngrok
                    .create_ip_policy_rule(&IpPolicyRuleCreate {
                        description: rule.description.clone(),
                        metadata: rule.metadata.clone(),
                        cidr: rule.cidr.clone(),
                        action: rule.action.clone(),
                        ip_policy_id: policy_id.to_string(),
                    })
                    .await?;
            }
            for (have, want) in &batch.update {
                info!("Updating ip policy rule {}", have.id);
                self.ngrok
                    .update_ip_policy_rule(&IpPolicyRuleUpdate {
                        id: have.id.clone(),
                        description: Some(want.description.clone()),
                        metadata: Some(want.metadata.clone()),
                    })
                    .await?;
            }
        }

        Ok(collect_all(self.ngrok.list_ip_policy_rules(policy_id)).await?)
    }

    async fn sync_policy(
        &self,
        policy: &IpPolicy,
        remote: platform::IpPolicy,
        metadata: &str,
    ) -> Result<platform::IpPolicy> {
        if remote.description == policy.spec.description && remote.metadata == metadata {
            return Ok(remote);
        }
        Ok(self
            .ngrok
            .update_ip_policy(&IpPolicyUpdate {
                id: remote.id.clone(),
                description: Some(policy.spec.description.clone()),
                metadata: Some(metadata.to_string()),
            })
            .await?)
    }

    async fn converge(&self, policy: &IpPolicy, remote: platform::IpPolicy) -> Result<ReconcileOutcome> {
        let generation = policy.metadata.generation;
        let mut status = policy.status.clone().unwrap_or_default();
        status.id.clone_from(&remote.id);
        set_condition(
            &mut status.conditions,
            CONDITION_IP_POLICY_CREATED,
            true,
            REASON_IP_POLICY_CREATED,
            "IP policy exists",
            generation,
        );

        let applied = match validate_cidrs(policy) {
            Ok(()) => self.apply_rules(policy, &remote.id).await,
            Err(e) => Err(e),
        };

        match applied {
            Ok(rules) => {
                status.rules = rules
                    .into_iter()
                    .map(|r| IpPolicyRuleStatus {
                        id: r.id,
                        cidr: r.cidr,
                        action: r.action,
                    })
                    .collect();
                set_condition(&mut status.conditions, CONDITION_RULES_CONFIGURED, true, REASON_RULES_CONFIGURED, "All rules configured", generation);
                set_condition(&mut status.conditions, CONDITION_TYPE_READY, true, REASON_IP_POLICY_ACTIVE, "IP policy is active", generation);
                self.write_status(policy, &status).await?;
                Ok(ReconcileOutcome::Done)
            }
            Err(e) => {
                let reason = match e {
                    Error::InvalidCidr(_) => REASON_INVALID_CIDR,
                    _ => REASON_RULES_FAILED,
                };
                let msg = e.sanitized_message();
                set_condition(&mut status.conditions, CONDITION_RULES_CONFIGURED, false, reason, &msg, generation);
                set_condition(&mut status.conditions, CONDITION_TYPE_READY, false, reason, &msg, generation);
                self.write_status(policy, &status).await?;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl RemoteLifecycle<IpPolicy> for IpPolicyReconciler {
    async fn create(&self, policy: &IpPolicy) -> Result<ReconcileOutcome> {
        let owner = PolicyOwner::of(policy);
        let metadata = owner.encode()?;

        // A create whose status write failed left a policy behind: adopt it
        let adopted = collect_all(self.ngrok.list_ip_policies())
            .await?
            .into_iter()
            .find(|p| PolicyOwner::parse(&p.metadata).is_some_and(|theirs| owner.matches(&theirs)));

        let remote = match adopted {
            Some(remote) => {
                info!("Adopting ip policy {}", remote.id);
                self.sync_policy(policy, remote, &metadata).await?
            }
            None => {
                let remote = self
                    .ngrok
                    .create_ip_policy(&IpPolicyCreate {
                        description: policy.spec.description.clone(),
                        metadata,
                    })
                    .await?;
                info!("Created ip policy {}", remote.id);
                remote
            }
        };
        self.converge(policy, remote).await
    }

    async fn update(&self, policy: &IpPolicy) -> Result<ReconcileOutcome> {
        let id = policy.status_id().unwrap_or_default();
        let remote = self.ngrok.get_ip_policy(id).await?;
        let metadata = PolicyOwner::of(policy).encode()?;
        let remote = self.sync_policy(policy, remote, &metadata).await?;
        self.converge(policy, remote).await
    }

    async fn delete(&self, policy: &IpPolicy) -> Result<()> {
        let id = policy.status_id().unwrap_or_default();
        info!("Deleting ip policy {}", id);
        Ok(self.ngrok.delete_ip_policy(id).await?)
    }

    async fn clear_status_id(&self, policy: &IpPolicy) -> Result<()> {
        self.base
            .client
            .patch_status(policy, json!({ "id": null, "rules": [] }))
            .await
    }
}
