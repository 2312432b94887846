//! Domain reconciler: reserves the hostname and tracks certificate provisioning

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::base::{BaseController, NgrokResource, Op, RemoteLifecycle};
use super::conditions::{
    find_condition, remove_condition, set_condition, CONDITION_STATUS_FALSE,
    CONDITION_TYPE_PROGRESSING, CONDITION_TYPE_READY,
};
use super::kube_io::{reasons, EventRecorder, EventType, ResourceClient};
use super::requeue::{classify, ReconcileOutcome};
use crate::crd::{
    Condition, Domain, DomainCertificate, DomainCertificateManagementPolicy,
    DomainCertificateManagementStatus, DomainProvisioningJob, DomainStatus, ReclaimPolicy,
};
use crate::error::{Error, Result};
use crate::platform::{
    collect_all, codes, NgrokApi, PlatformError, ReservedDomain, ReservedDomainCreate,
    ReservedDomainUpdate,
};

pub const CONDITION_DOMAIN_CREATED: &str = "DomainCreated";
pub const CONDITION_CERTIFICATE_READY: &str = "CertificateReady";
pub const CONDITION_DNS_CONFIGURED: &str = "DNSConfigured";

pub const REASON_DOMAIN_CREATED: &str = "DomainCreated";
pub const REASON_NGROK_MANAGED: &str = "NgrokManaged";
pub const REASON_DOMAIN_ACTIVE: &str = "DomainActive";
pub const REASON_CERTIFICATE_READY: &str = "CertificateReady";
pub const REASON_DNS_CONFIGURED: &str = "DNSConfigured";
pub const REASON_PROVISIONING_ERROR: &str = "ProvisioningError";
pub const REASON_PROVISIONING: &str = "Provisioning";
pub const REASON_DOMAIN_CREATION_FAILED: &str = "DomainCreationFailed";

impl NgrokResource for Domain {
    fn status_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.id.as_str())
            .filter(|id| !id.is_empty())
    }

    fn reclaim_policy(&self) -> ReclaimPolicy {
        self.spec.reclaim_policy
    }
}

pub struct DomainReconciler {
    base: BaseController<Domain>,
    ngrok: Arc<dyn NgrokApi>,
}

impl DomainReconciler {
    pub fn new(
        client: Arc<dyn ResourceClient<Domain>>,
        events: Arc<dyn EventRecorder>,
        ngrok: Arc<dyn NgrokApi>,
    ) -> Self {
        Self {
            base: BaseController::new(client, events),
            ngrok,
        }
    }

    #[instrument(skip(self), fields(kind = "Domain"))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        self.base.reconcile(self, namespace, name).await
    }

    async fn write_status(&self, domain: &Domain, status: &DomainStatus) -> Result<()> {
        let mut value = serde_json::to_value(status)?;
        // Explicit nulls so a merge patch clears fields the server dropped
        if let Value::Object(map) = &mut value {
            for field in [
                "cnameTarget",
                "acmeChallengeCnameTarget",
                "certificate",
                "certificateManagementPolicy",
                "certificateManagementStatus",
            ] {
                map.entry(field).or_insert(Value::Null);
            }
        }
        self.base.client.patch_status(domain, value).await
    }

    async fn sync_from_record(
        &self,
        domain: &Domain,
        record: &ReservedDomain,
    ) -> Result<ReconcileOutcome> {
        let mut status = domain.status.clone().unwrap_or_default();
        apply_record(&mut status, record);
        update_domain_conditions(&mut status, record, domain.metadata.generation);
        self.write_status(domain, &status).await?;

        if needs_status_follow_up(&status.conditions) {
            debug!("Domain {} still provisioning, scheduling follow-up", domain.name_any());
            Ok(ReconcileOutcome::Backoff)
        } else {
            Ok(ReconcileOutcome::Done)
        }
    }
}

#[async_trait]
impl RemoteLifecycle<Domain> for DomainReconciler {
    async fn create(&self, domain: &Domain) -> Result<ReconcileOutcome> {
        let existing = collect_all(self.ngrok.list_reserved_domains())
            .await?
            .into_iter()
            .find(|d| d.domain == domain.spec.domain);

        let record = match existing {
            Some(record) => {
                info!("Adopting reserved domain {} ({})", record.domain, record.id);
                record
            }
            None => {
                let req = ReservedDomainCreate {
                    domain: domain.spec.domain.clone(),
                    region: domain.spec.region.clone(),
                    description: domain.spec.description.clone(),
                    metadata: domain.spec.metadata.clone(),
                };
                match self.ngrok.create_reserved_domain(&req).await {
                    Ok(record) => {
                        info!("Reserved domain {} ({})", record.domain, record.id);
                        record
                    }
                    Err(e) => {
                        let err = Error::from(e);
                        let mut status = domain.status.clone().unwrap_or_default();
                        set_creation_failed(&mut status, &err, domain.metadata.generation);
                        self.write_status(domain, &status).await?;
                        return Err(err);
                    }
                }
            }
        };

        self.sync_from_record(domain, &record).await
    }

    async fn update(&self, domain: &Domain) -> Result<ReconcileOutcome> {
        let id = domain.status_id().unwrap_or_default();
        let mut record = self.ngrok.get_reserved_domain(id).await?;

        if record.description != domain.spec.description || record.metadata != domain.spec.metadata
        {
            info!("Updating reserved domain {}", id);
            self.base
                .event(domain, EventType::Normal, reasons::UPDATING, "Updating reserved domain")
                .await;
            record = self
                .ngrok
                .update_reserved_domain(&ReservedDomainUpdate {
                    id: id.to_string(),
                    description: Some(domain.spec.description.clone()),
                    metadata: Some(domain.spec.metadata.clone()),
                })
                .await?;
            self.base
                .event(domain, EventType::Normal, reasons::UPDATED, "Updated reserved domain")
                .await;
        }

        self.sync_from_record(domain, &record).await
    }

    async fn delete(&self, domain: &Domain) -> Result<()> {
        let id = domain.status_id().unwrap_or_default();
        info!("Deleting reserved domain {}", id);
        Ok(self.ngrok.delete_reserved_domain(id).await?)
    }

    async fn clear_status_id(&self, domain: &Domain) -> Result<()> {
        self.base
            .client
            .patch_status(domain, json!({ "id": null }))
            .await
    }

    fn err_result(&self, op: Op, _domain: &Domain, err: &Error) -> ReconcileOutcome {
        if op == Op::Create && is_invalid_domain(err) {
            return ReconcileOutcome::Done;
        }
        classify(err)
    }
}

/// A 400 on create that isn't one of the transient conflicts
fn is_invalid_domain(err: &Error) -> bool {
    match err {
        Error::PlatformError(e @ PlatformError::Api(api)) => {
            api.status_code == 400 && !e.is_error_code(codes::RETRYABLE)
        }
        _ => false,
    }
}

/// Copy the server record into status
pub fn apply_record(status: &mut DomainStatus, record: &ReservedDomain) {
    status.id.clone_from(&record.id);
    status.domain.clone_from(&record.domain);
    status.region.clone_from(&record.region);
    status.uri.clone_from(&record.uri);
    status.cname_target.clone_from(&record.cname_target);
    status
        .acme_challenge_cname_target
        .clone_from(&record.acme_challenge_cname_target);
    status.certificate = record.certificate.as_ref().map(|c| DomainCertificate {
        id: c.id.clone(),
    });
    status.certificate_management_policy =
        record
            .certificate_management_policy
            .as_ref()
            .map(|p| DomainCertificateManagementPolicy {
                authority: p.authority.clone(),
                private_key_type: p.private_key_type.clone(),
            });
    status.certificate_management_status =
        record
            .certificate_management_status
            .as_ref()
            .map(|s| DomainCertificateManagementStatus {
                renews_at: s.renews_at.clone(),
                provisioning_job: s.provisioning_job.as_ref().map(|j| DomainProvisioningJob {
                    error_code: j.error_code.clone(),
                    message: j.msg.clone(),
                    started_at: j.started_at.clone(),
                    retries_at: j.retries_at.clone(),
                }),
            });
}

fn rfc3339(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|_| raw.to_string())
}

/// `"<code> <message> Started at <t> Retries at <t>"`, skipping absent parts
pub fn provisioning_message(job: &DomainProvisioningJob) -> String {
    let mut parts = Vec::new();
    if let Some(code) = job.error_code.as_deref().filter(|c| !c.is_empty()) {
        parts.push(code.to_string());
    }
    if !job.message.is_empty() {
        parts.push(job.message.clone());
    }
    if let Some(started) = &job.started_at {
        parts.push(format!("Started at {}", rfc3339(started)));
    }
    if let Some(retries) = &job.retries_at {
        parts.push(format!("Retries at {}", rfc3339(retries)));
    }
    parts.join(" ")
}

pub fn update_domain_conditions(
    status: &mut DomainStatus,
    record: &ReservedDomain,
    generation: Option<i64>,
) {
    let conditions = &mut status.conditions;
    set_condition(
        conditions,
        CONDITION_DOMAIN_CREATED,
        !record.id.is_empty(),
        REASON_DOMAIN_CREATED,
        "Domain successfully reserved",
        generation,
    );

    if record.certificate_management_policy.is_none() {
        let msg = "Domain is managed by ngrok";
        set_condition(conditions, CONDITION_CERTIFICATE_READY, true, REASON_NGROK_MANAGED, msg, generation);
        set_condition(conditions, CONDITION_DNS_CONFIGURED, true, REASON_NGROK_MANAGED, msg, generation);
        set_condition(conditions, CONDITION_TYPE_READY, true, REASON_DOMAIN_ACTIVE, "Domain is active", generation);
        remove_condition(conditions, CONDITION_TYPE_PROGRESSING);
    } else if record.certificate.is_some() {
        set_condition(
            conditions,
            CONDITION_CERTIFICATE_READY,
            true,
            REASON_CERTIFICATE_READY,
            "Certificate provisioned",
            generation,
        );
        set_condition(
            conditions,
            CONDITION_DNS_CONFIGURED,
            true,
            REASON_DNS_CONFIGURED,
            "DNS records point at ngrok",
            generation,
        );
        set_condition(conditions, CONDITION_TYPE_READY, true, REASON_DOMAIN_ACTIVE, "Domain is active", generation);
        remove_condition(conditions, CONDITION_TYPE_PROGRESSING);
    } else {
        let msg = status
            .certificate_management_status
            .as_ref()
            .and_then(|s| s.provisioning_job.as_ref())
            .map(provisioning_message)
            .unwrap_or_else(|| "Waiting for certificate provisioning".to_string());
        set_condition(conditions, CONDITION_CERTIFICATE_READY, false, REASON_PROVISIONING_ERROR, &msg, generation);
        set_condition(conditions, CONDITION_DNS_CONFIGURED, false, REASON_PROVISIONING_ERROR, &msg, generation);
        set_condition(conditions, CONDITION_TYPE_READY, false, REASON_PROVISIONING_ERROR, &msg, generation);
        set_condition(
            conditions,
            CONDITION_TYPE_PROGRESSING,
            true,
            REASON_PROVISIONING,
            "Certificate provisioning in progress",
            generation,
        );
    }
}

/// Mark every condition failed after a create error
pub fn set_creation_failed(status: &mut DomainStatus, err: &Error, generation: Option<i64>) {
    let msg = if is_invalid_domain(err) {
        format!("Domain is invalid: {}", err.sanitized_message())
    } else {
        err.sanitized_message()
    };
    for type_ in [
        CONDITION_DOMAIN_CREATED,
        CONDITION_CERTIFICATE_READY,
        CONDITION_DNS_CONFIGURED,
        CONDITION_TYPE_READY,
    ] {
        set_condition(
            &mut status.conditions,
            type_,
            false,
            REASON_DOMAIN_CREATION_FAILED,
            &msg,
            generation,
        );
    }
}

/// Certificate or DNS not ready for a reason that may still resolve itself
pub fn needs_status_follow_up(conditions: &[Condition]) -> bool {
    [CONDITION_CERTIFICATE_READY, CONDITION_DNS_CONFIGURED]
        .iter()
        .filter_map(|t| find_condition(conditions, t))
        .any(|c| c.status == CONDITION_STATUS_FALSE && c.reason != REASON_DOMAIN_CREATION_FAILED)
}
