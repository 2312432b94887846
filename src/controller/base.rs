//! Generic create/update/delete state machine shared by every reconciler
//!
//! ```text
//! fetch ── missing ──────────────► done
//!   │
//! deleting? ── yes ─► delete remote (per reclaim policy), drop finalizer
//!   │ no
//! ensure finalizer
//!   │
//! status id empty? ── yes ─► create
//!   │ no
//! update ── remote gone ─► clear status id, requeue now
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{error, info, warn};

use super::finalizers::{add_finalizer, has_finalizer, is_being_deleted, remove_finalizer};
use super::kube_io::{object_ref, reasons, EventRecorder, EventType, NamespacedKind, ResourceClient};
use super::requeue::{classify, ReconcileOutcome};
use crate::crd::ReclaimPolicy;
use crate::error::{Error, Result};

/// A resource whose status carries the ID of the remote object it owns
pub trait NgrokResource: NamespacedKind {
    /// Remote ID, `None` when not created yet
    fn status_id(&self) -> Option<&str>;

    fn reclaim_policy(&self) -> ReclaimPolicy {
        ReclaimPolicy::Delete
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Create,
    Update,
    Delete,
}

/// Kind-specific remote effects plugged into [`BaseController`]
#[async_trait]
pub trait RemoteLifecycle<K: NgrokResource>: Send + Sync {
    /// Create or adopt the remote object and record its ID in status
    async fn create(&self, obj: &K) -> Result<ReconcileOutcome>;

    async fn update(&self, obj: &K) -> Result<ReconcileOutcome>;

    /// Delete the remote object; only called under the `Delete` reclaim policy
    async fn delete(&self, obj: &K) -> Result<()>;

    /// Patch status so that the remote ID is empty
    async fn clear_status_id(&self, obj: &K) -> Result<()>;

    fn err_result(&self, _op: Op, _obj: &K, err: &Error) -> ReconcileOutcome {
        classify(err)
    }
}

pub struct BaseController<K: NamespacedKind> {
    pub client: Arc<dyn ResourceClient<K>>,
    pub events: Arc<dyn EventRecorder>,
}

impl<K: NamespacedKind> Clone for BaseController<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            events: self.events.clone(),
        }
    }
}

impl<K: NgrokResource> BaseController<K> {
    pub fn new(client: Arc<dyn ResourceClient<K>>, events: Arc<dyn EventRecorder>) -> Self {
        Self { client, events }
    }

    pub async fn event(&self, obj: &K, event_type: EventType, reason: &str, message: &str) {
        self.events
            .publish(object_ref(obj), event_type, reason, message)
            .await;
    }

    pub async fn reconcile<L>(&self, lifecycle: &L, namespace: &str, name: &str) -> Result<ReconcileOutcome>
    where
        L: RemoteLifecycle<K>,
    {
        let Some(obj) = self.client.get(namespace, name).await? else {
            return Ok(ReconcileOutcome::Done);
        };

        if is_being_deleted(&obj) {
            return self.reconcile_delete(lifecycle, &obj).await;
        }

        add_finalizer(&*self.client, &obj).await?;

        match obj.status_id() {
            None => {
                self.event(&obj, EventType::Normal, reasons::CREATING, "Creating remote object")
                    .await;
                match lifecycle.create(&obj).await {
                    Ok(outcome) => {
                        self.event(&obj, EventType::Normal, reasons::CREATED, "Created remote object")
                            .await;
                        Ok(outcome)
                    }
                    Err(e) => Ok(self.failed(lifecycle, Op::Create, &obj, e).await),
                }
            }
            Some(id) => match lifecycle.update(&obj).await {
                Ok(outcome) => Ok(outcome),
                Err(e) if e.is_remote_not_found() => {
                    warn!(
                        "Remote object {} of {}/{} is gone, clearing status to recreate",
                        id, namespace, name
                    );
                    lifecycle.clear_status_id(&obj).await?;
                    Ok(ReconcileOutcome::Requeue(Duration::ZERO))
                }
                Err(e) => Ok(self.failed(lifecycle, Op::Update, &obj, e).await),
            },
        }
    }

    async fn reconcile_delete<L>(&self, lifecycle: &L, obj: &K) -> Result<ReconcileOutcome>
    where
        L: RemoteLifecycle<K>,
    {
        if !has_finalizer(obj) {
            return Ok(ReconcileOutcome::Done);
        }

        if obj.reclaim_policy() == ReclaimPolicy::Delete && obj.status_id().is_some() {
            self.event(obj, EventType::Normal, reasons::DELETING, "Deleting remote object")
                .await;
            match lifecycle.delete(obj).await {
                Ok(()) => {}
                Err(e) if e.is_remote_not_found() => {
                    info!("Remote object of {} already deleted", obj.name_any());
                }
                Err(e) => return Ok(self.failed(lifecycle, Op::Delete, obj, e).await),
            }
        }

        remove_finalizer(&*self.client, obj).await?;
        self.event(obj, EventType::Normal, reasons::DELETED, "Finalized").await;
        Ok(ReconcileOutcome::Done)
    }

    async fn failed<L>(&self, lifecycle: &L, op: Op, obj: &K, err: Error) -> ReconcileOutcome
    where
        L: RemoteLifecycle<K>,
    {
        let reason = match op {
            Op::Create => reasons::FAILED_CREATE,
            Op::Update => reasons::FAILED_UPDATE,
            Op::Delete => reasons::FAILED_DELETE,
        };
        let outcome = lifecycle.err_result(op, obj, &err);
        if outcome == ReconcileOutcome::Done {
            error!("{:?} of {} failed: {}", op, obj.name_any(), err);
        } else {
            warn!("{:?} of {} failed, will retry: {}", op, obj.name_any(), err);
        }
        self.event(obj, EventType::Warning, reason, &err.sanitized_message())
            .await;
        outcome
    }
}
