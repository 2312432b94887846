//! Sync entry point: derive the desired graph and converge the cluster to it

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::networking::v1::Ingress;
use kube::core::object::HasSpec;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, instrument, warn};

use super::audit::{audit_ingresses, IngressProblem};
use super::derive::{derive, DeriveConfig, IngressStatusUpdate};
use super::{store_key, Store};
use crate::controller::kube_io::{
    object_ref, reasons, EventRecorder, EventType, NamespacedKind, ResourceClient,
};
use crate::crd::{Domain, HttpsEdge, Tunnel};
use crate::error::Result;

/// Cluster clients the driver writes derived objects through
#[derive(Clone)]
pub struct DriverClients {
    pub domains: Arc<dyn ResourceClient<Domain>>,
    pub https_edges: Arc<dyn ResourceClient<HttpsEdge>>,
    pub tunnels: Arc<dyn ResourceClient<Tunnel>>,
    pub ingresses: Arc<dyn ResourceClient<Ingress>>,
    /// Events about ingresses land here
    pub events: Arc<dyn EventRecorder>,
}

pub struct Driver {
    store: Arc<Store>,
    cfg: DeriveConfig,
    clients: DriverClients,
    debounce: Duration,
    latch: Mutex<()>,
    wake: Notify,
    /// Ingress problems already published, so each is reported once
    reported: parking_lot::Mutex<BTreeSet<(String, &'static str, String)>>,
}

/// Counts of writes made by one sync
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub statuses: usize,
    pub events: usize,
    /// Objects whose write failed; the rest of the sync still ran
    pub failed: usize,
}

/// How to treat a desired object whose name is taken by one without our labels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Unlabelled {
    /// Leave it alone; it already does the job
    Leave,
    /// Take it over: stamp our labels and replace its spec
    Adopt,
}

impl Driver {
    pub fn new(
        store: Arc<Store>,
        cfg: DeriveConfig,
        clients: DriverClients,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            cfg,
            clients,
            debounce,
            latch: Mutex::new(()),
            wake: Notify::new(),
            reported: parking_lot::Mutex::new(BTreeSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Ask the sync loop for a run; calls made during the debounce window coalesce
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    /// Wait for requests and run a sync per debounce window. Never returns.
    pub async fn run_sync_loop(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            tokio::time::sleep(self.debounce).await;
            match self.sync().await {
                Some(report) if report.failed > 0 => {
                    warn!("Sync finished with {} failed writes, retrying", report.failed);
                    self.request_sync();
                }
                Some(report) => debug!("Sync finished: {:?}", report),
                None => debug!("Sync skipped, another sync is running"),
            }
        }
    }

    /// Derive and apply. `None` if another sync already holds the latch.
    ///
    /// A failed write is logged and counted; it never stops the other objects
    /// from being applied.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Option<SyncReport> {
        let Ok(_guard) = self.latch.try_lock() else {
            return None;
        };

        let desired = derive(&self.store, &self.cfg);
        let mut report = SyncReport::default();
        let selector = self.cfg.label_selector();

        self.report_ingress_problems(&mut report).await;

        apply_kind(
            &*self.clients.domains,
            &selector,
            desired.domains,
            Unlabelled::Leave,
            false,
            &mut report,
        )
        .await;
        apply_kind(
            &*self.clients.https_edges,
            &selector,
            desired.https_edges,
            Unlabelled::Adopt,
            true,
            &mut report,
        )
        .await;
        apply_kind(
            &*self.clients.tunnels,
            &selector,
            desired.tunnels,
            Unlabelled::Adopt,
            true,
            &mut report,
        )
        .await;

        for update in &desired.ingress_statuses {
            match self.write_ingress_status(update).await {
                Ok(true) => report.statuses += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Failed to update status of ingress {}/{}: {}",
                        update.namespace, update.name, e
                    );
                    report.failed += 1;
                }
            }
        }
        Some(report)
    }

    /// Publish events for ingress problems not reported since they appeared
    async fn report_ingress_problems(&self, report: &mut SyncReport) {
        let problems = audit_ingresses(&self.store);
        let current: BTreeSet<_> = problems.iter().map(IngressProblem::fingerprint).collect();
        let fresh: Vec<IngressProblem> = {
            let reported = self.reported.lock();
            problems
                .into_iter()
                .filter(|p| !reported.contains(&p.fingerprint()))
                .collect()
        };

        for problem in fresh {
            debug!("Ingress {}: {}", problem.key, problem.message);
            self.clients
                .events
                .publish(
                    problem.regarding,
                    problem.event_type,
                    problem.reason,
                    &problem.message,
                )
                .await;
            report.events += 1;
        }
        *self.reported.lock() = current;
    }

    async fn write_ingress_status(&self, update: &IngressStatusUpdate) -> Result<bool> {
        let Ok(ingress) = self.store.get::<Ingress>(&update.name, Some(&update.namespace)) else {
            return Ok(false);
        };
        let current = ingress
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.clone())
            .unwrap_or_default();
        if current == update.ingress {
            return Ok(false);
        }

        info!(
            "Updating load balancer status of ingress {}/{}",
            update.namespace, update.name
        );
        self.clients
            .ingresses
            .patch_status(
                &ingress,
                json!({ "loadBalancer": { "ingress": update.ingress } }),
            )
            .await?;
        self.clients
            .events
            .publish(
                object_ref(&*ingress),
                EventType::Normal,
                reasons::UPDATED,
                "Load balancer status updated",
            )
            .await;
        Ok(true)
    }
}

/// Create missing, update changed and (optionally) delete extra objects of one kind
async fn apply_kind<K>(
    client: &dyn ResourceClient<K>,
    selector: &str,
    desired: Vec<K>,
    unlabelled: Unlabelled,
    collect_garbage: bool,
    report: &mut SyncReport,
) where
    K: NamespacedKind + HasSpec,
    K::Spec: PartialEq + Clone + Serialize,
{
    let kind = K::kind(&());
    let mut live: BTreeMap<String, K> = match client.list(None, selector).await {
        Ok(objs) => objs
            .into_iter()
            .map(|o| (store_key(o.meta().namespace.as_deref(), &o.name_any()), o))
            .collect(),
        Err(e) => {
            error!("Failed to list {}: {}", kind, e);
            report.failed += 1;
            return;
        }
    };

    for want in desired {
        let key = store_key(want.meta().namespace.as_deref(), &want.name_any());
        let result = match live.remove(&key) {
            Some(have) => update_spec(client, have, &want, report).await,
            None => create_or_adopt(client, &want, unlabelled, report).await,
        };
        if let Err(e) = result {
            error!("Failed to apply {} {}: {}", kind, key, e);
            report.failed += 1;
        }
    }

    if collect_garbage {
        for (key, stale) in live {
            info!("Deleting {} {}", kind, key);
            match client
                .delete(&stale.namespace().unwrap_or_default(), &stale.name_any())
                .await
            {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    error!("Failed to delete {} {}: {}", kind, key, e);
                    report.failed += 1;
                }
            }
        }
    }
}

async fn update_spec<K>(
    client: &dyn ResourceClient<K>,
    mut have: K,
    want: &K,
    report: &mut SyncReport,
) -> Result<()>
where
    K: NamespacedKind + HasSpec,
    K::Spec: PartialEq + Clone,
{
    if have.spec() == want.spec() {
        return Ok(());
    }
    info!("Updating {} {}", K::kind(&()), have.name_any());
    *have.spec_mut() = want.spec().clone();
    client.replace(&have).await?;
    report.updated += 1;
    Ok(())
}

async fn create_or_adopt<K>(
    client: &dyn ResourceClient<K>,
    want: &K,
    unlabelled: Unlabelled,
    report: &mut SyncReport,
) -> Result<()>
where
    K: NamespacedKind + HasSpec,
    K::Spec: PartialEq + Clone,
{
    let namespace = want.namespace().unwrap_or_default();
    let name = want.name_any();
    let Some(mut existing) = client.get(&namespace, &name).await? else {
        info!("Creating {} {}/{}", K::kind(&()), namespace, name);
        client.create(want).await?;
        report.created += 1;
        return Ok(());
    };

    match unlabelled {
        Unlabelled::Leave => {
            debug!(
                "{} {}/{} exists without controller labels, leaving it as is",
                K::kind(&()),
                namespace,
                name
            );
        }
        Unlabelled::Adopt => {
            info!("Adopting {} {}/{}", K::kind(&()), namespace, name);
            existing
                .labels_mut()
                .extend(want.labels().iter().map(|(k, v)| (k.clone(), v.clone())));
            *existing.spec_mut() = want.spec().clone();
            client.replace(&existing).await?;
            report.updated += 1;
        }
    }
    Ok(())
}
