//! Wires watchers, the sync driver and one controller per reconciled kind

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::runtime::controller::{Action, Config as ControllerConfig, Controller};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::domain::DomainReconciler;
use super::https_edge::HttpsEdgeReconciler;
use super::ip_policy::IpPolicyReconciler;
use super::kube_io::{EventRecorder, KubeEventRecorder, KubeResources, NamespacedKind, ResourceClient};
use super::requeue::{classify, BackoffTracker, ReconcileOutcome};
use super::route_modules::ModuleReconciler;
use super::service::{ServiceClients, ServiceReconciler};
use super::tcp_edge::TcpEdgeReconciler;
use super::tls_edge::TlsEdgeReconciler;
use crate::config::OperatorConfig;
use crate::crd::{
    Domain, Gateway, HttpsEdge, IpPolicy, NgrokModuleSet, NgrokTrafficPolicy, TcpEdge, TlsEdge, Tunnel,
};
use crate::error::{Error, Result};
use crate::platform::{HttpNgrokApi, NgrokApi};
use crate::resolvers::{KubeIpPolicyResolver, KubeSecretResolver};
use crate::store::{store_key, Cached, DeriveConfig, Driver, DriverClients, Store};

/// A reconciler driven by a kube-runtime controller
#[async_trait]
pub trait KindReconciler: Send + Sync + 'static {
    type Kind: NamespacedKind;

    async fn reconcile_key(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome>;
}

macro_rules! kind_reconciler {
    ($reconciler:ty, $kind:ty) => {
        #[async_trait]
        impl KindReconciler for $reconciler {
            type Kind = $kind;

            async fn reconcile_key(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
                self.reconcile(namespace, name).await
            }
        }
    };
}

kind_reconciler!(DomainReconciler, Domain);
kind_reconciler!(HttpsEdgeReconciler, HttpsEdge);
kind_reconciler!(TlsEdgeReconciler, TlsEdge);
kind_reconciler!(TcpEdgeReconciler, TcpEdge);
kind_reconciler!(IpPolicyReconciler, IpPolicy);
kind_reconciler!(ServiceReconciler, Service);

/// Per-controller context: the reconciler plus its retry bookkeeping
pub struct Context<R> {
    pub reconciler: R,
    pub backoff: BackoffTracker,
}

impl<R> Context<R> {
    pub fn new(reconciler: R) -> Self {
        Self {
            reconciler,
            backoff: BackoffTracker::default(),
        }
    }

    /// Turn an outcome into a controller action; success clears the key's backoff
    pub fn action(&self, key: &str, outcome: ReconcileOutcome) -> Action {
        match outcome {
            ReconcileOutcome::Done => {
                self.backoff.reset(key);
                Action::await_change()
            }
            ReconcileOutcome::Requeue(after) => Action::requeue(after),
            ReconcileOutcome::Backoff => Action::requeue(self.backoff.next_delay(key)),
        }
    }
}

fn key_of<K: Resource>(obj: &K) -> String {
    store_key(obj.meta().namespace.as_deref(), &obj.name_any())
}

async fn reconcile<R: KindReconciler>(obj: Arc<R::Kind>, ctx: Arc<Context<R>>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_default();
    let outcome = ctx.reconciler.reconcile_key(&namespace, &obj.name_any()).await?;
    Ok(ctx.action(&key_of(obj.as_ref()), outcome))
}

fn error_policy<R: KindReconciler>(obj: Arc<R::Kind>, err: &Error, ctx: Arc<Context<R>>) -> Action {
    let key = key_of(obj.as_ref());
    let outcome = classify(err);
    if outcome == ReconcileOutcome::Done {
        error!("Reconcile of {} {} failed: {}", R::Kind::kind(&()), key, err);
    } else {
        warn!("Reconcile of {} {} failed, retrying: {}", R::Kind::kind(&()), key, err);
    }
    ctx.action(&key, outcome)
}

async fn drive<R: KindReconciler>(controller: Controller<R::Kind>, reconciler: R, workers: u16) {
    info!("Starting {} controller", R::Kind::kind(&()));
    controller
        .with_config(ControllerConfig::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile::<R>, error_policy::<R>, Arc::new(Context::new(reconciler)))
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                Err(e) => debug!("Controller error: {}", e),
            }
        })
        .await;
    info!("{} controller stopped", R::Kind::kind(&()));
}

/// Mirror one kind into the store and nudge the sync loop on every change
async fn watch_into_store<K>(api: Api<K>, store: Arc<Store>, driver: Arc<Driver>)
where
    K: Cached + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    let mut relist: Vec<K> = Vec::new();
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(obj)) => {
                store.update(obj);
                driver.request_sync();
            }
            Ok(watcher::Event::Delete(obj)) => {
                store.delete(&obj);
                driver.request_sync();
            }
            Ok(watcher::Event::Init) => relist.clear(),
            Ok(watcher::Event::InitApply(obj)) => relist.push(obj),
            Ok(watcher::Event::InitDone) => {
                debug!("Relisted {} {} objects", relist.len(), K::KIND);
                store.replace_all(std::mem::take(&mut relist));
                driver.request_sync();
            }
            Err(e) => warn!("{} watch failed: {}", K::KIND, e),
        }
    }
}

fn spawn_watch<K>(client: &Client, store: &Arc<Store>, driver: &Arc<Driver>)
where
    K: Cached + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::all(client.clone());
    tokio::spawn(watch_into_store(api, store.clone(), driver.clone()));
}

fn kube_client<K: NamespacedKind>(client: &Client) -> Arc<dyn ResourceClient<K>> {
    Arc::new(KubeResources::<K>::new(client.clone()))
}

/// Seed the store, start the sync loop and run every controller until shutdown
pub async fn run(client: Client, cfg: &OperatorConfig) -> Result<()> {
    let store = Arc::new(Store::new(cfg.controller_name.clone()));
    store.seed(client.clone(), cfg.enable_gateway).await?;
    info!("Store seeded");

    let events: Arc<dyn EventRecorder> = Arc::new(KubeEventRecorder::new(client.clone()));
    let derive_cfg = DeriveConfig::from(cfg);
    let driver = Arc::new(Driver::new(
        store.clone(),
        derive_cfg.clone(),
        DriverClients {
            domains: kube_client(&client),
            https_edges: kube_client(&client),
            tunnels: kube_client(&client),
            ingresses: kube_client(&client),
            events: events.clone(),
        },
        cfg.sync_debounce,
    ));
    tokio::spawn(driver.clone().run_sync_loop());

    spawn_watch::<Ingress>(&client, &store, &driver);
    spawn_watch::<IngressClass>(&client, &store, &driver);
    spawn_watch::<Service>(&client, &store, &driver);
    spawn_watch::<Domain>(&client, &store, &driver);
    spawn_watch::<HttpsEdge>(&client, &store, &driver);
    spawn_watch::<TlsEdge>(&client, &store, &driver);
    spawn_watch::<TcpEdge>(&client, &store, &driver);
    spawn_watch::<Tunnel>(&client, &store, &driver);
    spawn_watch::<NgrokModuleSet>(&client, &store, &driver);
    spawn_watch::<NgrokTrafficPolicy>(&client, &store, &driver);
    spawn_watch::<IpPolicy>(&client, &store, &driver);
    if cfg.enable_gateway {
        spawn_watch::<Gateway>(&client, &store, &driver);
    }
    driver.request_sync();

    let ngrok: Arc<dyn NgrokApi> = Arc::new(HttpNgrokApi::new(&cfg.api_url, &cfg.api_key));
    let modules = ModuleReconciler::new(
        ngrok.clone(),
        Arc::new(KubeSecretResolver::new(client.clone())),
        Arc::new(KubeIpPolicyResolver::new(client.clone())),
        events.clone(),
    );

    let domains = DomainReconciler::new(kube_client(&client), events.clone(), ngrok.clone());
    let https_edges =
        HttpsEdgeReconciler::new(kube_client(&client), events.clone(), ngrok.clone(), modules.clone());
    let tls_edges = TlsEdgeReconciler::new(
        kube_client(&client),
        kube_client(&client),
        events.clone(),
        ngrok.clone(),
        modules.clone(),
    );
    let tcp_edges = TcpEdgeReconciler::new(
        kube_client(&client),
        events.clone(),
        ngrok.clone(),
        modules,
        cfg.region.clone(),
    );
    let ip_policies = IpPolicyReconciler::new(kube_client(&client), events.clone(), ngrok);
    let services = ServiceReconciler::new(
        ServiceClients {
            services: kube_client(&client),
            tunnels: kube_client(&client),
            tls_edges: kube_client(&client),
            tcp_edges: kube_client(&client),
        },
        events,
        store,
        derive_cfg,
    );

    let watch_cfg = watcher::Config::default();
    let workers = cfg.workers;
    futures::join!(
        drive(Controller::new(Api::<Domain>::all(client.clone()), watch_cfg.clone()), domains, workers),
        drive(
            Controller::new(Api::<HttpsEdge>::all(client.clone()), watch_cfg.clone()),
            https_edges,
            workers
        ),
        drive(
            Controller::new(Api::<TlsEdge>::all(client.clone()), watch_cfg.clone()),
            tls_edges,
            workers
        ),
        drive(
            Controller::new(Api::<TcpEdge>::all(client.clone()), watch_cfg.clone()),
            tcp_edges,
            workers
        ),
        drive(
            Controller::new(Api::<IpPolicy>::all(client.clone()), watch_cfg.clone()),
            ip_policies,
            workers
        ),
        drive(
            Controller::new(Api::<Service>::all(client.clone()), watch_cfg.clone())
                .owns(Api::<Tunnel>::all(client.clone()), watch_cfg.clone())
                .owns(Api::<TlsEdge>::all(client.clone()), watch_cfg.clone())
                .owns(Api::<TcpEdge>::all(client.clone()), watch_cfg),
            services,
            workers
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_action_resets_backoff_on_success() {
        let ctx = Context::new(());
        assert_eq!(
            ctx.action("test/a", ReconcileOutcome::Backoff),
            Action::requeue(Duration::from_secs(30))
        );
        assert_eq!(
            ctx.action("test/a", ReconcileOutcome::Backoff),
            Action::requeue(Duration::from_secs(60))
        );
        assert_eq!(ctx.action("test/a", ReconcileOutcome::Done), Action::await_change());
        assert_eq!(
            ctx.action("test/a", ReconcileOutcome::Backoff),
            Action::requeue(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_explicit_requeue_keeps_backoff_state() {
        let ctx = Context::new(());
        ctx.action("test/a", ReconcileOutcome::Backoff);
        assert_eq!(
            ctx.action("test/a", ReconcileOutcome::Requeue(Duration::from_secs(10))),
            Action::requeue(Duration::from_secs(10))
        );
        assert_eq!(ctx.backoff.attempts("test/a"), 1);
    }

    #[test]
    fn test_error_outcomes() {
        let ctx = Context::new(());
        let terminal = Error::InvalidConfiguration("bad".to_string());
        assert_eq!(ctx.action("test/a", classify(&terminal)), Action::await_change());
        assert_eq!(
            ctx.action("test/b", classify(&Error::NotAllDomainsReadyYet)),
            Action::requeue(Duration::from_secs(30))
        );
    }
}
