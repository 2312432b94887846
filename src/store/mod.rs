//! In-memory mirror of every watched resource
//!
//! The [`Store`] is fed by watchers (or [`Store::seed`] at startup) and read by
//! derivation and reconcilers. All maps sit behind one reader/writer lock and
//! list snapshots are sorted by `namespace/name`.

mod audit;
mod derive;
mod driver;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;

use crate::crd::{
    Domain, Gateway, HttpsEdge, IpPolicy, NgrokModuleSet, NgrokTrafficPolicy, TcpEdge, TlsEdge,
    Tunnel,
};
use crate::error::{Error, Result};

pub use audit::{audit_ingresses, validate_ingress, IngressProblem};
pub use derive::{
    backend_labels, backend_protocol, derive, DeriveConfig, Desired, IngressStatusUpdate,
    BACKEND_LABEL_SERVICE_UID, LABEL_CONTROLLER_NAME, LABEL_CONTROLLER_NAMESPACE,
};
pub use driver::{Driver, DriverClients, SyncReport};

/// Legacy annotation naming the class of an ingress
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const DEFAULT_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";

type Map<K> = BTreeMap<String, Arc<K>>;

#[derive(Default)]
pub struct Maps {
    ingresses: Map<Ingress>,
    ingress_classes: Map<IngressClass>,
    services: Map<Service>,
    domains: Map<Domain>,
    https_edges: Map<HttpsEdge>,
    tls_edges: Map<TlsEdge>,
    tcp_edges: Map<TcpEdge>,
    tunnels: Map<Tunnel>,
    module_sets: Map<NgrokModuleSet>,
    traffic_policies: Map<NgrokTrafficPolicy>,
    ip_policies: Map<IpPolicy>,
    gateways: Map<Gateway>,
}

/// A kind the store keeps a map for
pub trait Cached: Resource + Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn map(maps: &Maps) -> &Map<Self>;
    fn map_mut(maps: &mut Maps) -> &mut Map<Self>;
}

macro_rules! cached {
    ($ty:ty, $kind:literal, $field:ident) => {
        impl Cached for $ty {
            const KIND: &'static str = $kind;

            fn map(maps: &Maps) -> &Map<Self> {
                &maps.$field
            }

            fn map_mut(maps: &mut Maps) -> &mut Map<Self> {
                &mut maps.$field
            }
        }
    };
}

cached!(Ingress, "Ingress", ingresses);
cached!(IngressClass, "IngressClass", ingress_classes);
cached!(Service, "Service", services);
cached!(Domain, "Domain", domains);
cached!(HttpsEdge, "HTTPSEdge", https_edges);
cached!(TlsEdge, "TLSEdge", tls_edges);
cached!(TcpEdge, "TCPEdge", tcp_edges);
cached!(Tunnel, "Tunnel", tunnels);
cached!(NgrokModuleSet, "NgrokModuleSet", module_sets);
cached!(NgrokTrafficPolicy, "NgrokTrafficPolicy", traffic_policies);
cached!(IpPolicy, "IPPolicy", ip_policies);
cached!(Gateway, "Gateway", gateways);

/// `namespace/name`, or `name` for cluster-scoped objects
pub fn store_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

fn key_of<K: Resource>(obj: &K) -> String {
    store_key(obj.meta().namespace.as_deref(), &obj.name_any())
}

pub struct Store {
    controller_name: String,
    maps: RwLock<Maps>,
}

impl Store {
    /// `controller_name` is the IngressClass controller string we own
    pub fn new(controller_name: impl Into<String>) -> Self {
        Self {
            controller_name: controller_name.into(),
            maps: RwLock::new(Maps::default()),
        }
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    pub fn update<K: Cached>(&self, obj: K) {
        let key = key_of(&obj);
        K::map_mut(&mut self.maps.write()).insert(key, Arc::new(obj));
    }

    pub fn delete<K: Cached>(&self, obj: &K) {
        let key = key_of(obj);
        K::map_mut(&mut self.maps.write()).remove(&key);
    }

    /// Swap the whole map for a kind, as after a watch relist
    pub fn replace_all<K: Cached>(&self, objs: impl IntoIterator<Item = K>) {
        let map: Map<K> = objs
            .into_iter()
            .map(|o| (key_of(&o), Arc::new(o)))
            .collect();
        *K::map_mut(&mut self.maps.write()) = map;
    }

    pub fn get<K: Cached>(&self, name: &str, namespace: Option<&str>) -> Result<Arc<K>> {
        let key = store_key(namespace, name);
        K::map(&self.maps.read())
            .get(&key)
            .cloned()
            .ok_or(Error::NotFoundInStore { kind: K::KIND, key })
    }

    /// Like [`Store::get`], but a miss is `None`
    pub fn find<K: Cached>(&self, name: &str, namespace: &str) -> Option<Arc<K>> {
        self.get(name, Some(namespace)).ok()
    }

    /// Snapshot sorted by `namespace/name`
    pub fn list<K: Cached>(&self) -> Vec<Arc<K>> {
        K::map(&self.maps.read()).values().cloned().collect()
    }

    /// Valid ingresses that belong to one of our IngressClasses
    pub fn list_our_ingresses(&self) -> Vec<Arc<Ingress>> {
        let maps = self.maps.read();
        maps.ingresses
            .values()
            .filter(|ing| self.check_class(&maps, ing).is_ok() && validate_ingress(ing).is_ok())
            .cloned()
            .collect()
    }

    /// Why an ingress is or isn't ours
    pub fn ingress_class_membership(&self, ingress: &Ingress) -> Result<()> {
        self.check_class(&self.maps.read(), ingress)
    }

    fn check_class(&self, maps: &Maps, ingress: &Ingress) -> Result<()> {
        if maps.ingress_classes.is_empty() {
            return Err(Error::IngressClassNotFound);
        }
        match ingress_class_name(ingress) {
            Some(class) => {
                let ours = maps
                    .ingress_classes
                    .get(class)
                    .is_some_and(|ic| self.is_our_class(ic));
                if ours {
                    Ok(())
                } else {
                    Err(Error::DifferentIngressClass(key_of(ingress)))
                }
            }
            None => {
                let has_default = maps
                    .ingress_classes
                    .values()
                    .any(|ic| self.is_our_class(ic) && is_default_class(ic));
                if has_default {
                    Ok(())
                } else {
                    Err(Error::NoDefaultIngressClassFound)
                }
            }
        }
    }

    fn is_our_class(&self, class: &IngressClass) -> bool {
        class
            .spec
            .as_ref()
            .and_then(|s| s.controller.as_deref())
            .is_some_and(|c| c == self.controller_name)
    }

    /// Resolve a named service port to its number and appProtocol
    pub fn service_port(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Option<(i32, Option<String>)> {
        let svc = self.find::<Service>(service, namespace)?;
        svc.spec
            .as_ref()?
            .ports
            .as_ref()?
            .iter()
            .find(|p| p.name.as_deref() == Some(port_name))
            .map(|p| (p.port, p.app_protocol.clone()))
    }

    /// appProtocol of a numbered service port
    pub fn service_app_protocol(&self, namespace: &str, service: &str, port: i32) -> Option<String> {
        let svc = self.find::<Service>(service, namespace)?;
        svc.spec
            .as_ref()?
            .ports
            .as_ref()?
            .iter()
            .find(|p| p.port == port)
            .and_then(|p| p.app_protocol.clone())
    }

    /// One-shot List of every kind into the store
    pub async fn seed(&self, client: kube::Client, enable_gateway: bool) -> Result<()> {
        self.seed_kind::<Ingress>(&client).await?;
        self.seed_kind::<IngressClass>(&client).await?;
        self.seed_kind::<Service>(&client).await?;
        self.seed_kind::<Domain>(&client).await?;
        self.seed_kind::<HttpsEdge>(&client).await?;
        self.seed_kind::<TlsEdge>(&client).await?;
        self.seed_kind::<TcpEdge>(&client).await?;
        self.seed_kind::<Tunnel>(&client).await?;
        self.seed_kind::<NgrokModuleSet>(&client).await?;
        self.seed_kind::<NgrokTrafficPolicy>(&client).await?;
        self.seed_kind::<IpPolicy>(&client).await?;
        if enable_gateway {
            self.seed_kind::<Gateway>(&client).await?;
        }
        Ok(())
    }

    async fn seed_kind<K>(&self, client: &kube::Client) -> Result<()>
    where
        K: Cached + serde::de::DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let api: kube::Api<K> = kube::Api::all(client.clone());
        let list = api.list(&Default::default()).await?;
        tracing::debug!("Seeded {} {} objects", list.items.len(), K::KIND);
        self.replace_all(list.items);
        Ok(())
    }
}

pub fn ingress_class_name(ingress: &Ingress) -> Option<&str> {
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_deref())
        .or_else(|| {
            ingress
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
                .map(String::as_str)
        })
}

fn is_default_class(class: &IngressClass) -> bool {
    class
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
        .is_some_and(|v| v == "true")
}

#[cfg(test)]
mod tests;
