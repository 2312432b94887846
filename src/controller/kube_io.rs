//! Cluster reads and writes used by the driver and reconcilers
//!
//! Reconcilers only touch the cluster through [`ResourceClient`] and
//! [`EventRecorder`], so the state machines can run against in-memory fakes.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::error::Result;

pub const FIELD_MANAGER: &str = "ngrok-operator";

/// Bounds shared by every namespaced kind the operator reads and writes
pub trait NamespacedKind:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedKind for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ResourceClient<K: NamespacedKind>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List across all namespaces when `namespace` is `None`
    async fn list(&self, namespace: Option<&str>, label_selector: &str) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace the whole object, guarded by its resourceVersion
    async fn replace(&self, obj: &K) -> Result<K>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<()>;

    /// JSON merge patch of `.status`
    async fn patch_status(&self, obj: &K, status: serde_json::Value) -> Result<()>;
}

pub struct KubeResources<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeResources<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: NamespacedKind> KubeResources<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(&self, obj: &K) -> Api<K> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        self.api(&namespace)
    }
}

#[async_trait]
impl<K: NamespacedKind> ResourceClient<K> for KubeResources<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: Option<&str>, label_selector: &str) -> Result<Vec<K>> {
        let api: Api<K> = match namespace {
            Some(ns) => self.api(ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().labels(label_selector);
        Ok(api.list(&params).await?.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        Ok(self.api_for(obj).create(&PostParams::default(), obj).await?)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        Ok(self
            .api_for(obj)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<()> {
        let patch = json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api_for(obj)
            .patch(
                &obj.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn patch_status(&self, obj: &K, status: serde_json::Value) -> Result<()> {
        let patch = json!({ "status": status });
        self.api_for(obj)
            .patch_status(
                &obj.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Event reasons recorded on owning objects
pub mod reasons {
    pub const CREATING: &str = "Creating";
    pub const CREATED: &str = "Created";
    pub const UPDATING: &str = "Updating";
    pub const UPDATED: &str = "Updated";
    pub const DELETING: &str = "Deleting";
    pub const DELETED: &str = "Deleted";
    pub const FAILED_CREATE: &str = "FailedCreate";
    pub const FAILED_UPDATE: &str = "FailedUpdate";
    pub const FAILED_DELETE: &str = "FailedDelete";
    pub const INVALID_INGRESS_SPEC: &str = "InvalidIngressSpec";
    pub const NO_DEFAULT_INGRESS_CLASS_FOUND: &str = "NoDefaultIngressClassFound";
    pub const TRAFFIC_POLICY_PARSE_FAILED: &str = "TrafficPolicyParseFailed";
    pub const POLICY_DEPRECATION: &str = "PolicyDeprecation";
    pub const UPDATE: &str = "Update";
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Publish an event; failures are logged, never returned
    async fn publish(
        &self,
        regarding: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}

/// Writes `core/v1` Events into the namespace of the regarding object
pub struct KubeEventRecorder {
    client: Client,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        regarding: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let namespace = regarding
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let name = regarding.name.clone().unwrap_or_default();
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{name}-")),
                ..Default::default()
            },
            type_: Some(event_type.as_str().to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: regarding,
            reporting_component: Some(FIELD_MANAGER.to_string()),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!("Failed to publish event {} for {}/{}: {}", reason, namespace, name, e);
        }
    }
}

/// Reference used as an event's involved object
pub fn object_ref<K: Resource<DynamicType = ()>>(obj: &K) -> ObjectReference {
    obj.object_ref(&())
}
