use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ErrorResponse;
use kube::ResourceExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::controller::kube_io::{EventRecorder, EventType, NamespacedKind, ResourceClient};
use crate::error::Result;

fn api_error(code: u16, reason: &str, message: String) -> crate::error::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
    .into()
}

/// RFC 7386 JSON merge patch
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(map) = target {
                for (k, v) in fields {
                    if v.is_null() {
                        map.remove(k);
                    } else {
                        merge_patch(map.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|have| have == v),
            None => labels.contains_key(term),
        })
}

/// Namespaced objects with API-server-like finalizer handling
pub struct FakeResources<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    counter: Mutex<u64>,
    status_failures: Mutex<u32>,
}

impl<K> Default for FakeResources<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            counter: Mutex::new(0),
            status_failures: Mutex::new(0),
        }
    }
}

impl<K: NamespacedKind> FakeResources<K> {
    pub fn with(objs: impl IntoIterator<Item = K>) -> Self {
        let fake = Self::default();
        for obj in objs {
            fake.insert(obj);
        }
        fake
    }

    /// Store an object as-is, bypassing create semantics
    pub fn insert(&self, obj: K) {
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        self.objects.lock().insert(key, obj);
    }

    pub fn current(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Reject the next `n` status patches with a 500
    pub fn fail_status_patches(&self, n: u32) {
        *self.status_failures.lock() = n;
    }

    pub fn all(&self) -> Vec<K> {
        self.objects.lock().values().cloned().collect()
    }

    fn next(&self) -> u64 {
        let mut counter = self.counter.lock();
        *counter += 1;
        *counter
    }

    fn key(obj: &K) -> (String, String) {
        (obj.namespace().unwrap_or_default(), obj.name_any())
    }

    fn not_found(namespace: &str, name: &str) -> crate::error::Error {
        api_error(404, "NotFound", format!("{namespace}/{name} not found"))
    }
}

#[async_trait]
impl<K: NamespacedKind> ResourceClient<K> for FakeResources<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.current(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>, label_selector: &str) -> Result<Vec<K>> {
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |want| want == ns))
            .filter(|(_, o)| matches_selector(o.labels(), label_selector))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj);
        if self.objects.lock().contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{}/{} exists", key.0, key.1)));
        }
        let n = self.next();
        let mut created = obj.clone();
        let meta = created.meta_mut();
        meta.uid = Some(format!("uid-{n}"));
        meta.generation = Some(1);
        meta.resource_version = Some(n.to_string());
        meta.creation_timestamp = Some(Time(chrono::Utc::now()));
        self.objects.lock().insert(key, created.clone());
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj);
        let Some(existing) = self.current(&key.0, &key.1) else {
            return Err(Self::not_found(&key.0, &key.1));
        };
        let old = serde_json::to_value(&existing)?;
        let mut new = serde_json::to_value(obj)?;
        if let Some(status) = old.get("status") {
            new["status"] = status.clone();
        }
        let mut replaced: K = serde_json::from_value(new.clone())?;
        let n = self.next();
        let meta = replaced.meta_mut();
        meta.resource_version = Some(n.to_string());
        if old.get("spec") != new.get("spec") {
            meta.generation = Some(existing.meta().generation.unwrap_or(1) + 1);
        }
        self.objects.lock().insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock();
        let Some(obj) = objects.get_mut(&key) else {
            return Ok(());
        };
        if obj.finalizers().is_empty() {
            objects.remove(&key);
        } else if obj.meta().deletion_timestamp.is_none() {
            obj.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        Ok(())
    }

    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<()> {
        let key = Self::key(obj);
        let mut objects = self.objects.lock();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(Self::not_found(&key.0, &key.1));
        };
        let deleting = stored.meta().deletion_timestamp.is_some();
        if deleting && finalizers.is_empty() {
            objects.remove(&key);
        } else {
            stored.meta_mut().finalizers = Some(finalizers);
        }
        Ok(())
    }

    async fn patch_status(&self, obj: &K, status: Value) -> Result<()> {
        let key = Self::key(obj);
        {
            let mut failures = self.status_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(api_error(500, "InternalError", "status write failed".to_string()));
            }
        }
        let Some(existing) = self.current(&key.0, &key.1) else {
            return Err(Self::not_found(&key.0, &key.1));
        };
        let mut value = serde_json::to_value(&existing)?;
        merge_patch(&mut value, &serde_json::json!({ "status": status }));
        let patched: K = serde_json::from_value(value)?;
        self.objects.lock().insert(key, patched);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub name: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

#[async_trait]
impl EventRecorder for RecordingEvents {
    async fn publish(
        &self,
        regarding: ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.events.lock().push(RecordedEvent {
            name: regarding.name.unwrap_or_default(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
