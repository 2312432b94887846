//! Ingress problems surfaced as Events instead of reconcile errors

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

use super::{key_of, Store};
use crate::annotations;
use crate::controller::kube_io::{object_ref, reasons, EventType};
use crate::error::{Error, Result};

/// One event to record on an ingress
#[derive(Clone, Debug)]
pub struct IngressProblem {
    /// `namespace/name` of the ingress
    pub key: String,
    pub regarding: ObjectReference,
    pub event_type: EventType,
    pub reason: &'static str,
    pub message: String,
}

impl IngressProblem {
    fn new(ingress: &Ingress, event_type: EventType, reason: &'static str, message: String) -> Self {
        Self {
            key: key_of(ingress),
            regarding: object_ref(ingress),
            event_type,
            reason,
            message,
        }
    }

    /// Identity used to report a problem only once
    pub fn fingerprint(&self) -> (String, &'static str, String) {
        (self.key.clone(), self.reason, self.message.clone())
    }
}

/// Shape checks an ingress must pass before anything is derived from it
pub fn validate_ingress(ingress: &Ingress) -> Result<()> {
    let mut problems = Vec::new();
    let spec = ingress.spec.as_ref();

    if spec.is_some_and(|s| s.default_backend.is_some()) {
        problems.push("a default backend is not supported".to_string());
    }

    let rules = spec.and_then(|s| s.rules.as_deref()).unwrap_or_default();
    if rules.is_empty() {
        problems.push("at least one rule is required".to_string());
    }
    for (i, rule) in rules.iter().enumerate() {
        if rule.host.as_deref().map_or(true, str::is_empty) {
            problems.push(format!("rule {i} has no host"));
        }
        let paths = rule.http.as_ref().map(|h| h.paths.as_slice()).unwrap_or_default();
        for path in paths {
            if path.backend.service.is_none() {
                problems.push(format!(
                    "path {} of rule {i} has no service backend",
                    path.path.as_deref().unwrap_or("/")
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidIngressSpec(problems.join("; ")))
    }
}

/// Every ingress in the store that should carry a warning or notice
pub fn audit_ingresses(store: &Store) -> Vec<IngressProblem> {
    let mut problems = Vec::new();
    for ingress in store.list::<Ingress>() {
        match store.ingress_class_membership(&ingress) {
            Ok(()) => {}
            // No classes at all yet: nothing to say about any single ingress
            Err(Error::IngressClassNotFound) => continue,
            Err(e @ Error::DifferentIngressClass(_)) => {
                problems.push(IngressProblem::new(&ingress, EventType::Normal, reasons::UPDATE, format!("Skipping: {e}")));
                continue;
            }
            Err(e @ Error::NoDefaultIngressClassFound) => {
                problems.push(IngressProblem::new(
                    &ingress,
                    EventType::Warning,
                    reasons::NO_DEFAULT_INGRESS_CLASS_FOUND,
                    e.to_string(),
                ));
                continue;
            }
            Err(e) => {
                tracing::debug!("Class membership of {} unknown: {}", ingress.name_any(), e);
                continue;
            }
        }

        if let Err(e) = validate_ingress(&ingress) {
            problems.push(IngressProblem::new(
                &ingress,
                EventType::Warning,
                reasons::INVALID_INGRESS_SPEC,
                e.to_string(),
            ));
            continue;
        }

        for e in annotations::invalid_annotations(&ingress.metadata) {
            problems.push(IngressProblem::new(
                &ingress,
                EventType::Warning,
                reasons::INVALID_INGRESS_SPEC,
                e.to_string(),
            ));
        }
    }
    problems
}
