//! Typed options parsed from `k8s.ngrok.com/` annotations
//!
//! Each annotation is a zero-sized type implementing [`Annotation`]. An absent
//! annotation parses to [`Error::MissingAnnotation`], which callers read as
//! "feature not requested"; malformed content is
//! [`Error::InvalidAnnotationContent`].

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::ObjectMeta;
use tracing::warn;

use crate::crd::{
    EndpointCompression, EndpointHeaderChanges, EndpointHeaders, EndpointIpPolicy,
    EndpointTlsTermination, ModuleSetModules, NgrokModuleSet, NgrokTrafficPolicy,
};
use crate::error::{Error, Result};

pub const ANNOTATION_PREFIX: &str = "k8s.ngrok.com/";

pub trait Annotation {
    type Value;

    /// Name without the `k8s.ngrok.com/` prefix
    const NAME: &'static str;

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String>;

    fn key() -> String {
        format!("{ANNOTATION_PREFIX}{}", Self::NAME)
    }

    fn parse(meta: &ObjectMeta) -> Result<Self::Value> {
        let key = Self::key();
        let raw = meta
            .annotations
            .as_ref()
            .and_then(|a| a.get(&key))
            .ok_or_else(|| Error::MissingAnnotation(key.clone()))?;
        Self::parse_value(raw).map_err(|reason| Error::InvalidAnnotationContent { name: key, reason })
    }
}

/// `Ok(None)` for a missing annotation, the value otherwise
pub fn parse_optional<A: Annotation>(meta: &ObjectMeta) -> Result<Option<A::Value>> {
    match A::parse(meta) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_missing_annotation() => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_list(raw: &str) -> std::result::Result<Vec<String>, String> {
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err("expected a comma separated list".to_string());
    }
    Ok(items)
}

fn parse_name(raw: &str) -> std::result::Result<String, String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err("expected a non-empty name".to_string());
    }
    Ok(name.to_string())
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    raw.trim()
        .parse::<bool>()
        .map_err(|_| format!("expected true or false, got {raw:?}"))
}

fn parse_header_map(raw: &str) -> std::result::Result<BTreeMap<String, String>, String> {
    serde_json::from_str(raw).map_err(|e| format!("expected a JSON object of headers: {e}"))
}

/// Comma separated NgrokModuleSet names, applied left to right
pub struct Modules;

impl Annotation for Modules {
    type Value = Vec<String>;
    const NAME: &'static str = "modules";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_list(raw)
    }
}

/// Name of an NgrokTrafficPolicy in the same namespace
pub struct TrafficPolicy;

impl Annotation for TrafficPolicy {
    type Value = String;
    const NAME: &'static str = "traffic-policy";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_name(raw)
    }
}

/// Hostname for a LoadBalancer service, which makes it a TLS edge
pub struct Domain;

impl Annotation for Domain {
    type Value = String;
    const NAME: &'static str = "domain";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_name(raw)
    }
}

pub struct HttpsCompression;

impl Annotation for HttpsCompression {
    type Value = bool;
    const NAME: &'static str = "https-compression";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_bool(raw)
    }
}

pub struct IpPolicyIds;

impl Annotation for IpPolicyIds {
    type Value = Vec<String>;
    const NAME: &'static str = "ip-policy-ids";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_list(raw)
    }
}

pub struct RequestHeadersAdd;

impl Annotation for RequestHeadersAdd {
    type Value = BTreeMap<String, String>;
    const NAME: &'static str = "request-headers-add";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_header_map(raw)
    }
}

pub struct RequestHeadersRemove;

impl Annotation for RequestHeadersRemove {
    type Value = Vec<String>;
    const NAME: &'static str = "request-headers-remove";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_list(raw)
    }
}

pub struct ResponseHeadersAdd;

impl Annotation for ResponseHeadersAdd {
    type Value = BTreeMap<String, String>;
    const NAME: &'static str = "response-headers-add";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_header_map(raw)
    }
}

pub struct ResponseHeadersRemove;

impl Annotation for ResponseHeadersRemove {
    type Value = Vec<String>;
    const NAME: &'static str = "response-headers-remove";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        parse_list(raw)
    }
}

pub struct TlsMinVersion;

impl Annotation for TlsMinVersion {
    type Value = String;
    const NAME: &'static str = "tls-min-version";

    fn parse_value(raw: &str) -> std::result::Result<Self::Value, String> {
        match raw.trim() {
            v @ ("1.0" | "1.1" | "1.2" | "1.3") => Ok(v.to_string()),
            other => Err(format!("unsupported TLS version {other:?}")),
        }
    }
}

/// Log and drop an invalid annotation; a missing one is silent
fn feature<A: Annotation>(meta: &ObjectMeta) -> Option<A::Value> {
    parse_optional::<A>(meta).unwrap_or_else(|e| {
        warn!("{}/{}: {}", meta.namespace.as_deref().unwrap_or_default(), meta.name.as_deref().unwrap_or_default(), e);
        None
    })
}

fn check<A: Annotation>(meta: &ObjectMeta, errors: &mut Vec<Error>) {
    if let Err(e) = parse_optional::<A>(meta) {
        errors.push(e);
    }
}

/// Parse errors of every present annotation, in a fixed order
pub fn invalid_annotations(meta: &ObjectMeta) -> Vec<Error> {
    let mut errors = Vec::new();
    check::<Modules>(meta, &mut errors);
    check::<TrafficPolicy>(meta, &mut errors);
    check::<HttpsCompression>(meta, &mut errors);
    check::<IpPolicyIds>(meta, &mut errors);
    check::<RequestHeadersAdd>(meta, &mut errors);
    check::<RequestHeadersRemove>(meta, &mut errors);
    check::<ResponseHeadersAdd>(meta, &mut errors);
    check::<ResponseHeadersRemove>(meta, &mut errors);
    check::<TlsMinVersion>(meta, &mut errors);
    errors
}

fn header_changes(
    add: Option<BTreeMap<String, String>>,
    remove: Option<Vec<String>>,
) -> Option<EndpointHeaderChanges> {
    if add.is_none() && remove.is_none() {
        return None;
    }
    Some(EndpointHeaderChanges {
        add: add.unwrap_or_default(),
        remove: remove.unwrap_or_default(),
    })
}

/// Modules requested through the per-feature annotations
pub fn legacy_modules(meta: &ObjectMeta) -> ModuleSetModules {
    let mut modules = ModuleSetModules {
        compression: feature::<HttpsCompression>(meta).map(|enabled| EndpointCompression { enabled }),
        ip_restriction: feature::<IpPolicyIds>(meta).map(|policies| EndpointIpPolicy { policies }),
        tls_termination: feature::<TlsMinVersion>(meta).map(|v| EndpointTlsTermination {
            min_version: Some(v),
            ..Default::default()
        }),
        ..Default::default()
    };

    let request = header_changes(
        feature::<RequestHeadersAdd>(meta),
        feature::<RequestHeadersRemove>(meta),
    );
    let response = header_changes(
        feature::<ResponseHeadersAdd>(meta),
        feature::<ResponseHeadersRemove>(meta),
    );
    if request.is_some() || response.is_some() {
        modules.headers = Some(EndpointHeaders { request, response });
    }
    modules
}

/// Legacy annotations first, then each referenced module set in order.
/// Unknown module set names are skipped with a warning.
pub fn extract_modules<F>(meta: &ObjectMeta, lookup: F) -> ModuleSetModules
where
    F: Fn(&str) -> Option<Arc<NgrokModuleSet>>,
{
    let mut modules = legacy_modules(meta);
    for name in feature::<Modules>(meta).unwrap_or_default() {
        match lookup(&name) {
            Some(set) => modules.merge(&set.spec.modules),
            None => warn!(
                "NgrokModuleSet {}/{} referenced by {} not found",
                meta.namespace.as_deref().unwrap_or_default(),
                name,
                meta.name.as_deref().unwrap_or_default()
            ),
        }
    }
    modules
}

/// Policy document of the referenced NgrokTrafficPolicy, if any
pub fn extract_traffic_policy<F>(meta: &ObjectMeta, lookup: F) -> Option<serde_json::Value>
where
    F: Fn(&str) -> Option<Arc<NgrokTrafficPolicy>>,
{
    let name = feature::<TrafficPolicy>(meta)?;
    match lookup(&name) {
        Some(policy) => Some(policy.spec.policy.clone()),
        None => {
            warn!(
                "NgrokTrafficPolicy {}/{} not found",
                meta.namespace.as_deref().unwrap_or_default(),
                name
            );
            None
        }
    }
}
