use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressClass, IngressClassSpec,
    IngressRule, IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use super::*;
use crate::crd::{DomainStatus, TunnelSpec};
use crate::testing::{FakeResources, RecordingEvents};

const CONTROLLER: &str = "k8s.ngrok.com/ingress-controller";

fn ingress_class(name: &str, controller: &str, default: bool) -> IngressClass {
    let mut annotations = BTreeMap::new();
    if default {
        annotations.insert(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string());
    }
    IngressClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(IngressClassSpec {
            controller: Some(controller.to_string()),
            parameters: None,
        }),
    }
}

fn backend(service: &str, port: ServiceBackendPort) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(port),
        }),
        resource: None,
    }
}

fn number(n: i32) -> ServiceBackendPort {
    ServiceBackendPort {
        number: Some(n),
        name: None,
    }
}

fn ingress(name: &str, class: Option<&str>, rules: &[(&str, &str, ServiceBackendPort)]) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("test".to_string()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: class.map(str::to_string),
            rules: Some(
                rules
                    .iter()
                    .map(|(host, service, port)| IngressRule {
                        host: Some(host.to_string()),
                        http: Some(HTTPIngressRuleValue {
                            paths: vec![HTTPIngressPath {
                                path: Some("/".to_string()),
                                path_type: "Prefix".to_string(),
                                backend: backend(service, port.clone()),
                            }],
                        }),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

fn cfg() -> DeriveConfig {
    DeriveConfig {
        manager_name: "ngrok-operator".to_string(),
        manager_namespace: "ngrok".to_string(),
        ..Default::default()
    }
}

fn tunnel(namespace: &str, name: &str) -> Tunnel {
    let mut t = Tunnel::new(name, TunnelSpec::default());
    t.metadata.namespace = Some(namespace.to_string());
    t
}

#[test]
fn test_list_is_sorted_by_key() {
    let store = Store::new(CONTROLLER);
    store.update(tunnel("b", "x"));
    store.update(tunnel("a", "z"));
    store.update(tunnel("a", "y"));

    let keys: Vec<String> = store
        .list::<Tunnel>()
        .iter()
        .map(|t| store_key(t.metadata.namespace.as_deref(), &t.name_any()))
        .collect();
    assert_eq!(keys, vec!["a/y", "a/z", "b/x"]);
}

#[test]
fn test_get_missing_is_typed_error() {
    let store = Store::new(CONTROLLER);
    let err = store.get::<Tunnel>("missing", Some("test")).unwrap_err();
    assert!(matches!(err, Error::NotFoundInStore { kind: "Tunnel", .. }));
    assert!(store.find::<Tunnel>("missing", "test").is_none());
}

#[test]
fn test_update_and_delete_are_idempotent() {
    let store = Store::new(CONTROLLER);
    store.update(tunnel("test", "a"));
    store.update(tunnel("test", "a"));
    assert_eq!(store.list::<Tunnel>().len(), 1);

    store.delete(&tunnel("test", "a"));
    store.delete(&tunnel("test", "a"));
    assert!(store.list::<Tunnel>().is_empty());
}

#[test]
fn test_cluster_scoped_key_is_bare_name() {
    assert_eq!(store_key(None, "ngrok"), "ngrok");
    assert_eq!(store_key(Some("test"), "ngrok"), "test/ngrok");
}

#[test]
fn test_no_ingress_class_at_all() {
    let store = Store::new(CONTROLLER);
    let ing = ingress("a", Some("ngrok"), &[]);
    store.update(ing.clone());

    assert!(matches!(
        store.ingress_class_membership(&ing),
        Err(Error::IngressClassNotFound)
    ));
    assert!(store.list_our_ingresses().is_empty());
}

#[test]
fn test_class_membership() {
    let store = Store::new(CONTROLLER);
    store.update(ingress_class("ngrok", CONTROLLER, false));
    store.update(ingress_class("nginx", "k8s.io/ingress-nginx", true));

    let explicit = ingress("explicit", Some("ngrok"), &[("a.example.com", "svc", number(80))]);
    let other = ingress("other", Some("nginx"), &[("a.example.com", "svc", number(80))]);
    let unset = ingress("unset", None, &[("a.example.com", "svc", number(80))]);
    let mut legacy = ingress("legacy", None, &[("a.example.com", "svc", number(80))]);
    legacy
        .annotations_mut()
        .insert(INGRESS_CLASS_ANNOTATION.to_string(), "ngrok".to_string());

    for ing in [&explicit, &other, &unset, &legacy] {
        store.update(ing.clone());
    }

    assert!(store.ingress_class_membership(&explicit).is_ok());
    assert!(store.ingress_class_membership(&legacy).is_ok());
    assert!(matches!(
        store.ingress_class_membership(&other),
        Err(Error::DifferentIngressClass(_))
    ));
    assert!(matches!(
        store.ingress_class_membership(&unset),
        Err(Error::NoDefaultIngressClassFound)
    ));

    let ours: Vec<String> = store.list_our_ingresses().iter().map(|i| i.name_any()).collect();
    assert_eq!(ours, vec!["explicit", "legacy"]);
}

#[test]
fn test_default_class_claims_unclassed_ingress() {
    let store = Store::new(CONTROLLER);
    store.update(ingress_class("ngrok", CONTROLLER, true));
    let unset = ingress("unset", None, &[("a.example.com", "svc", number(80))]);
    store.update(unset.clone());

    assert!(store.ingress_class_membership(&unset).is_ok());
    assert_eq!(store.list_our_ingresses().len(), 1);
}

#[test]
fn test_named_port_resolves_through_service() {
    let store = Store::new(CONTROLLER);
    store.update(ingress_class("ngrok", CONTROLLER, true));
    store.update(Service {
        metadata: ObjectMeta {
            name: Some("api".to_string()),
            namespace: Some("test".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("grpc".to_string()),
                port: 9000,
                app_protocol: Some("k8s.ngrok.com/http2".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    });
    let named = ServiceBackendPort {
        number: None,
        name: Some("grpc".to_string()),
    };
    store.update(ingress("api", None, &[("api.example.com", "api", named)]));

    let desired = derive(&store, &cfg());
    assert_eq!(desired.tunnels.len(), 1);
    let tunnel = &desired.tunnels[0];
    assert_eq!(tunnel.name_any(), "api-9000");
    assert_eq!(tunnel.spec.backend.as_ref().map(|b| b.protocol.as_str()), Some("HTTP2"));
    assert_eq!(
        desired.https_edges[0].spec.routes[0].backend.labels.get("port").map(String::as_str),
        Some("9000")
    );
}

#[test]
fn test_unresolvable_named_port_is_skipped() {
    let store = Store::new(CONTROLLER);
    store.update(ingress_class("ngrok", CONTROLLER, true));
    let named = ServiceBackendPort {
        number: None,
        name: Some("missing".to_string()),
    };
    store.update(ingress("api", None, &[("api.example.com", "api", named)]));

    let desired = derive(&store, &cfg());
    assert!(desired.tunnels.is_empty());
    assert!(desired.https_edges[0].spec.routes.is_empty());
}

#[test]
fn test_shared_host_derives_one_domain_in_the_first_namespace() {
    let store = Store::new(CONTROLLER);
    store.update(ingress_class("ngrok", CONTROLLER, true));
    for namespace in ["beta", "alpha"] {
        let mut ing = ingress("web", None, &[("shared.example.com", "web", number(80))]);
        ing.metadata.namespace = Some(namespace.to_string());
        store.update(ing);
    }

    let desired = derive(&store, &cfg());
    assert_eq!(desired.domains.len(), 1);
    assert_eq!(desired.domains[0].namespace().as_deref(), Some("alpha"));
    assert_eq!(desired.https_edges.len(), 1);
    assert_eq!(desired.tunnels.len(), 2);
}

struct DriverHarness {
    store: Arc<Store>,
    domains: Arc<FakeResources<Domain>>,
    https_edges: Arc<FakeResources<HttpsEdge>>,
    tunnels: Arc<FakeResources<Tunnel>>,
    ingresses: Arc<FakeResources<Ingress>>,
    events: Arc<RecordingEvents>,
    driver: Driver,
}

fn driver_harness() -> DriverHarness {
    let store = Arc::new(Store::new(CONTROLLER));
    store.update(ingress_class("ngrok", CONTROLLER, true));
    let domains = Arc::new(FakeResources::<Domain>::default());
    let https_edges = Arc::new(FakeResources::<HttpsEdge>::default());
    let tunnels = Arc::new(FakeResources::<Tunnel>::default());
    let ingresses = Arc::new(FakeResources::<Ingress>::default());
    let events = Arc::new(RecordingEvents::default());
    let driver = Driver::new(
        store.clone(),
        cfg(),
        DriverClients {
            domains: domains.clone(),
            https_edges: https_edges.clone(),
            tunnels: tunnels.clone(),
            ingresses: ingresses.clone(),
            events: events.clone(),
        },
        Duration::ZERO,
    );
    DriverHarness {
        store,
        domains,
        https_edges,
        tunnels,
        ingresses,
        events,
        driver,
    }
}

impl DriverHarness {
    fn add_ingress(&self, ing: Ingress) {
        self.store.update(ing.clone());
        self.ingresses.insert(ing);
    }
}

#[tokio::test]
async fn test_sync_creates_then_converges() {
    let h = driver_harness();
    h.add_ingress(ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]));

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report.created, 3);
    assert!(h.domains.current("test", "example-com").is_some());
    assert!(h.https_edges.current("test", "example-com").is_some());
    assert!(h.tunnels.current("test", "example-80").is_some());

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report, SyncReport::default());
}

#[tokio::test]
async fn test_sync_collects_garbage_except_domains() {
    let h = driver_harness();
    let ing = ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]);
    h.add_ingress(ing.clone());
    h.driver.sync().await.unwrap();

    let mut foreign = tunnel("test", "hand-made");
    foreign.spec.forwards_to = "hand-made.test.svc.cluster.local:80".to_string();
    h.tunnels.insert(foreign);

    h.store.delete(&ing);
    let report = h.driver.sync().await.unwrap();

    assert_eq!(report.deleted, 2);
    assert!(h.domains.current("test", "example-com").is_some());
    assert!(h.https_edges.current("test", "example-com").is_none());
    assert!(h.tunnels.current("test", "example-80").is_none());
    assert!(h.tunnels.current("test", "hand-made").is_some());
}

#[tokio::test]
async fn test_sync_updates_changed_spec() {
    let h = driver_harness();
    h.add_ingress(ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]));
    h.driver.sync().await.unwrap();

    h.add_ingress(ingress("web", Some("ngrok"), &[("example.com", "example", number(8080))]));
    let report = h.driver.sync().await.unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 1);
    let edge = h.https_edges.current("test", "example-com").unwrap();
    assert_eq!(
        edge.spec.routes[0].backend.labels.get("port").map(String::as_str),
        Some("8080")
    );
}

#[tokio::test]
async fn test_sync_publishes_ingress_status_once_domain_is_ready() {
    let h = driver_harness();
    h.add_ingress(ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]));
    h.driver.sync().await.unwrap();

    let status = |h: &DriverHarness| {
        h.ingresses
            .current("test", "web")
            .and_then(|i| i.status)
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default()
    };
    assert!(status(&h).is_empty());

    let mut domain = h.domains.current("test", "example-com").unwrap();
    domain.status = Some(DomainStatus {
        id: "rd_1".to_string(),
        cname_target: Some("abc.cname.ngrok.app".to_string()),
        ..Default::default()
    });
    h.store.update(domain);

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report.statuses, 1);
    assert_eq!(
        status(&h)[0].hostname.as_deref(),
        Some("abc.cname.ngrok.app")
    );
    assert_eq!(h.events.reasons(), vec!["Updated"]);
}

#[tokio::test]
async fn test_sync_leaves_unlabelled_domain_and_still_applies_the_rest() {
    let h = driver_harness();
    let mut retained = Domain::new(
        "example-com",
        crate::crd::DomainSpec {
            domain: "example.com".to_string(),
            reclaim_policy: crate::crd::ReclaimPolicy::Retain,
            ..Default::default()
        },
    );
    retained.metadata.namespace = Some("test".to_string());
    h.domains.insert(retained);
    h.add_ingress(ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]));

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.created, 2);
    assert!(h.https_edges.current("test", "example-com").is_some());
    assert!(h.tunnels.current("test", "example-80").is_some());

    let domain = h.domains.current("test", "example-com").unwrap();
    assert_eq!(domain.spec.reclaim_policy, crate::crd::ReclaimPolicy::Retain);
    assert!(domain.labels().is_empty());

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report, SyncReport::default());
}

#[tokio::test]
async fn test_sync_adopts_unlabelled_tunnel_of_the_same_name() {
    let h = driver_harness();
    h.tunnels.insert(tunnel("test", "example-80"));
    h.add_ingress(ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]));

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.created, 2);
    assert_eq!(report.updated, 1);

    let adopted = h.tunnels.current("test", "example-80").unwrap();
    assert_eq!(adopted.spec.forwards_to, "example.test.svc.cluster.local:80");
    assert_eq!(
        adopted.labels().get(LABEL_CONTROLLER_NAME).map(String::as_str),
        Some("ngrok-operator")
    );
}

#[tokio::test]
async fn test_sync_reports_ingress_of_another_class_once() {
    let h = driver_harness();
    h.store.update(ingress_class("nginx", "k8s.io/ingress-nginx", false));
    h.add_ingress(ingress("other", Some("nginx"), &[("example.com", "example", number(80))]));

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report.events, 1);
    assert_eq!(report.created, 0);
    h.driver.sync().await.unwrap();

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "other");
    assert_eq!(events[0].event_type, crate::controller::kube_io::EventType::Normal);
    assert_eq!(events[0].reason, "Update");
}

#[tokio::test]
async fn test_sync_warns_when_no_default_class_claims_an_ingress() {
    let h = driver_harness();
    h.store.update(ingress_class("ngrok", CONTROLLER, false));
    h.add_ingress(ingress("unset", None, &[("example.com", "example", number(80))]));

    h.driver.sync().await.unwrap();

    assert_eq!(h.events.reasons(), vec!["NoDefaultIngressClassFound".to_string()]);
    assert_eq!(
        h.events.events()[0].event_type,
        crate::controller::kube_io::EventType::Warning
    );
}

#[tokio::test]
async fn test_sync_rejects_invalid_ingress_and_reports_it() {
    let h = driver_harness();
    let mut hostless = ingress("hostless", Some("ngrok"), &[("example.com", "example", number(80))]);
    if let Some(rules) = hostless.spec.as_mut().and_then(|s| s.rules.as_mut()) {
        rules[0].host = None;
    }
    h.add_ingress(hostless);

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report.created, 0);
    assert!(h.tunnels.all().is_empty());

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "InvalidIngressSpec");
    assert!(events[0].message.contains("rule 0 has no host"));

    h.driver.sync().await.unwrap();
    assert_eq!(h.events.events().len(), 1);
}

#[tokio::test]
async fn test_sync_reports_invalid_annotation_but_keeps_the_ingress() {
    let h = driver_harness();
    let mut ing = ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]);
    ing.annotations_mut()
        .insert("k8s.ngrok.com/https-compression".to_string(), "maybe".to_string());
    h.add_ingress(ing);

    let report = h.driver.sync().await.unwrap();
    assert_eq!(report.created, 3);

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "InvalidIngressSpec");
    assert!(events[0].message.contains("k8s.ngrok.com/https-compression"));
    let edge = h.https_edges.current("test", "example-com").unwrap();
    assert!(edge.spec.routes[0].compression.is_none());
}

#[test]
fn test_validate_ingress() {
    let valid = ingress("web", Some("ngrok"), &[("example.com", "example", number(80))]);
    assert!(validate_ingress(&valid).is_ok());

    let empty = ingress("empty", Some("ngrok"), &[]);
    assert!(matches!(validate_ingress(&empty), Err(Error::InvalidIngressSpec(_))));

    let mut default_backend = valid.clone();
    if let Some(spec) = default_backend.spec.as_mut() {
        spec.default_backend = Some(backend("example", number(80)));
    }
    let err = validate_ingress(&default_backend).unwrap_err();
    assert!(err.to_string().contains("default backend"));
}
