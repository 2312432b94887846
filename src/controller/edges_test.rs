//! TLSEdge and TCPEdge reconcilers

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;

use super::kube_io::ResourceClient;
use super::requeue::ReconcileOutcome;
use super::route_modules::ModuleReconciler;
use super::tcp_edge::{AddrOwner, OwnerKey, TcpEdgeReconciler};
use super::tls_edge::{host_of, TlsEdgeReconciler};
use crate::crd::{
    Domain, DomainStatus, EndpointIpPolicy, TcpEdge, TcpEdgeSpec, TlsEdge, TlsEdgeSpec,
    TunnelGroupBackend,
};
use crate::platform::ReservedAddr;
use crate::resolvers::{StaticIpPolicyResolver, StaticSecretResolver};
use crate::testing::{FakeNgrok, FakeResources, RecordingEvents};

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        generation: Some(1),
        ..Default::default()
    }
}

fn backend() -> TunnelGroupBackend {
    TunnelGroupBackend {
        labels: [
            ("namespace".to_string(), "default".to_string()),
            ("service".to_string(), "db".to_string()),
            ("port".to_string(), "5432".to_string()),
        ]
        .into(),
        ..Default::default()
    }
}

fn modules(ngrok: &Arc<FakeNgrok>, events: &Arc<RecordingEvents>) -> ModuleReconciler {
    ModuleReconciler::new(
        ngrok.clone(),
        Arc::new(StaticSecretResolver::default()),
        Arc::new(StaticIpPolicyResolver::default().with_policy("default", "office", "ipp_office")),
        events.clone(),
    )
}

#[test]
fn test_host_of() {
    assert_eq!(host_of("app.example.com:443"), "app.example.com");
    assert_eq!(host_of("app.example.com"), "app.example.com");
}

#[tokio::test]
async fn test_tls_edge_creates_domain_and_edge() {
    let edges = Arc::new(FakeResources::with([TlsEdge {
        metadata: meta("db"),
        spec: TlsEdgeSpec {
            hostports: vec!["db.example.com:443".to_string()],
            backend: backend(),
            ..Default::default()
        },
        status: None,
    }]));
    let domains = Arc::new(FakeResources::<Domain>::default());
    let events = Arc::new(RecordingEvents::default());
    let ngrok = Arc::new(FakeNgrok::default());
    let reconciler = TlsEdgeReconciler::new(
        edges.clone(),
        domains.clone(),
        events.clone(),
        ngrok.clone(),
        modules(&ngrok, &events),
    );

    // First pass reserves the domain and waits for it
    assert_eq!(
        reconciler.reconcile("default", "db").await.unwrap(),
        ReconcileOutcome::Backoff
    );
    let domain = domains.current("default", "db-example-com").unwrap();
    assert_eq!(domain.spec.domain, "db.example.com");
    assert!(ngrok.tls_edges().is_empty());
    assert!(edges.current("default", "db").unwrap().status.is_none());

    // Domain reports a CNAME target once reserved
    let mut domain = domain;
    domain.status = Some(DomainStatus {
        id: "rd_1".to_string(),
        cname_target: Some("xyz.cname.ngrok.app".to_string()),
        ..Default::default()
    });
    domains.insert(domain);

    assert_eq!(
        reconciler.reconcile("default", "db").await.unwrap(),
        ReconcileOutcome::Done
    );
    let status = edges.current("default", "db").unwrap().status.unwrap();
    assert!(status.id.starts_with("edgtls_"));
    assert!(status.backend.id.starts_with("bkdtg_"));
    assert_eq!(
        status.cname_targets.get("db.example.com").map(String::as_str),
        Some("xyz.cname.ngrok.app")
    );
    let remote = &ngrok.tls_edges()[0];
    assert_eq!(remote.backend.as_ref().unwrap().backend.id, status.backend.id);

    ngrok.clear_writes();
    reconciler.reconcile("default", "db").await.unwrap();
    assert!(ngrok.writes().is_empty());
    assert_eq!(domains.all().len(), 1);
}

fn tcp_edge(name: &str, owner: Option<&str>) -> TcpEdge {
    let mut metadata = meta(name);
    metadata.owner_references = owner.map(|svc| {
        vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            name: svc.to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            ..Default::default()
        }]
    });
    TcpEdge {
        metadata,
        spec: TcpEdgeSpec {
            backend: backend(),
            ip_restriction: Some(EndpointIpPolicy {
                policies: vec!["office".to_string()],
            }),
            ..Default::default()
        },
        status: None,
    }
}

fn tcp_reconciler(
    edges: &Arc<FakeResources<TcpEdge>>,
    ngrok: &Arc<FakeNgrok>,
) -> TcpEdgeReconciler {
    let events = Arc::new(RecordingEvents::default());
    TcpEdgeReconciler::new(
        edges.clone(),
        events.clone(),
        ngrok.clone(),
        modules(ngrok, &events),
        String::new(),
    )
}

#[tokio::test]
async fn test_tcp_edge_reserves_address_and_attaches_modules() {
    let edges = Arc::new(FakeResources::with([tcp_edge("db", None)]));
    let ngrok = Arc::new(FakeNgrok::default());
    let reconciler = tcp_reconciler(&edges, &ngrok);

    reconciler.reconcile("default", "db").await.unwrap();

    let status = edges.current("default", "db").unwrap().status.unwrap();
    let addrs = ngrok.addrs();
    assert_eq!(addrs.len(), 1);
    assert_eq!(status.hostports, vec![addrs[0].addr.clone()]);
    assert!(addrs[0].metadata.contains("\"name\":\"db\""));

    let remote = &ngrok.tcp_edges()[0];
    assert_eq!(remote.hostports, status.hostports);
    assert_eq!(remote.ip_restriction.as_ref().unwrap().ip_policies[0].id, "ipp_office");

    ngrok.clear_writes();
    reconciler.reconcile("default", "db").await.unwrap();
    assert!(ngrok.writes().is_empty());
}

#[tokio::test]
async fn test_tcp_edge_adopts_reservation_after_restart() {
    let ngrok = Arc::new(FakeNgrok::default());
    ngrok.insert_addr(ReservedAddr {
        id: "ra_old".to_string(),
        addr: "1.tcp.ngrok.io:12345".to_string(),
        metadata: r#"{"namespace":"default","name":"db"}"#.to_string(),
        ..Default::default()
    });
    let edges = Arc::new(FakeResources::with([tcp_edge("db", None)]));
    let reconciler = tcp_reconciler(&edges, &ngrok);

    reconciler.reconcile("default", "db").await.unwrap();

    assert!(!ngrok.writes().iter().any(|w| w == "create_reserved_addr"));
    assert!(ngrok.writes().contains(&"update_reserved_addr ra_old".to_string()));
    let status = edges.current("default", "db").unwrap().status.unwrap();
    assert_eq!(status.hostports, vec!["1.tcp.ngrok.io:12345"]);
    assert_eq!(ngrok.addrs()[0].description, "Reserved for default/db");
}

#[tokio::test]
async fn test_tcp_edge_delete_releases_address() {
    let edges = Arc::new(FakeResources::with([tcp_edge("db", None)]));
    let ngrok = Arc::new(FakeNgrok::default());
    let reconciler = tcp_reconciler(&edges, &ngrok);
    reconciler.reconcile("default", "db").await.unwrap();

    edges.delete("default", "db").await.unwrap();
    reconciler.reconcile("default", "db").await.unwrap();

    assert!(edges.current("default", "db").is_none());
    assert!(ngrok.tcp_edges().is_empty());
    assert!(ngrok.addrs().is_empty());
}

#[test]
fn test_addr_owner_precedence() {
    let by_name = AddrOwner {
        namespace: "default".to_string(),
        name: "db".to_string(),
        owner_ref: None,
    };
    let owned = AddrOwner {
        owner_ref: Some(OwnerKey {
            kind: "Service".to_string(),
            name: "postgres".to_string(),
        }),
        ..by_name.clone()
    };
    let other_namespace = AddrOwner {
        namespace: "prod".to_string(),
        ..by_name.clone()
    };

    assert!(by_name.matches(&by_name));
    assert!(owned.matches(&owned));
    assert!(!by_name.matches(&owned), "owner on either side decides");
    assert!(!owned.matches(&by_name));
    assert!(!by_name.matches(&other_namespace));

    let edge = tcp_edge("db", Some("postgres"));
    assert_eq!(AddrOwner::of(&edge), owned);
}
