//! Reconcilers for the ngrok custom resources and LoadBalancer services
//!
//! Each reconciler runs the shared state machine in [`base`] with its own
//! remote effects, talking to the cluster through [`kube_io`] and to ngrok
//! through [`crate::platform::NgrokApi`].

pub mod backends;
pub mod base;
pub mod conditions;
pub mod domain;
#[cfg(test)]
mod edges_test;
pub mod finalizers;
pub mod https_edge;
pub mod ip_policy;
pub mod ip_policy_rules;
pub mod kube_io;
pub mod requeue;
pub mod route_modules;
pub mod runner;
pub mod service;
pub mod tcp_edge;
pub mod tls_edge;

pub use base::{BaseController, NgrokResource, Op, RemoteLifecycle};
pub use domain::DomainReconciler;
pub use finalizers::FINALIZER;
pub use https_edge::HttpsEdgeReconciler;
pub use ip_policy::IpPolicyReconciler;
pub use kube_io::{EventRecorder, EventType, KubeEventRecorder, KubeResources, ResourceClient};
pub use requeue::{classify, ReconcileOutcome};
pub use runner::run;
pub use service::ServiceReconciler;
pub use tcp_edge::TcpEdgeReconciler;
pub use tls_edge::TlsEdgeReconciler;
