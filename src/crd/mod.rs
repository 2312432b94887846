//! Custom Resource Definitions for the ngrok operator
//!
//! Edges, domains, tunnels, IP policies, module sets and traffic policies in
//! the `ingress.k8s.ngrok.com` group, plus a read-only view of Gateway API
//! gateways.

mod domain;
mod gateway;
mod https_edge;
mod ip_policy;
mod module_set;
mod tcp_edge;
mod tls_edge;
mod tunnel;
pub mod types;


pub use domain::*;
pub use gateway::{Gateway, GatewayListener, GatewaySpec};
pub use https_edge::*;
pub use ip_policy::*;
pub use module_set::*;
pub use tcp_edge::*;
pub use tls_edge::*;
pub use tunnel::*;
pub use types::*;
