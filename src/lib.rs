//! ngrok-operator: Kubernetes operator for ngrok ingress
//!
//! Projects Ingress, IngressClass and LoadBalancer Service intent onto ngrok
//! reserved domains, edges, tunnels and IP policies, keeping both sides in
//! step under drift and partial failure.

pub mod annotations;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod platform;
pub mod resolvers;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub mod testing;

pub use crate::config::OperatorConfig;
pub use crate::error::{Error, Result};
