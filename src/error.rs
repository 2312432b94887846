//! Error types for the ngrok operator

use thiserror::Error;

use crate::platform::{codes, PlatformError};

#[derive(Error, Debug)]
pub enum Error {
    /// Lookup missed in the in-memory store
    #[error("{kind} {key} not found in store")]
    NotFoundInStore { kind: &'static str, key: String },

    /// No IngressClass exists at all
    #[error("no IngressClass found")]
    IngressClassNotFound,

    /// The object belongs to another controller
    #[error("{0} is managed by a different ingress class")]
    DifferentIngressClass(String),

    /// The ingress has no class and we own no default class
    #[error("no default IngressClass owned by this controller")]
    NoDefaultIngressClassFound,

    #[error("invalid ingress spec: {0}")]
    InvalidIngressSpec(String),

    /// Optional feature not requested
    #[error("annotation {0} is missing")]
    MissingAnnotation(String),

    #[error("annotation {name} has invalid content: {reason}")]
    InvalidAnnotationContent { name: String, reason: String },

    #[error("secret {namespace}/{name} is missing key {key}")]
    MissingRequiredSecret {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("not all domains are ready yet")]
    NotAllDomainsReadyYet,

    #[error("invalid CIDR {0}")]
    InvalidCidr(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("ngrok API error: {0}")]
    PlatformError(#[from] PlatformError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("lost leadership of lease {0}")]
    LeadershipLost(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Errors worth retrying with backoff
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::NotAllDomainsReadyYet
            | Error::NotFoundInStore { .. }
            | Error::InvalidCidr(_) => true,
            Error::KubeError(_) => true,
            Error::PlatformError(e) => !matches!(e, PlatformError::Decode(_)),
            _ => false,
        }
    }

    /// Errors that no amount of retrying will fix
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::InvalidIngressSpec(_)
                | Error::InvalidAnnotationContent { .. }
                | Error::MissingRequiredSecret { .. }
                | Error::InvalidConfiguration(_)
                | Error::ConfigError(_)
        )
    }

    /// Whether the error means "feature not requested"
    pub fn is_missing_annotation(&self) -> bool {
        matches!(self, Error::MissingAnnotation(_))
    }

    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, Error::PlatformError(e) if e.is_not_found())
    }

    /// Known transient platform conflicts
    pub fn is_remote_retryable_code(&self) -> bool {
        matches!(self, Error::PlatformError(e) if e.is_error_code(codes::RETRYABLE))
    }

    /// Message suitable for a status condition or event
    pub fn sanitized_message(&self) -> String {
        match self {
            Error::PlatformError(e) => e.sanitized_message(),
            other => other.to_string(),
        }
    }
}
