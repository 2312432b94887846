//! Operator-wide configuration
//!
//! Populated once from CLI flags and environment at startup and shared
//! read-only by the store, derivation, and every reconciler.

use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_CONTROLLER_NAME: &str = "k8s.ngrok.com/ingress-controller";
pub const DEFAULT_API_URL: &str = "https://api.ngrok.com";
pub const DEFAULT_DESCRIPTION: &str = "Created by the ngrok-operator";
pub const DEFAULT_SYNC_DEBOUNCE: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// `spec.controller` value of the IngressClasses we own
    pub controller_name: String,
    /// Name of this operator deployment, stamped on derived objects
    pub manager_name: String,
    pub namespace: String,
    pub api_key: String,
    pub api_url: String,
    pub region: String,
    pub election_id: String,
    pub sync_debounce: Duration,
    /// Concurrent reconciles per kind
    pub workers: u16,
    pub enable_gateway: bool,
    pub json_logs: bool,
    pub description: String,
    pub metadata: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            manager_name: "ngrok-operator".to_string(),
            namespace: String::new(),
            api_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            region: String::new(),
            election_id: "ngrok-operator-leader".to_string(),
            sync_debounce: DEFAULT_SYNC_DEBOUNCE,
            workers: 1,
            enable_gateway: false,
            json_logs: false,
            description: DEFAULT_DESCRIPTION.to_string(),
            metadata: "{\"owned-by\":\"ngrok-operator\"}".to_string(),
        }
    }
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::ConfigError(
                "NGROK_API_KEY is required but was not provided".to_string(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::ConfigError(
                "POD_NAMESPACE is required but was not provided".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(Error::ConfigError("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> OperatorConfig {
        OperatorConfig {
            namespace: "ngrok-operator".to_string(),
            api_key: "key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let missing_key = OperatorConfig {
            api_key: "  ".to_string(),
            ..valid()
        };
        let err = missing_key.validate().unwrap_err();
        assert!(err.to_string().contains("NGROK_API_KEY"));

        let missing_ns = OperatorConfig {
            namespace: String::new(),
            ..valid()
        };
        assert!(matches!(missing_ns.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_defaults() {
        let cfg = OperatorConfig::default();
        assert_eq!(cfg.controller_name, "k8s.ngrok.com/ingress-controller");
        assert_eq!(cfg.sync_debounce, Duration::from_secs(10));
        assert_eq!(cfg.workers, 1);
    }
}
