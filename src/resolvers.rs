//! Name to ID indirection for IP policies and secret key lookups
//!
//! Each resolver has a cluster-backed implementation and a static one that
//! tests can populate directly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

use crate::crd::IpPolicy;
use crate::error::{Error, Result};

const IP_POLICY_ID_PREFIX: &str = "ipp_";
const IP_POLICY_ID_LEN: usize = 31;

/// Whether a string is shaped like a platform IP policy ID rather than a name
pub fn is_ip_policy_id(s: &str) -> bool {
    s.starts_with(IP_POLICY_ID_PREFIX) && s.len() == IP_POLICY_ID_LEN
}

#[async_trait]
pub trait IpPolicyResolver: Send + Sync {
    /// Map IPPolicy names in `namespace` to platform IDs. Unknown names pass
    /// through unchanged and are assumed to already be IDs.
    async fn resolve(&self, namespace: &str, names: &[String]) -> Result<Vec<String>>;

    /// Check that every name which isn't ID-shaped refers to an IPPolicy
    async fn validate(&self, namespace: &str, names: &[String]) -> Result<()>;
}

#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String>;
}

pub struct KubeIpPolicyResolver {
    client: Client,
}

impl KubeIpPolicyResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn lookup(&self, namespace: &str, name: &str) -> Result<Option<IpPolicy>> {
        let api: Api<IpPolicy> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Status ID of a found policy; a policy not yet created upstream has none
fn policy_id(namespace: &str, name: &str, policy: &IpPolicy) -> Result<String> {
    policy
        .status
        .as_ref()
        .map(|s| s.id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::NotFoundInStore {
            kind: "IPPolicy ID",
            key: format!("{namespace}/{name}"),
        })
}

#[async_trait]
impl IpPolicyResolver for KubeIpPolicyResolver {
    async fn resolve(&self, namespace: &str, names: &[String]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            if is_ip_policy_id(name) {
                ids.push(name.clone());
                continue;
            }
            match self.lookup(namespace, name).await? {
                Some(policy) => ids.push(policy_id(namespace, name, &policy)?),
                None => {
                    debug!("IPPolicy {}/{} not found, using name as ID", namespace, name);
                    ids.push(name.clone());
                }
            }
        }
        Ok(ids)
    }

    async fn validate(&self, namespace: &str, names: &[String]) -> Result<()> {
        for name in names.iter().filter(|n| !is_ip_policy_id(n)) {
            if self.lookup(namespace, name).await?.is_none() {
                return Err(Error::NotFoundInStore {
                    kind: "IPPolicy",
                    key: format!("{namespace}/{name}"),
                });
            }
        }
        Ok(())
    }
}

pub struct KubeSecretResolver {
    client: Client,
}

impl KubeSecretResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretResolver for KubeSecretResolver {
    async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let missing = || Error::MissingRequiredSecret {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        };

        let secret = api.get_opt(name).await?.ok_or_else(missing)?;
        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
            return Ok(String::from_utf8_lossy(&bytes.0).into_owned());
        }
        secret
            .string_data
            .as_ref()
            .and_then(|d| d.get(key))
            .cloned()
            .ok_or_else(missing)
    }
}

/// Resolver backed by a fixed `namespace/name -> id` table
#[derive(Clone, Debug, Default)]
pub struct StaticIpPolicyResolver {
    ids: BTreeMap<(String, String), String>,
}

impl StaticIpPolicyResolver {
    pub fn with_policy(mut self, namespace: &str, name: &str, id: &str) -> Self {
        self.ids
            .insert((namespace.to_string(), name.to_string()), id.to_string());
        self
    }
}

#[async_trait]
impl IpPolicyResolver for StaticIpPolicyResolver {
    async fn resolve(&self, namespace: &str, names: &[String]) -> Result<Vec<String>> {
        Ok(names
            .iter()
            .map(|name| {
                self.ids
                    .get(&(namespace.to_string(), name.clone()))
                    .cloned()
                    .unwrap_or_else(|| name.clone())
            })
            .collect())
    }

    async fn validate(&self, namespace: &str, names: &[String]) -> Result<()> {
        for name in names.iter().filter(|n| !is_ip_policy_id(n)) {
            if !self.ids.contains_key(&(namespace.to_string(), name.clone())) {
                return Err(Error::NotFoundInStore {
                    kind: "IPPolicy",
                    key: format!("{namespace}/{name}"),
                });
            }
        }
        Ok(())
    }
}

/// Resolver backed by a fixed `namespace/name/key -> value` table
#[derive(Clone, Debug, Default)]
pub struct StaticSecretResolver {
    values: BTreeMap<(String, String, String), String>,
}

impl StaticSecretResolver {
    pub fn with_secret(mut self, namespace: &str, name: &str, key: &str, value: &str) -> Self {
        self.values.insert(
            (namespace.to_string(), name.to_string(), key.to_string()),
            value.to_string(),
        );
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        self.values
            .get(&(namespace.to_string(), name.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| Error::MissingRequiredSecret {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            })
    }
}
