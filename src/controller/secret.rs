//! # Secret Clients
//!
//! Implementations of the [`SecretClient`] contract: one backed by the
//! Kubernetes API for production, one in-memory for tests and dry runs.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

use crate::resource::sensitive::{SecretClient, SecretError, SecretKeySelector, SecretReference};

/// Secret client backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretClient {
    client: Client,
}

impl std::fmt::Debug for KubeSecretClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretClient").finish_non_exhaustive()
    }
}

impl KubeSecretClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, reference: &SecretReference) -> Result<Option<Secret>, SecretError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &reference.namespace);
        api.get_opt(&reference.name)
            .await
            .map_err(|e| SecretError::Access {
                namespace: reference.namespace.clone(),
                name: reference.name.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl SecretClient for KubeSecretClient {
    async fn get_value(&self, selector: &SecretKeySelector) -> Result<Option<Vec<u8>>, SecretError> {
        let Some(secret) = self.fetch(&selector.reference).await? else {
            debug!(
                namespace = %selector.reference.namespace,
                name = %selector.reference.name,
                "secret not found"
            );
            return Ok(None);
        };
        Ok(secret
            .data
            .and_then(|mut data| data.remove(&selector.key))
            .map(|bytes| bytes.0))
    }

    async fn get_data(
        &self,
        reference: &SecretReference,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, SecretError> {
        let Some(secret) = self.fetch(reference).await? else {
            return Ok(None);
        };
        Ok(secret
            .data
            .map(|data| data.into_iter().map(|(k, v)| (k, v.0)).collect()))
    }
}

/// In-memory secret client for tests
#[derive(Debug, Default)]
pub struct InMemorySecretClient {
    secrets: Mutex<HashMap<(String, String), BTreeMap<String, Vec<u8>>>>,
}

impl InMemorySecretClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) {
        self.secrets
            .lock()
            .expect("secret map mutex poisoned")
            .insert((namespace.to_string(), name.to_string()), data);
    }
}

#[async_trait]
impl SecretClient for InMemorySecretClient {
    async fn get_value(&self, selector: &SecretKeySelector) -> Result<Option<Vec<u8>>, SecretError> {
        Ok(self
            .secrets
            .lock()
            .expect("secret map mutex poisoned")
            .get(&(
                selector.reference.namespace.clone(),
                selector.reference.name.clone(),
            ))
            .and_then(|data| data.get(&selector.key))
            .cloned())
    }

    async fn get_data(
        &self,
        reference: &SecretReference,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, SecretError> {
        Ok(self
            .secrets
            .lock()
            .expect("secret map mutex poisoned")
            .get(&(reference.namespace.clone(), reference.name.clone()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_value_and_data() {
        let client = InMemorySecretClient::new();
        client.insert(
            "default",
            "db-passwords",
            BTreeMap::from([("admin".to_string(), b"foo".to_vec())]),
        );
        let selector = SecretKeySelector {
            reference: SecretReference {
                name: "db-passwords".to_string(),
                namespace: "default".to_string(),
            },
            key: "admin".to_string(),
        };
        assert_eq!(client.get_value(&selector).await.unwrap(), Some(b"foo".to_vec()));

        let missing = SecretKeySelector {
            key: "absent".to_string(),
            ..selector.clone()
        };
        assert_eq!(client.get_value(&missing).await.unwrap(), None);
    }
}
