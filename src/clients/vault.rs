use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::errors::FetchError;
use crate::template::Value;

/// A secret read from a Vault-style server.
#[derive(Clone, Debug, PartialEq)]
pub struct VaultSecret {
    pub data: BTreeMap<String, Value>,
    pub lease_id: String,
    /// Seconds. A renewable lease with duration 0 is the TTL=0 rotation
    /// condition and is surfaced as `FetchError::VaultTtlZero`.
    pub lease_duration: u64,
    pub renewable: bool,
}

/// Result of a token renewal.
#[derive(Clone, Copy, Debug)]
pub struct TokenRenewal {
    pub lease_duration: u64,
    pub renewable: bool,
}

/// Typed reads against a Vault-style server. Vault has no blocking
/// queries; dependencies synthesize index metadata from lease timing.
#[async_trait]
pub trait VaultBackend: Send + Sync + std::fmt::Debug {
    async fn read(&self, token: &str, path: &str) -> Result<VaultSecret, FetchError>;

    async fn list(&self, token: &str, path: &str) -> Result<Vec<String>, FetchError>;

    async fn renew_token(&self, token: &str, increment: u64) -> Result<TokenRenewal, FetchError>;

    /// Exchanges a wrapped token for the token inside it.
    async fn unwrap(&self, wrapped: &str) -> Result<String, FetchError>;
}

/// A Vault backend plus the token currently in use.
///
/// The token is swapped live when an agent token file changes; reads
/// started after the swap use the new token. Token mutation is the only
/// shared-state write on this handle.
#[derive(Clone, Debug)]
pub struct VaultHandle {
    backend: Arc<dyn VaultBackend>,
    token: Arc<ArcSwap<String>>,
}

impl VaultHandle {
    pub fn new(backend: Arc<dyn VaultBackend>, token: &str) -> Self {
        Self {
            backend,
            token: Arc::new(ArcSwap::from_pointee(token.to_string())),
        }
    }

    pub fn token(&self) -> Arc<String> {
        self.token.load_full()
    }

    pub fn set_token(&self, token: &str) {
        self.token.store(Arc::new(token.to_string()));
    }

    pub async fn read(&self, path: &str) -> Result<VaultSecret, FetchError> {
        self.backend.read(&self.token(), path).await
    }

    pub async fn list(&self, path: &str) -> Result<Vec<String>, FetchError> {
        self.backend.list(&self.token(), path).await
    }

    pub async fn renew_self(&self, increment: u64) -> Result<TokenRenewal, FetchError> {
        self.backend.renew_token(&self.token(), increment).await
    }

    pub async fn unwrap_token(&self, wrapped: &str) -> Result<String, FetchError> {
        self.backend.unwrap(wrapped).await
    }
}
