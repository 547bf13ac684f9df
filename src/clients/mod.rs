//! Backend client bundle.
//!
//! The engine never speaks a wire protocol itself. It consumes the
//! [`ConsulBackend`] / [`VaultBackend`] / [`NomadBackend`] traits, which
//! expose typed blocking reads with Consul-style `WaitIndex`/`WaitTime`
//! semantics. A [`ClientSet`] bundles one client per backend family plus
//! the transport settings they were built with, and is injected into
//! every dependency fetch.

mod consul;
mod nomad;
mod vault;

pub use consul::*;
pub use nomad::*;
pub use vault::*;

use std::sync::Arc;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::errors::FetchError;

/// Options for one blocking read.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Index last observed for this dependency. The backend blocks until
    /// its index advances past this value or `wait_time` elapses.
    pub wait_index: u64,
    /// Ceiling on server-side blocking.
    pub wait_time: Duration,
    /// Permit answers from non-leader replicas.
    pub allow_stale: bool,
    pub datacenter: Option<String>,
    pub namespace: Option<String>,
}

/// Metadata attached to every successful blocking read.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryMeta {
    /// Monotonically non-decreasing change index.
    pub last_index: u64,
    /// Replica lag, meaningful only for stale reads.
    pub last_contact: Duration,
}

/// Bundle of configured backend clients. Cheap to clone; all members are
/// shared handles.
#[derive(Clone, Debug)]
pub struct ClientSet {
    consul: Option<Arc<dyn ConsulBackend>>,
    vault: Option<VaultHandle>,
    nomad: Option<Arc<dyn NomadBackend>>,
    transport: TransportConfig,
}

impl ClientSet {
    pub fn builder() -> ClientSetBuilder {
        ClientSetBuilder::default()
    }

    pub fn consul(&self) -> Result<&Arc<dyn ConsulBackend>, FetchError> {
        self.consul
            .as_ref()
            .ok_or_else(|| FetchError::Transport("no consul client configured".into()))
    }

    pub fn vault(&self) -> Result<&VaultHandle, FetchError> {
        self.vault
            .as_ref()
            .ok_or_else(|| FetchError::Transport("no vault client configured".into()))
    }

    pub fn nomad(&self) -> Result<&Arc<dyn NomadBackend>, FetchError> {
        self.nomad
            .as_ref()
            .ok_or_else(|| FetchError::Transport("no nomad client configured".into()))
    }

    pub fn has_vault(&self) -> bool {
        self.vault.is_some()
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }
}

#[derive(Default)]
pub struct ClientSetBuilder {
    consul: Option<Arc<dyn ConsulBackend>>,
    vault: Option<VaultHandle>,
    nomad: Option<Arc<dyn NomadBackend>>,
    transport: TransportConfig,
}

impl ClientSetBuilder {
    pub fn consul(mut self, client: Arc<dyn ConsulBackend>) -> Self {
        self.consul = Some(client);
        self
    }

    pub fn vault(mut self, backend: Arc<dyn VaultBackend>, token: &str) -> Self {
        self.vault = Some(VaultHandle::new(backend, token));
        self
    }

    pub fn nomad(mut self, client: Arc<dyn NomadBackend>) -> Self {
        self.nomad = Some(client);
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn build(self) -> ClientSet {
        ClientSet {
            consul: self.consul,
            vault: self.vault,
            nomad: self.nomad,
            transport: self.transport,
        }
    }
}
