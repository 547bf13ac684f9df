//! In-memory backend fakes used across the test suite.
//!
//! The fakes honor the blocking-query contract: a read with a
//! `wait_index` equal to the current index parks on a notifier until a
//! mutation bumps the index or the wait time elapses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::clients::{
    CatalogRegistration, ClientSet, ConsulBackend, HealthEntry, HealthStatus, KvPair,
    NodeDetail, NodeInfo, NomadBackend, NomadServiceEntry, QueryMeta, QueryOptions,
    TokenRenewal, VaultBackend, VaultSecret,
};
use crate::errors::FetchError;
use crate::template::Value;

#[derive(Debug, Default)]
struct ConsulState {
    index: u64,
    kv: BTreeMap<String, String>,
    services: BTreeMap<String, Vec<String>>,
    catalog: HashMap<String, Vec<CatalogRegistration>>,
    health: HashMap<String, Vec<HealthEntry>>,
    nodes: Vec<NodeInfo>,
    node_details: HashMap<String, NodeDetail>,
    last_contact: Duration,
    fail_transport: usize,
    fail_permission: bool,
}

/// In-memory Consul with real blocking-query behavior.
#[derive(Debug, Default)]
pub struct FakeConsul {
    state: Mutex<ConsulState>,
    notify: Notify,
}

impl FakeConsul {
    pub fn new() -> Arc<Self> {
        let fake = Arc::new(Self::default());
        fake.state.lock().index = 1;
        fake
    }

    fn bump(&self) {
        self.state.lock().index += 1;
        self.notify.notify_waiters();
    }

    pub fn set_kv(&self, path: &str, value: &str) {
        self.state.lock().kv.insert(path.to_string(), value.to_string());
        self.bump();
    }

    pub fn delete_kv(&self, path: &str) {
        self.state.lock().kv.remove(path);
        self.bump();
    }

    pub fn set_services(&self, services: BTreeMap<String, Vec<String>>) {
        self.state.lock().services = services;
        self.bump();
    }

    pub fn set_catalog(&self, name: &str, regs: Vec<CatalogRegistration>) {
        self.state.lock().catalog.insert(name.to_string(), regs);
        self.bump();
    }

    pub fn set_health(&self, name: &str, entries: Vec<HealthEntry>) {
        self.state.lock().health.insert(name.to_string(), entries);
        self.bump();
    }

    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        self.state.lock().nodes = nodes;
        self.bump();
    }

    pub fn set_node_detail(&self, detail: NodeDetail) {
        let name = detail.node.name.clone();
        self.state.lock().node_details.insert(name, detail);
        self.bump();
    }

    pub fn set_last_contact(&self, lag: Duration) {
        self.state.lock().last_contact = lag;
    }

    /// The next `n` reads fail with a transport error.
    pub fn fail_transport(&self, n: usize) {
        self.state.lock().fail_transport = n;
    }

    pub fn fail_permission(&self, on: bool) {
        self.state.lock().fail_permission = on;
    }

    fn check_failures(&self) -> Result<(), FetchError> {
        let mut state = self.state.lock();
        if state.fail_permission {
            return Err(FetchError::PermissionDenied("acl token rejected".into()));
        }
        if state.fail_transport > 0 {
            state.fail_transport -= 1;
            return Err(FetchError::Transport("connection refused".into()));
        }
        Ok(())
    }

    /// Parks until the index moves past `opts.wait_index` or the wait
    /// time elapses.
    async fn block(&self, opts: &QueryOptions) {
        loop {
            let notified = self.notify.notified();
            if self.state.lock().index > opts.wait_index {
                return;
            }
            if timeout(opts.wait_time, notified).await.is_err() {
                return;
            }
        }
    }

    fn meta(&self) -> QueryMeta {
        let state = self.state.lock();
        QueryMeta {
            last_index: state.index,
            last_contact: state.last_contact,
        }
    }
}

#[async_trait]
impl ConsulBackend for FakeConsul {
    async fn kv_get(
        &self,
        path: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<String>, QueryMeta), FetchError> {
        self.block(opts).await;
        self.check_failures()?;
        let value = self.state.lock().kv.get(path).cloned();
        Ok((value, self.meta()))
    }

    async fn kv_list(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<KvPair>, QueryMeta), FetchError> {
        self.block(opts).await;
        self.check_failures()?;
        let pairs = self
            .state
            .lock()
            .kv
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KvPair {
                path: k.clone(),
                value: v.clone(),
            })
            .collect();
        Ok((pairs, self.meta()))
    }

    async fn catalog_services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(BTreeMap<String, Vec<String>>, QueryMeta), FetchError> {
        self.block(opts).await;
        self.check_failures()?;
        Ok((self.state.lock().services.clone(), self.meta()))
    }

    async fn catalog_service(
        &self,
        name: &str,
        tag: Option<&str>,
        opts: &QueryOptions,
    ) -> Result<(Vec<CatalogRegistration>, QueryMeta), FetchError> {
        self.block(opts).await;
        self.check_failures()?;
        let mut regs = self
            .state
            .lock()
            .catalog
            .get(name)
            .cloned()
            .unwrap_or_default();
        if let Some(tag) = tag {
            regs.retain(|r| r.tags.iter().any(|t| t == tag));
        }
        Ok((regs, self.meta()))
    }

    async fn catalog_nodes(
        &self,
        opts: &QueryOptions,
    ) -> Result<(Vec<NodeInfo>, QueryMeta), FetchError> {
        self.block(opts).await;
        self.check_failures()?;
        Ok((self.state.lock().nodes.clone(), self.meta()))
    }

    async fn catalog_node(
        &self,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<NodeDetail>, QueryMeta), FetchError> {
        self.block(opts).await;
        self.check_failures()?;
        Ok((self.state.lock().node_details.get(name).cloned(), self.meta()))
    }

    async fn health_service(
        &self,
        name: &str,
        tag: Option<&str>,
        opts: &QueryOptions,
    ) -> Result<(Vec<HealthEntry>, QueryMeta), FetchError> {
        self.block(opts).await;
        self.check_failures()?;
        let mut entries = self
            .state
            .lock()
            .health
            .get(name)
            .cloned()
            .unwrap_or_default();
        if let Some(tag) = tag {
            entries.retain(|e| e.tags.iter().any(|t| t == tag));
        }
        Ok((entries, self.meta()))
    }
}

#[derive(Debug, Default)]
struct VaultState {
    secrets: HashMap<String, VaultSecret>,
    lists: HashMap<String, Vec<String>>,
    /// Per-path countdown of TTL=0 answers before the real secret.
    ttl_zero_remaining: HashMap<String, usize>,
    renewals: Vec<TokenRenewal>,
    renew_calls: usize,
    unwrap_map: HashMap<String, String>,
    tokens_seen: Vec<String>,
}

/// In-memory Vault.
#[derive(Debug, Default)]
pub struct FakeVault {
    state: Mutex<VaultState>,
}

impl FakeVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_secret(&self, path: &str, data: BTreeMap<String, Value>) {
        self.state.lock().secrets.insert(
            path.to_string(),
            VaultSecret {
                data,
                lease_id: format!("lease/{}", path),
                lease_duration: 300,
                renewable: false,
            },
        );
    }

    pub fn set_list(&self, path: &str, keys: Vec<String>) {
        self.state.lock().lists.insert(path.to_string(), keys);
    }

    /// The next `n` reads of `path` answer with a renewable TTL=0 lease.
    pub fn ttl_zero_times(&self, path: &str, n: usize) {
        self.state.lock().ttl_zero_remaining.insert(path.to_string(), n);
    }

    pub fn push_renewal(&self, renewal: TokenRenewal) {
        self.state.lock().renewals.push(renewal);
    }

    pub fn renew_calls(&self) -> usize {
        self.state.lock().renew_calls
    }

    pub fn set_unwrap(&self, wrapped: &str, inner: &str) {
        self.state
            .lock()
            .unwrap_map
            .insert(wrapped.to_string(), inner.to_string());
    }

    /// Tokens observed on incoming reads, in order.
    pub fn tokens_seen(&self) -> Vec<String> {
        self.state.lock().tokens_seen.clone()
    }
}

#[async_trait]
impl VaultBackend for FakeVault {
    async fn read(&self, token: &str, path: &str) -> Result<VaultSecret, FetchError> {
        let mut state = self.state.lock();
        state.tokens_seen.push(token.to_string());
        if let Some(remaining) = state.ttl_zero_remaining.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(VaultSecret {
                    data: BTreeMap::new(),
                    lease_id: String::new(),
                    lease_duration: 0,
                    renewable: true,
                });
            }
        }
        state
            .secrets
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(path.to_string()))
    }

    async fn list(&self, _token: &str, path: &str) -> Result<Vec<String>, FetchError> {
        Ok(self.state.lock().lists.get(path).cloned().unwrap_or_default())
    }

    async fn renew_token(&self, _token: &str, _increment: u64) -> Result<TokenRenewal, FetchError> {
        let mut state = self.state.lock();
        state.renew_calls += 1;
        if state.renewals.is_empty() {
            return Err(FetchError::Transport("no renewal scripted".into()));
        }
        // Replay the last scripted renewal forever.
        let idx = (state.renew_calls - 1).min(state.renewals.len() - 1);
        Ok(state.renewals[idx])
    }

    async fn unwrap(&self, wrapped: &str) -> Result<String, FetchError> {
        self.state
            .lock()
            .unwrap_map
            .get(wrapped)
            .cloned()
            .ok_or_else(|| FetchError::PermissionDenied("unknown wrapping token".into()))
    }
}

#[derive(Debug, Default)]
struct NomadState {
    index: u64,
    services: BTreeMap<String, Vec<String>>,
    instances: HashMap<String, Vec<NomadServiceEntry>>,
    vars: HashMap<String, BTreeMap<String, String>>,
}

/// In-memory Nomad.
#[derive(Debug, Default)]
pub struct FakeNomad {
    state: Mutex<NomadState>,
    notify: Notify,
}

impl FakeNomad {
    pub fn new() -> Arc<Self> {
        let fake = Arc::new(Self::default());
        fake.state.lock().index = 1;
        fake
    }

    fn bump(&self) {
        self.state.lock().index += 1;
        self.notify.notify_waiters();
    }

    pub fn set_var(&self, path: &str, items: BTreeMap<String, String>) {
        self.state.lock().vars.insert(path.to_string(), items);
        self.bump();
    }

    pub fn set_service(&self, name: &str, entries: Vec<NomadServiceEntry>) {
        self.state.lock().instances.insert(name.to_string(), entries);
        self.bump();
    }

    pub fn set_services(&self, services: BTreeMap<String, Vec<String>>) {
        self.state.lock().services = services;
        self.bump();
    }

    async fn block(&self, opts: &QueryOptions) {
        loop {
            let notified = self.notify.notified();
            if self.state.lock().index > opts.wait_index {
                return;
            }
            if timeout(opts.wait_time, notified).await.is_err() {
                return;
            }
        }
    }

    fn meta(&self) -> QueryMeta {
        QueryMeta {
            last_index: self.state.lock().index,
            last_contact: Duration::ZERO,
        }
    }
}

#[async_trait]
impl NomadBackend for FakeNomad {
    async fn services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(BTreeMap<String, Vec<String>>, QueryMeta), FetchError> {
        self.block(opts).await;
        Ok((self.state.lock().services.clone(), self.meta()))
    }

    async fn service(
        &self,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<NomadServiceEntry>, QueryMeta), FetchError> {
        self.block(opts).await;
        let entries = self
            .state
            .lock()
            .instances
            .get(name)
            .cloned()
            .unwrap_or_default();
        Ok((entries, self.meta()))
    }

    async fn var_get(
        &self,
        path: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<BTreeMap<String, String>>, QueryMeta), FetchError> {
        self.block(opts).await;
        Ok((self.state.lock().vars.get(path).cloned(), self.meta()))
    }

    async fn var_list(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<String>, QueryMeta), FetchError> {
        self.block(opts).await;
        let paths = self
            .state
            .lock()
            .vars
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok((paths, self.meta()))
    }
}

/// A ClientSet wired to fresh fakes, returned alongside them.
pub fn fake_clients() -> (ClientSet, Arc<FakeConsul>, Arc<FakeVault>, Arc<FakeNomad>) {
    let consul = FakeConsul::new();
    let vault = FakeVault::new();
    let nomad = FakeNomad::new();
    let clients = ClientSet::builder()
        .consul(consul.clone())
        .vault(vault.clone(), "root-token")
        .nomad(nomad.clone())
        .build();
    (clients, consul, vault, nomad)
}

/// A health entry with sane defaults for tests.
pub fn health_entry(address: &str, tags: &[&str], status: HealthStatus) -> HealthEntry {
    HealthEntry {
        id: format!("web-{}", address),
        node: "node1".to_string(),
        node_address: "10.0.0.1".to_string(),
        service_name: "web".to_string(),
        address: address.to_string(),
        port: 80,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        status,
    }
}
