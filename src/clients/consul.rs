use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{QueryMeta, QueryOptions};
use crate::errors::FetchError;

/// One key/value pair returned by a recursive read.
#[derive(Clone, Debug, PartialEq)]
pub struct KvPair {
    /// Full path of the key.
    pub path: String,
    pub value: String,
}

/// A catalog service registration.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogRegistration {
    pub id: String,
    pub node: String,
    pub node_address: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

/// Aggregate health of one check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Maintenance,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Maintenance => "maintenance",
        }
    }
}

/// A health-checked service instance.
#[derive(Clone, Debug, PartialEq)]
pub struct HealthEntry {
    pub id: String,
    pub node: String,
    pub node_address: String,
    pub service_name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    /// Worst status across the instance's checks.
    pub status: HealthStatus,
}

/// A catalog node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub address: String,
}

/// A node with its registered services.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeDetail {
    pub node: NodeInfo,
    pub services: Vec<CatalogRegistration>,
}

/// Typed blocking reads against a Consul-style catalog/KV server.
///
/// Implementations MUST honor `QueryOptions::wait_index` /
/// `QueryOptions::wait_time`: a call blocks until the underlying index
/// advances past `wait_index` or the wait time elapses, and the returned
/// `QueryMeta::last_index` is monotonically non-decreasing across calls
/// for the same query.
#[async_trait]
pub trait ConsulBackend: Send + Sync + std::fmt::Debug {
    async fn kv_get(
        &self,
        path: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<String>, QueryMeta), FetchError>;

    /// Lexicographically ordered by path.
    async fn kv_list(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<KvPair>, QueryMeta), FetchError>;

    /// service-name -> sorted tag list.
    async fn catalog_services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(BTreeMap<String, Vec<String>>, QueryMeta), FetchError>;

    async fn catalog_service(
        &self,
        name: &str,
        tag: Option<&str>,
        opts: &QueryOptions,
    ) -> Result<(Vec<CatalogRegistration>, QueryMeta), FetchError>;

    async fn catalog_nodes(
        &self,
        opts: &QueryOptions,
    ) -> Result<(Vec<NodeInfo>, QueryMeta), FetchError>;

    async fn catalog_node(
        &self,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<NodeDetail>, QueryMeta), FetchError>;

    async fn health_service(
        &self,
        name: &str,
        tag: Option<&str>,
        opts: &QueryOptions,
    ) -> Result<(Vec<HealthEntry>, QueryMeta), FetchError>;
}
