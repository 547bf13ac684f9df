use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{QueryMeta, QueryOptions};
use crate::errors::FetchError;

/// A Nomad service registration.
#[derive(Clone, Debug, PartialEq)]
pub struct NomadServiceEntry {
    pub id: String,
    pub name: String,
    pub node: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

/// Typed blocking reads against a Nomad-style server. Nomad supports the
/// same `WaitIndex`/`WaitTime` semantics as Consul.
#[async_trait]
pub trait NomadBackend: Send + Sync + std::fmt::Debug {
    /// service-name -> sorted tag list.
    async fn services(
        &self,
        opts: &QueryOptions,
    ) -> Result<(BTreeMap<String, Vec<String>>, QueryMeta), FetchError>;

    async fn service(
        &self,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<NomadServiceEntry>, QueryMeta), FetchError>;

    /// Items of one variable, or None if the path does not exist.
    async fn var_get(
        &self,
        path: &str,
        opts: &QueryOptions,
    ) -> Result<(Option<BTreeMap<String, String>>, QueryMeta), FetchError>;

    /// Variable paths under a prefix.
    async fn var_list(
        &self,
        prefix: &str,
        opts: &QueryOptions,
    ) -> Result<(Vec<String>, QueryMeta), FetchError>;
}
