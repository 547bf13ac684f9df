use std::fmt;

use async_trait::async_trait;

use super::{fingerprint_of, DepKind, Dependency, Fetched};
use crate::clients::{ClientSet, QueryOptions};
use crate::errors::FetchError;
use crate::template::Value;

/// Single-key read. The value is a string, or null when the key is
/// absent. With `block_on_missing`, absence keeps the blocking query
/// open instead of publishing a null.
#[derive(Debug)]
pub struct KvGet {
    path: String,
    datacenter: Option<String>,
    namespace: Option<String>,
    block_on_missing: bool,
    fingerprint: String,
}

impl KvGet {
    pub fn new(path: &str, datacenter: Option<&str>, namespace: Option<&str>) -> Self {
        Self::build(path, datacenter, namespace, false)
    }

    /// Variant used by the `key` helper, which waits for the key to
    /// exist rather than rendering an empty value.
    pub fn blocking(path: &str, datacenter: Option<&str>, namespace: Option<&str>) -> Self {
        Self::build(path, datacenter, namespace, true)
    }

    fn build(
        path: &str,
        datacenter: Option<&str>,
        namespace: Option<&str>,
        block_on_missing: bool,
    ) -> Self {
        let kind = if block_on_missing { "kv.get.block" } else { "kv.get" };
        let param = match namespace.filter(|n| !n.is_empty()) {
            Some(ns) => format!("{}:{}", ns, path),
            None => path.to_string(),
        };
        Self {
            path: path.to_string(),
            datacenter: datacenter.map(str::to_string),
            namespace: namespace.map(str::to_string),
            block_on_missing,
            fingerprint: fingerprint_of(kind, &param, datacenter),
        }
    }

    fn query_options(&self, opts: &QueryOptions) -> QueryOptions {
        QueryOptions {
            datacenter: self.datacenter.clone(),
            namespace: self.namespace.clone(),
            ..opts.clone()
        }
    }
}

#[async_trait]
impl Dependency for KvGet {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Consul
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let consul = clients.consul()?;
        let mut opts = self.query_options(opts);
        loop {
            let (value, meta) = consul.kv_get(&self.path, &opts).await?;
            if value.is_none() && self.block_on_missing {
                // Key absent: keep the blocking query open from the index
                // the server just reported.
                opts.wait_index = meta.last_index;
                continue;
            }
            return Ok((Value::from(value), meta));
        }
    }
}

impl fmt::Display for KvGet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Recursive read under a prefix. Yields an ordered list of
/// `{Path, Key, Value}` triples, lexicographic by path, where `Key` is
/// the path with the prefix stripped.
#[derive(Debug)]
pub struct KvList {
    prefix: String,
    datacenter: Option<String>,
    namespace: Option<String>,
    fingerprint: String,
}

impl KvList {
    pub fn new(prefix: &str, datacenter: Option<&str>, namespace: Option<&str>) -> Self {
        let param = match namespace.filter(|n| !n.is_empty()) {
            Some(ns) => format!("{}:{}", ns, prefix),
            None => prefix.to_string(),
        };
        Self {
            prefix: prefix.to_string(),
            datacenter: datacenter.map(str::to_string),
            namespace: namespace.map(str::to_string),
            fingerprint: fingerprint_of("kv.list", &param, datacenter),
        }
    }
}

#[async_trait]
impl Dependency for KvList {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Consul
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let consul = clients.consul()?;
        let opts = QueryOptions {
            datacenter: self.datacenter.clone(),
            namespace: self.namespace.clone(),
            ..opts.clone()
        };
        let (pairs, meta) = consul.kv_list(&self.prefix, &opts).await?;

        let stripped = |path: &str| -> String {
            path.strip_prefix(&self.prefix)
                .map(|k| k.trim_start_matches('/'))
                .unwrap_or(path)
                .to_string()
        };
        let list = pairs
            .iter()
            .map(|p| {
                Value::map_from(vec![
                    ("Path", Value::from(p.path.as_str())),
                    ("Key", Value::from(stripped(&p.path))),
                    ("Value", Value::from(p.value.as_str())),
                ])
            })
            .collect::<Vec<_>>();
        Ok((Value::List(list), meta))
    }
}

impl fmt::Display for KvList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}
