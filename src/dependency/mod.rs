//! Typed query objects.
//!
//! A [`Dependency`] describes one observation of external state: a key,
//! a key prefix, a service, a node list, a file, a secret. Each knows
//! how to fetch itself against the [`ClientSet`] with blocking-index
//! semantics, and carries a stable fingerprint used for deduplication
//! and as the Brain's cache key.

mod catalog;
mod file;
mod health;
mod kv;
mod nomad;
mod vault;

pub use catalog::*;
pub use file::*;
pub use health::*;
pub use kv::*;
pub use nomad::*;
pub use vault::*;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{ClientSet, QueryMeta, QueryOptions};
use crate::errors::FetchError;
use crate::template::Value;

#[cfg(test)]
mod fingerprint_test;

/// Which backend family a dependency talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepKind {
    Consul,
    Vault,
    Nomad,
    Local,
}

/// A fetched value plus its index metadata.
pub type Fetched = (Value, QueryMeta);

/// An identified, fetchable observation of external state.
///
/// Dependencies are immutable value objects; two constructions with the
/// same logical query produce the same fingerprint and MUST be treated
/// as one. Cancellation of an in-flight fetch happens by dropping the
/// future (Views race fetches against their stop token).
#[async_trait]
pub trait Dependency: Send + Sync + fmt::Display + fmt::Debug {
    /// Canonical identity, `"<kind>|<canonical-params>"`. Deterministic
    /// given construction inputs: lists sorted, empty fields omitted.
    fn fingerprint(&self) -> &str;

    fn kind(&self) -> DepKind;

    /// When false, the View polling this dependency must not be shared
    /// across concurrent consumers.
    fn can_share(&self) -> bool {
        true
    }

    /// Blocks up to `opts.wait_time` unless a change past
    /// `opts.wait_index` is observable.
    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError>;
}

/// Shared handle to a dependency, keyed by fingerprint everywhere.
pub type Dep = Arc<dyn Dependency>;

/// Builds `"<kind>|<param>@<dc>"`, omitting empty parts.
pub(crate) fn fingerprint_of(kind: &str, param: &str, dc: Option<&str>) -> String {
    let mut s = String::from(kind);
    let dc_part = dc.filter(|d| !d.is_empty());
    if !param.is_empty() || dc_part.is_some() {
        s.push('|');
        s.push_str(param);
        if let Some(dc) = dc_part {
            s.push('@');
            s.push_str(dc);
        }
    }
    s
}
