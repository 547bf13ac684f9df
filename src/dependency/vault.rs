use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::time::sleep;

use super::file::clock_index;
use super::{fingerprint_of, DepKind, Dependency, Fetched};
use crate::clients::{ClientSet, QueryMeta, QueryOptions, VaultSecret};
use crate::constants::FILE_POLL_INTERVAL;
use crate::errors::FetchError;
use crate::template::Value;

/// Re-read cadence for secrets without a lease.
const DEFAULT_LEASE_CHECK: Duration = Duration::from_secs(5 * 60);

fn secret_value(secret: &VaultSecret) -> Value {
    Value::map_from(vec![
        ("Data", Value::Map(secret.data.clone().into_iter().collect())),
        ("LeaseID", Value::from(secret.lease_id.as_str())),
        ("LeaseDuration", Value::Int(secret.lease_duration as i64)),
        ("Renewable", Value::Bool(secret.renewable)),
    ])
}

/// How long to wait before re-reading a leased secret: half the lease,
/// or the default cadence when there is none.
fn renew_delay(lease_duration: u64) -> Duration {
    if lease_duration == 0 {
        DEFAULT_LEASE_CHECK
    } else {
        Duration::from_secs((lease_duration / 2).max(1))
    }
}

/// Secret read. Leased secrets are re-read at half their lease duration;
/// a renewable lease with TTL=0 is surfaced as the dedicated rotation
/// error so the View can apply its capped unbounded backoff.
#[derive(Debug)]
pub struct VaultRead {
    path: String,
    fingerprint: String,
    // Lease observed by the previous fetch, drives the sleep before the
    // next one.
    last_lease: AtomicU64,
}

impl VaultRead {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            fingerprint: fingerprint_of("vault.read", path, None),
            last_lease: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Dependency for VaultRead {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Vault
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let vault = clients.vault()?;
        if opts.wait_index != 0 {
            sleep(renew_delay(self.last_lease.load(Ordering::Relaxed))).await;
        }
        let secret = vault.read(&self.path).await?;
        if secret.renewable && secret.lease_duration == 0 {
            return Err(FetchError::VaultTtlZero);
        }
        self.last_lease.store(secret.lease_duration, Ordering::Relaxed);
        let meta = QueryMeta {
            last_index: clock_index(),
            ..QueryMeta::default()
        };
        Ok((secret_value(&secret), meta))
    }
}

impl fmt::Display for VaultRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Key listing under a path.
#[derive(Debug)]
pub struct VaultList {
    path: String,
    fingerprint: String,
}

impl VaultList {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            fingerprint: fingerprint_of("vault.list", path, None),
        }
    }
}

#[async_trait]
impl Dependency for VaultList {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Vault
    }

    async fn fetch(&self, clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let vault = clients.vault()?;
        if opts.wait_index != 0 {
            sleep(DEFAULT_LEASE_CHECK).await;
        }
        let mut keys = vault.list(&self.path).await?;
        keys.sort();
        let meta = QueryMeta {
            last_index: clock_index(),
            ..QueryMeta::default()
        };
        Ok((Value::List(keys.into_iter().map(Value::from).collect()), meta))
    }
}

impl fmt::Display for VaultList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Watches an agent-written token file and publishes the token string.
/// Not shareable: the watcher wires exactly one consumer, which swaps
/// the token on the Vault client.
#[derive(Debug)]
pub struct VaultAgentToken {
    path: PathBuf,
    fingerprint: String,
}

impl VaultAgentToken {
    pub fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            fingerprint: fingerprint_of("vault.token.file", path, None),
        }
    }
}

#[async_trait]
impl Dependency for VaultAgentToken {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Vault
    }

    fn can_share(&self) -> bool {
        false
    }

    async fn fetch(&self, _clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let deadline = tokio::time::Instant::now() + opts.wait_time;
        loop {
            let meta = tokio::fs::metadata(&self.path)
                .await
                .map_err(|source| FetchError::File {
                    path: self.path.clone(),
                    source,
                })?;
            let index = meta
                .modified()
                .map_err(|source| FetchError::File {
                    path: self.path.clone(),
                    source,
                })?
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            if index != opts.wait_index || tokio::time::Instant::now() >= deadline {
                let token = tokio::fs::read_to_string(&self.path)
                    .await
                    .map_err(|source| FetchError::File {
                        path: self.path.clone(),
                        source,
                    })?;
                let meta = QueryMeta {
                    last_index: index,
                    ..QueryMeta::default()
                };
                return Ok((Value::from(token.trim().to_string()), meta));
            }
            sleep(FILE_POLL_INTERVAL).await;
        }
    }
}

impl fmt::Display for VaultAgentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Renew-only dependency. It never publishes data; its fetch renews the
/// client's token at half-lease cadence until renewal fails, so the only
/// way out of a fetch is an error or cancellation.
#[derive(Debug)]
pub struct VaultToken {
    increment: u64,
    fingerprint: String,
}

impl VaultToken {
    /// `increment` is the requested lease extension in seconds.
    pub fn new(increment: u64) -> Self {
        Self {
            increment,
            fingerprint: "vault.token.renew".to_string(),
        }
    }
}

#[async_trait]
impl Dependency for VaultToken {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Vault
    }

    fn can_share(&self) -> bool {
        false
    }

    async fn fetch(&self, clients: &ClientSet, _opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let vault = clients.vault()?;
        loop {
            let renewal = vault.renew_self(self.increment).await?;
            if renewal.renewable && renewal.lease_duration == 0 {
                return Err(FetchError::VaultTtlZero);
            }
            if !renewal.renewable {
                return Err(FetchError::PermissionDenied(
                    "token is not renewable".to_string(),
                ));
            }
            sleep(renew_delay(renewal.lease_duration)).await;
        }
    }
}

impl fmt::Display for VaultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}
