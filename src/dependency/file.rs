use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use super::{fingerprint_of, DepKind, Dependency, Fetched};
use crate::clients::{ClientSet, QueryMeta, QueryOptions};
use crate::constants::FILE_POLL_INTERVAL;
use crate::errors::FetchError;
use crate::template::Value;

/// Local file contents, re-queried by polling stat. The change index is
/// synthesized from the file's mtime (milliseconds since epoch), so a
/// rewrite with identical timestamp and size is indistinguishable from
/// no change.
#[derive(Debug)]
pub struct FileQuery {
    path: PathBuf,
    fingerprint: String,
}

impl FileQuery {
    pub fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            fingerprint: fingerprint_of("file", path, None),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn stat_index(&self) -> Result<u64, FetchError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|source| FetchError::File {
                path: self.path.clone(),
                source,
            })?;
        let mtime = meta
            .modified()
            .map_err(|source| FetchError::File {
                path: self.path.clone(),
                source,
            })?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        // Fold the size in so truncate-then-rewrite within one tick is
        // still observable.
        Ok(mtime.wrapping_add(meta.len()))
    }

    async fn read(&self) -> Result<String, FetchError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| FetchError::File {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl Dependency for FileQuery {
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn kind(&self) -> DepKind {
        DepKind::Local
    }

    async fn fetch(&self, _clients: &ClientSet, opts: &QueryOptions) -> Result<Fetched, FetchError> {
        let deadline = Instant::now() + opts.wait_time;
        loop {
            let index = self.stat_index().await?;
            if index != opts.wait_index || Instant::now() >= deadline {
                let contents = self.read().await?;
                let meta = QueryMeta {
                    last_index: index,
                    ..QueryMeta::default()
                };
                return Ok((Value::String(contents), meta));
            }
            sleep(FILE_POLL_INTERVAL).await;
        }
    }
}

impl fmt::Display for FileQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint)
    }
}

/// Timestamp-derived index for backends without native blocking queries.
pub(crate) fn clock_index() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
