use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::clients::{ClientSet, QueryOptions};
use crate::config::{RateLimitConfig, RetryConfig};
use crate::constants::{DEFAULT_VAULT_TTL_ZERO_BASE, DEFAULT_VAULT_TTL_ZERO_CAP, DEFAULT_WAIT_TIME};
use crate::dependency::Dep;
use crate::errors::FetchError;
use crate::template::Value;

/// One publication from a View: the dependency's latest value and the
/// index it arrived with.
#[derive(Clone, Debug)]
pub struct ViewUpdate {
    pub dep: Dep,
    pub value: Value,
    pub last_index: u64,
}

/// A fetch failure a View could not recover from locally.
#[derive(Debug)]
pub struct ViewError {
    pub dep: Dep,
    pub error: FetchError,
}

/// Per-View policy, derived from the backend section the dependency
/// belongs to.
#[derive(Clone, Copy, Debug)]
pub struct ViewConfig {
    pub once: bool,
    pub wait_time: Duration,
    pub max_stale: Option<Duration>,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    /// Cap for the TTL=0 ladder; attempts are unbounded unless
    /// `ttl_zero_attempts` is set.
    pub ttl_zero_cap: Duration,
    pub ttl_zero_attempts: Option<usize>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            once: false,
            wait_time: DEFAULT_WAIT_TIME,
            max_stale: None,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            ttl_zero_cap: DEFAULT_VAULT_TTL_ZERO_CAP,
            ttl_zero_attempts: None,
        }
    }
}

/// The polling loop and state for one dependency.
///
/// Runs as a single tokio task until stopped or retry-exhausted. For one
/// dependency, publications are monotonic in index: no earlier value is
/// published after a later one.
pub(crate) struct View {
    dep: Dep,
    clients: ClientSet,
    config: ViewConfig,
    data_tx: mpsc::UnboundedSender<ViewUpdate>,
    err_tx: mpsc::UnboundedSender<ViewError>,

    last_value: Option<Value>,
    last_index: u64,
    received: bool,
    last_publish: Option<Instant>,
    /// Cleared when a stale read exceeded max_stale; the next attempt
    /// goes to the leader.
    stale_ok: bool,
}

impl View {
    pub(crate) fn new(
        dep: Dep,
        clients: ClientSet,
        config: ViewConfig,
        data_tx: mpsc::UnboundedSender<ViewUpdate>,
        err_tx: mpsc::UnboundedSender<ViewError>,
    ) -> Self {
        Self {
            dep,
            clients,
            config,
            data_tx,
            err_tx,
            last_value: None,
            last_index: 0,
            received: false,
            last_publish: None,
            stale_ok: true,
        }
    }

    /// Polls until the token is cancelled or the View terminates on its
    /// own (once-mode satisfied, retries exhausted, fatal error).
    pub(crate) async fn poll(mut self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("(view) {} stopping poll", self.dep);
            }
            _ = self.run() => {}
        }
    }

    async fn run(&mut self) {
        let mut retries: usize = 0;
        let mut ttl_zero_retries: usize = 0;

        loop {
            eprintln!("VIEW loop {} idx={}", self.dep, self.last_index);
            self.rate_limit_gate().await;

            let allow_stale =
                self.config.max_stale.is_some() && retries % 2 == 0 && self.stale_ok;
            let opts = QueryOptions {
                wait_index: self.last_index,
                wait_time: self.config.wait_time,
                allow_stale,
                ..QueryOptions::default()
            };

            match self.dep.fetch(&self.clients, &opts).await {
                Err(FetchError::VaultTtlZero) => {
                    if let Some(max) = self.config.ttl_zero_attempts {
                        if ttl_zero_retries >= max {
                            error!("(view) {} ttl=0 retries exhausted", self.dep);
                            self.publish_error(FetchError::VaultTtlZero);
                            return;
                        }
                    }
                    let delay = ttl_zero_delay(ttl_zero_retries, self.config.ttl_zero_cap);
                    ttl_zero_retries += 1;
                    warn!(
                        "(view) {} reported TTL=0, retrying in {:?}",
                        self.dep, delay
                    );
                    sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    retries += 1;
                    if self.config.retry.exhausted(retries) {
                        error!("(view) {} retries exhausted: {}", self.dep, err);
                        self.publish_error(err);
                        return;
                    }
                    let delay = self.config.retry.delay(retries - 1);
                    warn!("(view) {} fetch error, retry in {:?}: {}", self.dep, delay, err);
                    sleep(delay).await;
                }
                Err(err) => {
                    error!("(view) {} fatal fetch error: {}", self.dep, err);
                    self.publish_error(err);
                    return;
                }
                Ok((value, meta)) => {
                    retries = 0;
                    ttl_zero_retries = 0;

                    if let Some(max_stale) = self.config.max_stale {
                        if allow_stale && meta.last_contact > max_stale {
                            debug!(
                                "(view) {} replica too stale ({:?}), asking leader",
                                self.dep, meta.last_contact
                            );
                            self.stale_ok = false;
                            continue;
                        }
                    }
                    self.stale_ok = true;

                    if meta.last_index == self.last_index {
                        debug!("(view) {} no new data (index unchanged)", self.dep);
                        continue;
                    }
                    if meta.last_index < self.last_index {
                        // Server restarted or leadership moved backwards.
                        debug!("(view) {} index reset", self.dep);
                        self.last_index = 0;
                        continue;
                    }
                    self.last_index = meta.last_index;

                    if self.received && self.last_value.as_ref() == Some(&value) {
                        debug!("(view) {} no new data (contents unchanged)", self.dep);
                        continue;
                    }

                    self.last_value = Some(value.clone());
                    self.received = true;
                    self.last_publish = Some(Instant::now());
                    debug!("(view) {} received data", self.dep);
                    if self
                        .data_tx
                        .send(ViewUpdate {
                            dep: self.dep.clone(),
                            value,
                            last_index: meta.last_index,
                        })
                        .is_err()
                    {
                        return;
                    }

                    if self.config.once {
                        return;
                    }
                }
            }
        }
    }

    /// Enforces the minimum interval between publications, with random
    /// jitter on top.
    async fn rate_limit_gate(&self) {
        if !self.config.rate_limit.enabled() {
            return;
        }
        let Some(last) = self.last_publish else { return };
        let elapsed = last.elapsed();
        let min_delay = self.config.rate_limit.min_delay();
        if elapsed >= min_delay {
            return;
        }
        let mut remainder = min_delay - elapsed;
        let jitter_cap = self.config.rate_limit.random_backoff();
        if jitter_cap > Duration::ZERO {
            let jitter = rand::thread_rng().gen_range(Duration::ZERO..jitter_cap);
            remainder += jitter;
        }
        sleep(remainder).await;
    }

    fn publish_error(&self, error: FetchError) {
        let _ = self.err_tx.send(ViewError {
            dep: self.dep.clone(),
            error,
        });
    }
}

/// `min(base * 2^retry, cap)` with a 250ms base.
fn ttl_zero_delay(retry: usize, cap: Duration) -> Duration {
    let base_ms = DEFAULT_VAULT_TTL_ZERO_BASE.as_millis() as u64;
    let shifted = base_ms
        .checked_shl(retry.min(63) as u32)
        .unwrap_or(u64::MAX);
    Duration::from_millis(shifted).min(cap)
}
