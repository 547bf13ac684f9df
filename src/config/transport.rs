use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_DIAL_TIMEOUT, DEFAULT_IDLE_CONN_TIMEOUT, DEFAULT_TLS_HANDSHAKE_TIMEOUT,
};

/// Transport settings shared by all backend clients. The engine does not
/// open connections itself; these are handed to whichever client
/// implementation is wired in.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TransportConfig {
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_idle_conn_timeout_ms")]
    pub idle_conn_timeout_ms: u64,

    #[serde(default = "default_tls_handshake_timeout_ms")]
    pub tls_handshake_timeout_ms: u64,

    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: default_dial_timeout_ms(),
            idle_conn_timeout_ms: default_idle_conn_timeout_ms(),
            tls_handshake_timeout_ms: default_tls_handshake_timeout_ms(),
            max_idle_conns: default_max_idle_conns(),
        }
    }
}

impl TransportConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_conn_timeout_ms)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout_ms)
    }
}

fn default_dial_timeout_ms() -> u64 {
    DEFAULT_DIAL_TIMEOUT.as_millis() as u64
}
fn default_idle_conn_timeout_ms() -> u64 {
    DEFAULT_IDLE_CONN_TIMEOUT.as_millis() as u64
}
fn default_tls_handshake_timeout_ms() -> u64 {
    DEFAULT_TLS_HANDSHAKE_TIMEOUT.as_millis() as u64
}
fn default_max_idle_conns() -> usize {
    100
}
