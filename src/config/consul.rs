use std::env;

use serde::Deserialize;

use super::{RateLimitConfig, RetryConfig, TransportConfig};

/// Consul backend settings. Unset fields fall back to the standard
/// environment variables at finalize time.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConsulConfig {
    pub address: Option<String>,
    pub token: Option<String>,
    pub token_file: Option<String>,
    pub namespace: Option<String>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl ConsulConfig {
    pub fn merge(mut self, other: &ConsulConfig) -> Self {
        if other.address.is_some() {
            self.address = other.address.clone();
        }
        if other.token.is_some() {
            self.token = other.token.clone();
        }
        if other.token_file.is_some() {
            self.token_file = other.token_file.clone();
        }
        if other.namespace.is_some() {
            self.namespace = other.namespace.clone();
        }
        self.retry = other.retry;
        self.rate_limit = other.rate_limit;
        self.transport = other.transport;
        self
    }

    /// Applies environment fallbacks for fields the config left unset.
    pub fn finalize(&mut self) {
        if self.address.is_none() {
            self.address = env::var("CONSUL_HTTP_ADDR").ok();
        }
        if self.namespace.is_none() {
            self.namespace = env::var("CONSUL_NAMESPACE").ok();
        }
        if self.token.is_none() {
            self.token = env::var("CONSUL_TOKEN")
                .or_else(|_| env::var("CONSUL_HTTP_TOKEN"))
                .ok();
        }
        if self.token_file.is_none() {
            self.token_file = env::var("CONSUL_TOKEN_FILE")
                .or_else(|_| env::var("CONSUL_HTTP_TOKEN_FILE"))
                .ok();
        }
    }
}
