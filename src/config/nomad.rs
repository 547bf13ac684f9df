use std::env;

use serde::Deserialize;

use super::{RetryConfig, TransportConfig};

/// Nomad backend settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NomadConfig {
    pub address: Option<String>,
    pub token: Option<String>,
    pub namespace: Option<String>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl NomadConfig {
    pub fn merge(mut self, other: &NomadConfig) -> Self {
        if other.address.is_some() {
            self.address = other.address.clone();
        }
        if other.token.is_some() {
            self.token = other.token.clone();
        }
        if other.namespace.is_some() {
            self.namespace = other.namespace.clone();
        }
        self.retry = other.retry;
        self.transport = other.transport;
        self
    }

    pub fn finalize(&mut self) {
        if self.address.is_none() {
            self.address = env::var("NOMAD_ADDR").ok();
        }
        if self.token.is_none() {
            self.token = env::var("NOMAD_TOKEN").ok();
        }
    }
}
