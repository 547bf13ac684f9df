use std::env;

use serde::Deserialize;

use super::{RetryConfig, TransportConfig};

/// Vault backend settings, including the token lifecycle knobs the
/// watcher's token supervision consumes.
#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub address: Option<String>,

    /// Raw token, or a wrapped one when `unwrap_token` is set.
    pub token: Option<String>,

    /// Treat `token` as a wrapping token and unwrap it once before any
    /// View starts.
    #[serde(default)]
    pub unwrap_token: bool,

    /// Keep the token alive with half-lease renewals.
    #[serde(default = "default_renew_token")]
    pub renew_token: bool,

    /// Requested lease extension, in seconds, for each renewal.
    #[serde(default)]
    pub token_renew_increment: u64,

    /// File an agent keeps the current token in; watched for changes.
    pub agent_token_file: Option<String>,

    pub ca_path: Option<String>,
    pub ca_cert: Option<String>,
    pub tls_server_name: Option<String>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            unwrap_token: false,
            renew_token: default_renew_token(),
            token_renew_increment: 0,
            agent_token_file: None,
            ca_path: None,
            ca_cert: None,
            tls_server_name: None,
            retry: RetryConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn merge(mut self, other: &VaultConfig) -> Self {
        if other.address.is_some() {
            self.address = other.address.clone();
        }
        if other.token.is_some() {
            self.token = other.token.clone();
        }
        self.unwrap_token |= other.unwrap_token;
        self.renew_token &= other.renew_token;
        if other.token_renew_increment != 0 {
            self.token_renew_increment = other.token_renew_increment;
        }
        if other.agent_token_file.is_some() {
            self.agent_token_file = other.agent_token_file.clone();
        }
        if other.ca_path.is_some() {
            self.ca_path = other.ca_path.clone();
        }
        if other.ca_cert.is_some() {
            self.ca_cert = other.ca_cert.clone();
        }
        if other.tls_server_name.is_some() {
            self.tls_server_name = other.tls_server_name.clone();
        }
        self.retry = other.retry;
        self.transport = other.transport;
        self
    }

    pub fn finalize(&mut self) {
        if self.address.is_none() {
            self.address = env::var("VAULT_ADDR").ok();
        }
        if self.token.is_none() {
            self.token = env::var("VAULT_TOKEN").ok();
        }
        if !self.unwrap_token {
            self.unwrap_token = env::var("VAULT_UNWRAP_TOKEN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);
        }
        if self.ca_path.is_none() {
            self.ca_path = env::var("VAULT_CA_PATH").ok();
        }
        if self.ca_cert.is_none() {
            self.ca_cert = env::var("VAULT_CA_CERT").ok();
        }
        if self.tls_server_name.is_none() {
            self.tls_server_name = env::var("VAULT_TLS_SERVER_NAME").ok();
        }
    }
}

fn default_renew_token() -> bool {
    true
}
