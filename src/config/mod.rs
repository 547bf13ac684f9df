//! Configuration for the watch-and-render engine.
//!
//! Loading is layered: defaults (hardcoded), a TOML config file, then
//! environment variables (highest priority). Every field is optional;
//! unset fields assume defaults during the `finalize` pass. Optionality
//! is expressed as `Option<T>` plus finalize, never as sentinel values.

mod consul;
mod exec;
mod nomad;
mod ratelimit;
mod retry;
mod template;
mod transport;
mod vault;
mod wait;

pub use consul::*;
pub use exec::*;
pub use nomad::*;
pub use ratelimit::*;
pub use retry::*;
pub use template::*;
pub use transport::*;
pub use vault::*;
pub use wait::*;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};

use crate::errors::Result;

#[cfg(test)]
mod config_test;

/// Top-level configuration object.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TemplarConfig {
    #[serde(default)]
    pub consul: ConsulConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub nomad: NomadConfig,

    /// Repeatable `[[template]]` stanzas.
    #[serde(default, rename = "template")]
    pub templates: Vec<TemplateConfig>,

    /// Global command block, fired after every template has rendered.
    pub exec: Option<ExecConfig>,

    /// Global quiescence, overridable per template. Accepts
    /// `"<min>:<max>"` strings or a `{ min, max }` table.
    #[serde(default, deserialize_with = "de_wait")]
    pub wait: Option<WaitConfig>,

    /// Ceiling on replica lag tolerated for stale reads.
    pub max_stale: Option<String>,

    pub log_level: Option<String>,

    pub pid_file: Option<PathBuf>,

    pub kill_signal: Option<String>,
    pub reload_signal: Option<String>,
}

impl TemplarConfig {
    /// Loads configuration with priority: defaults, optional config
    /// file, `TEMPLAR__`-prefixed environment variables. The result is
    /// already finalized.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("TEMPLAR")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );
        let mut parsed: TemplarConfig = builder.build()?.try_deserialize()?;
        parsed.finalize();
        Ok(parsed)
    }

    /// Right-biased merge of two configs.
    pub fn merge(mut self, other: &TemplarConfig) -> Self {
        self.consul = self.consul.merge(&other.consul);
        self.vault = self.vault.merge(&other.vault);
        self.nomad = self.nomad.merge(&other.nomad);
        if !other.templates.is_empty() {
            self.templates.extend(other.templates.iter().cloned());
        }
        if other.exec.is_some() {
            self.exec = other.exec.clone();
        }
        if other.wait.is_some() {
            self.wait = other.wait;
        }
        if other.max_stale.is_some() {
            self.max_stale = other.max_stale.clone();
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level.clone();
        }
        if other.pid_file.is_some() {
            self.pid_file = other.pid_file.clone();
        }
        if other.kill_signal.is_some() {
            self.kill_signal = other.kill_signal.clone();
        }
        if other.reload_signal.is_some() {
            self.reload_signal = other.reload_signal.clone();
        }
        self
    }

    /// Materializes defaults and environment fallbacks.
    pub fn finalize(&mut self) {
        self.consul.finalize();
        self.vault.finalize();
        self.nomad.finalize();
        if self.max_stale.is_none() {
            self.max_stale = Some("2s".to_string());
        }
        if self.log_level.is_none() {
            self.log_level = env::var("TEMPLAR_LOG").ok();
        }
        if self.kill_signal.is_none() {
            self.kill_signal = Some("SIGINT".to_string());
        }
        if self.reload_signal.is_none() {
            self.reload_signal = Some("SIGHUP".to_string());
        }
    }

    /// Parsed `max_stale`; `"0"` disables stale reads entirely.
    pub fn max_stale_duration(&self) -> Option<Duration> {
        let raw = self.max_stale.as_deref()?;
        let parsed = parse_duration(raw).ok()?;
        (parsed > Duration::ZERO).then_some(parsed)
    }
}

/// Accepts both the string form `"10s:20s"` and the table form
/// `{ min = "10s", max = "20s" }`.
fn de_wait<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<WaitConfig>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Table { min: String, max: Option<String> },
    }

    let raw: Option<Raw> = Option::deserialize(d)?;
    match raw {
        None => Ok(None),
        Some(Raw::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(Raw::Table { min, max }) => {
            let min_d = parse_duration(&min).map_err(serde::de::Error::custom)?;
            let max_d = match max {
                Some(m) => parse_duration(&m).map_err(serde::de::Error::custom)?,
                None => min_d * 4,
            };
            if max_d < min_d {
                return Err(serde::de::Error::custom(
                    "wait interval max must be larger than min",
                ));
            }
            Ok(Some(WaitConfig {
                min: min_d,
                max: max_d,
            }))
        }
    }
}
