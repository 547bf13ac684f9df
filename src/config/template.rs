use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::{ExecConfig, WaitConfig};
use crate::constants::DEFAULT_COMMAND_TIMEOUT;

/// One template stanza: where the body comes from, where it renders to,
/// and what runs when the output changes.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct TemplateConfig {
    /// Path of the template body. Mutually exclusive with `contents`.
    pub source: Option<PathBuf>,

    /// Inline template body. Mutually exclusive with `source`.
    pub contents: Option<String>,

    pub destination: Option<PathBuf>,

    pub command: Option<String>,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Octal file mode, with or without the leading zero.
    pub perms: Option<String>,

    #[serde(default)]
    pub backup: bool,

    pub left_delimiter: Option<String>,
    pub right_delimiter: Option<String>,

    /// Per-template quiescence override; the global wait applies when
    /// absent.
    pub wait: Option<WaitConfig>,

    pub exec: Option<ExecConfig>,

    #[serde(default)]
    pub error_on_missing_key: bool,

    /// Root outside of which `file`-style helpers refuse to read.
    pub sandbox_path: Option<PathBuf>,

    #[serde(default)]
    pub function_denylist: Vec<String>,
}

impl TemplateConfig {
    /// Parses the short CLI form `"source:destination[:command]"`.
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.trim().is_empty() {
            return Err("empty template declaration".to_string());
        }
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        let mut config = TemplateConfig {
            source: Some(PathBuf::from(parts[0])),
            ..Default::default()
        };
        if let Some(dest) = parts.get(1).filter(|d| !d.is_empty()) {
            config.destination = Some(PathBuf::from(dest));
        }
        if let Some(command) = parts.get(2).filter(|c| !c.is_empty()) {
            config.command = Some(command.to_string());
        }
        Ok(config)
    }

    /// Either `source` or `contents` must be set, never both.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.source, &self.contents) {
            (Some(_), Some(_)) => Err("template: cannot specify both source and contents".into()),
            (None, None) => Err("template: must specify one of source or contents".into()),
            _ => Ok(()),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// The exec block for this template's command, synthesized from the
    /// flat fields when no explicit block is given.
    pub fn effective_exec(&self) -> Option<ExecConfig> {
        if let Some(exec) = &self.exec {
            return Some(exec.clone());
        }
        self.command.as_ref().map(|command| ExecConfig {
            command: Some(command.clone()),
            timeout_ms: self.command_timeout_ms,
            ..Default::default()
        })
    }
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_millis() as u64
}
