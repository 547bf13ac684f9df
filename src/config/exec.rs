use std::time::Duration;

use serde::Deserialize;

use crate::constants::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_KILL_TIMEOUT};

/// Child-command settings, used both per-template and for the global
/// exec block.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ExecConfig {
    pub command: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub env: EnvConfig,

    /// Signal sent to ask the child to stop. Force-kill follows after
    /// `kill_timeout`.
    pub kill_signal: Option<String>,

    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,

    /// Signal forwarded to a running child in lieu of a restart.
    pub reload_signal: Option<String>,

    /// Upper bound on the random pre-execution delay.
    #[serde(default)]
    pub splay_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command: None,
            enabled: default_enabled(),
            env: EnvConfig::default(),
            kill_signal: None,
            kill_timeout_ms: default_kill_timeout_ms(),
            reload_signal: None,
            splay_ms: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ExecConfig {
    pub fn splay(&self) -> Duration {
        Duration::from_millis(self.splay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    /// Right-biased merge: fields set on `other` win.
    pub fn merge(mut self, other: &ExecConfig) -> Self {
        if other.command.is_some() {
            self.command = other.command.clone();
        }
        self.enabled = other.enabled;
        self.env = self.env.merge(&other.env);
        if other.kill_signal.is_some() {
            self.kill_signal = other.kill_signal.clone();
        }
        if other.kill_timeout_ms != default_kill_timeout_ms() {
            self.kill_timeout_ms = other.kill_timeout_ms;
        }
        if other.reload_signal.is_some() {
            self.reload_signal = other.reload_signal.clone();
        }
        if other.splay_ms != 0 {
            self.splay_ms = other.splay_ms;
        }
        if other.timeout_ms != default_timeout_ms() {
            self.timeout_ms = other.timeout_ms;
        }
        self
    }
}

/// Environment passed to child commands.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct EnvConfig {
    /// Start from an empty environment instead of inheriting.
    #[serde(default)]
    pub pristine: bool,

    /// Explicit `KEY=VALUE` additions, applied last.
    #[serde(default)]
    pub custom: Vec<String>,

    /// Keep only matching keys (wildcards with `*`). Empty means all.
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Deprecated alias for `allowlist`; honored only when `allowlist`
    /// is empty.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Drop matching keys (wildcards with `*`), applied after the
    /// allowlist.
    #[serde(default)]
    pub denylist: Vec<String>,

    /// Deprecated alias for `denylist`; honored only when `denylist`
    /// is empty.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl EnvConfig {
    fn effective_allowlist(&self) -> &[String] {
        if !self.allowlist.is_empty() {
            &self.allowlist
        } else {
            &self.whitelist
        }
    }

    fn effective_denylist(&self) -> &[String] {
        if !self.denylist.is_empty() {
            &self.denylist
        } else {
            &self.blacklist
        }
    }

    pub fn merge(mut self, other: &EnvConfig) -> Self {
        self.pristine |= other.pristine;
        if !other.custom.is_empty() {
            self.custom = other.custom.clone();
        }
        if !other.allowlist.is_empty() {
            self.allowlist = other.allowlist.clone();
        }
        if !other.whitelist.is_empty() {
            self.whitelist = other.whitelist.clone();
        }
        if !other.denylist.is_empty() {
            self.denylist = other.denylist.clone();
        }
        if !other.blacklist.is_empty() {
            self.blacklist = other.blacklist.clone();
        }
        self
    }

    /// Builds the child environment from the parent's, applying
    /// pristine, allowlist, denylist and custom entries in that order.
    pub fn build(&self, parent: impl Iterator<Item = (String, String)>) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = Vec::new();
        if !self.pristine {
            let allow = self.effective_allowlist();
            let deny = self.effective_denylist();
            for (key, value) in parent {
                if !allow.is_empty() && !allow.iter().any(|p| glob_match(p, &key)) {
                    continue;
                }
                if deny.iter().any(|p| glob_match(p, &key)) {
                    continue;
                }
                env.push((key, value));
            }
        }
        for entry in &self.custom {
            if let Some((key, value)) = entry.split_once('=') {
                env.retain(|(k, _)| k != key);
                env.push((key.to_string(), value.to_string()));
            }
        }
        env
    }
}

/// `*`-wildcard matching, anywhere in the pattern.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

fn default_enabled() -> bool {
    true
}
fn default_kill_timeout_ms() -> u64 {
    DEFAULT_KILL_TIMEOUT.as_millis() as u64
}
fn default_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_millis() as u64
}

#[cfg(test)]
mod exec_test {
    use super::*;

    fn parent() -> Vec<(String, String)> {
        vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/u".to_string()),
            ("CONSUL_TOKEN".to_string(), "secret".to_string()),
        ]
    }

    #[test]
    fn test_pristine_drops_everything() {
        let env = EnvConfig {
            pristine: true,
            custom: vec!["FOO=bar".to_string()],
            ..Default::default()
        };
        let built = env.build(parent().into_iter());
        assert_eq!(built, vec![("FOO".to_string(), "bar".to_string())]);
    }

    #[test]
    fn test_allowlist_then_denylist() {
        let env = EnvConfig {
            allowlist: vec!["PATH".to_string(), "CONSUL_*".to_string()],
            denylist: vec!["CONSUL_TOKEN".to_string()],
            ..Default::default()
        };
        let built = env.build(parent().into_iter());
        assert_eq!(built, vec![("PATH".to_string(), "/usr/bin".to_string())]);
    }

    #[test]
    fn test_allowlist_wins_over_deprecated_whitelist() {
        let env = EnvConfig {
            allowlist: vec!["PATH".to_string()],
            whitelist: vec!["HOME".to_string()],
            ..Default::default()
        };
        let built = env.build(parent().into_iter());
        assert_eq!(built, vec![("PATH".to_string(), "/usr/bin".to_string())]);
    }

    #[test]
    fn test_deprecated_whitelist_honored_when_allowlist_empty() {
        let env = EnvConfig {
            whitelist: vec!["HOME".to_string()],
            ..Default::default()
        };
        let built = env.build(parent().into_iter());
        assert_eq!(built, vec![("HOME".to_string(), "/home/u".to_string())]);
    }

    #[test]
    fn test_custom_overrides_inherited() {
        let env = EnvConfig {
            custom: vec!["HOME=/tmp".to_string()],
            ..Default::default()
        };
        let built = env.build(parent().into_iter());
        assert!(built.contains(&("HOME".to_string(), "/tmp".to_string())));
        assert!(!built.contains(&("HOME".to_string(), "/home/u".to_string())));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("CONSUL_*", "CONSUL_TOKEN"));
        assert!(glob_match("*", "ANYTHING"));
        assert!(glob_match("*_TOKEN", "VAULT_TOKEN"));
        assert!(glob_match("A*B*C", "AxxByyC"));
        assert!(!glob_match("CONSUL_*", "VAULT_TOKEN"));
        assert!(!glob_match("", "X"));
    }
}
