use std::time::Duration;

use super::*;

fn parse_toml(s: &str) -> TemplarConfig {
    let parsed: TemplarConfig = config::Config::builder()
        .add_source(config::File::from_str(s, config::FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();
    parsed
}

#[test]
fn test_wait_string_form() {
    let c = parse_toml(r#"wait = "10s:20s""#);
    assert_eq!(
        c.wait,
        Some(WaitConfig {
            min: Duration::from_secs(10),
            max: Duration::from_secs(20),
        })
    );
}

#[test]
fn test_wait_table_form_defaults_max() {
    let c = parse_toml(
        r#"
        [wait]
        min = "10s"
        "#,
    );
    assert_eq!(
        c.wait,
        Some(WaitConfig {
            min: Duration::from_secs(10),
            max: Duration::from_secs(40),
        })
    );
}

#[test]
fn test_template_stanzas() {
    let c = parse_toml(
        r#"
        [[template]]
        contents = "{{ key \"foo\" }}"
        destination = "/tmp/out"
        perms = "0600"
        backup = true

        [[template]]
        source = "/etc/in.tmpl"
        destination = "/tmp/out2"
        error_on_missing_key = true
        "#,
    );
    assert_eq!(c.templates.len(), 2);
    assert!(c.templates[0].validate().is_ok());
    assert!(c.templates[0].backup);
    assert_eq!(c.templates[0].perms.as_deref(), Some("0600"));
    assert!(c.templates[1].error_on_missing_key);
}

#[test]
fn test_finalize_materializes_defaults() {
    let mut c = TemplarConfig::default();
    c.finalize();
    assert_eq!(c.max_stale.as_deref(), Some("2s"));
    assert_eq!(c.kill_signal.as_deref(), Some("SIGINT"));
    assert_eq!(c.reload_signal.as_deref(), Some("SIGHUP"));
    assert_eq!(c.max_stale_duration(), Some(Duration::from_secs(2)));
}

#[test]
fn test_finalize_is_idempotent() {
    let mut once = parse_toml(r#"max_stale = "5s""#);
    once.finalize();
    let mut twice = once.clone();
    twice.finalize();
    assert_eq!(once.max_stale, twice.max_stale);
    assert_eq!(once.kill_signal, twice.kill_signal);
}

#[test]
fn test_merge_right_bias() {
    let left = parse_toml(r#"log_level = "debug""#);
    let right = parse_toml(r#"log_level = "warn""#);
    let merged = left.clone().merge(&right);
    assert_eq!(merged.log_level.as_deref(), Some("warn"));

    let merged = right.merge(&TemplarConfig::default());
    assert_eq!(merged.log_level.as_deref(), Some("warn"));
}

#[test]
fn test_merge_appends_templates() {
    let left = parse_toml(
        r#"
        [[template]]
        contents = "a"
        "#,
    );
    let right = parse_toml(
        r#"
        [[template]]
        contents = "b"
        "#,
    );
    let merged = left.merge(&right);
    assert_eq!(merged.templates.len(), 2);
}

#[test]
fn test_exec_block() {
    let c = parse_toml(
        r#"
        [exec]
        command = "restart all"
        splay_ms = 500

        [exec.env]
        pristine = true
        custom = ["MODE=prod"]
        "#,
    );
    let exec = c.exec.unwrap();
    assert_eq!(exec.command.as_deref(), Some("restart all"));
    assert_eq!(exec.splay(), Duration::from_millis(500));
    assert!(exec.env.pristine);
}

#[test]
fn test_vault_config_defaults() {
    let c = parse_toml(
        r#"
        [vault]
        address = "https://vault:8200"
        "#,
    );
    assert!(c.vault.renew_token);
    assert!(!c.vault.unwrap_token);
}
