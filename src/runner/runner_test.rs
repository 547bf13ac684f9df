use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::command::CommandSet;
use super::*;
use crate::clients::TokenRenewal;
use crate::config::{ExecConfig, WaitConfig};
use crate::template::Value;
use crate::test_utils::{fake_clients, FakeConsul};

fn consul_only() -> (ClientSet, Arc<FakeConsul>) {
    let consul = FakeConsul::new();
    let clients = ClientSet::builder().consul(consul.clone()).build();
    (clients, consul)
}

fn inline_template(contents: &str, dest: &std::path::Path) -> TemplateConfig {
    TemplateConfig {
        contents: Some(contents.to_string()),
        destination: Some(dest.to_path_buf()),
        ..Default::default()
    }
}

fn config_with(template: TemplateConfig) -> TemplarConfig {
    TemplarConfig {
        templates: vec![template],
        ..Default::default()
    }
}

const ONCE: RunnerOptions = RunnerOptions { once: true, dry: false };

#[tokio::test(start_paused = true)]
async fn test_once_mode_renders_and_exits() {
    let (clients, consul) = consul_only();
    consul.set_kv("foo", "bar");

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.conf");
    let config = config_with(inline_template(r#"{{ key "foo" }}"#, &dest));

    let mut runner = Runner::new(config, clients, ONCE).await.unwrap();
    runner.start().await.unwrap();

    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "bar");
}

#[tokio::test(start_paused = true)]
async fn test_once_mode_waits_for_every_dependency() {
    let (clients, consul) = consul_only();
    consul.set_kv("a", "1");
    consul.set_kv("b", "2");

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.conf");
    let config = config_with(inline_template(r#"{{ key "a" }}-{{ key "b" }}"#, &dest));

    let mut runner = Runner::new(config, clients, ONCE).await.unwrap();
    runner.start().await.unwrap();

    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "1-2");
}

#[tokio::test(start_paused = true)]
async fn test_dry_mode_leaves_destination_untouched() {
    let (clients, consul) = consul_only();
    consul.set_kv("foo", "bar");

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.conf");
    let config = config_with(inline_template(r#"{{ key "foo" }}"#, &dest));

    let options = RunnerOptions { once: true, dry: true };
    let mut runner = Runner::new(config, clients, options).await.unwrap();
    runner.start().await.unwrap();

    assert!(!dest.exists());
}

#[tokio::test(start_paused = true)]
async fn test_once_mode_surfaces_fetch_errors() {
    let (clients, consul) = consul_only();
    consul.fail_permission(true);

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.conf");
    let config = config_with(inline_template(r#"{{ key "foo" }}"#, &dest));

    let mut runner = Runner::new(config, clients, ONCE).await.unwrap();
    let err = runner.start().await.unwrap_err();
    assert!(matches!(err, Error::Fetch(_)));
    assert!(!dest.exists());
}

#[tokio::test(start_paused = true)]
async fn test_missing_destination_rejected_outside_dry_mode() {
    let (clients, _consul) = consul_only();
    let config = config_with(TemplateConfig {
        contents: Some("static".to_string()),
        ..Default::default()
    });

    let err = Runner::new(config, clients, ONCE).await.unwrap_err();
    assert!(matches!(err, Error::Fatal(_)));
}

#[tokio::test(start_paused = true)]
async fn test_vault_secret_renders_with_token_renewal() {
    let (clients, _consul, vault, _nomad) = fake_clients();
    vault.push_renewal(TokenRenewal {
        lease_duration: 600,
        renewable: true,
    });
    vault.set_secret(
        "secret/db",
        [("pass".to_string(), Value::from("hunter2"))].into(),
    );

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("creds.conf");
    let config = config_with(inline_template(
        r#"{{ with secret "secret/db" }}{{ .Data.pass }}{{ end }}"#,
        &dest,
    ));

    let mut runner = Runner::new(config, clients, ONCE).await.unwrap();
    runner.start().await.unwrap();

    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hunter2");
    assert!(vault.renew_calls() >= 1);
}

/// A burst of changes faster than `wait.min` renders exactly once, when
/// the `wait.max` cap is reached.
#[tokio::test(start_paused = true)]
async fn test_wait_coalesces_bursts_of_changes() {
    let (clients, consul) = consul_only();
    consul.set_kv("foo", "v0");

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.conf");
    let mut template = inline_template(r#"{{ key "foo" }}"#, &dest);
    template.wait = Some(WaitConfig {
        min: Duration::from_millis(10),
        max: Duration::from_millis(40),
    });
    let config = config_with(template);

    let mut runner = Runner::new(config, clients, RunnerOptions::default())
        .await
        .unwrap();
    let handle = tokio::spawn(async move { runner.start().await });

    // Initial value settles after one quiet `min` interval.
    sleep(Duration::from_millis(20)).await;
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "v0");

    // Churn every 5ms, never leaving a 10ms quiet window.
    for i in 1..=7 {
        consul.set_kv("foo", &format!("v{}", i));
        sleep(Duration::from_millis(5)).await;
    }
    // 35ms into the burst: min has never fired and max has not elapsed.
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "v0");

    for i in 8..=12 {
        consul.set_kv("foo", &format!("v{}", i));
        sleep(Duration::from_millis(5)).await;
    }
    // The max deadline at burst start + 40ms forced a render mid-burst.
    assert_ne!(std::fs::read_to_string(&dest).unwrap(), "v0");

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_steady_state_change_renders_after_min() {
    let (clients, consul) = consul_only();
    consul.set_kv("foo", "v1");

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.conf");
    let mut template = inline_template(r#"{{ key "foo" }}"#, &dest);
    template.wait = Some(WaitConfig {
        min: Duration::from_millis(10),
        max: Duration::from_millis(40),
    });
    let config = config_with(template);

    let mut runner = Runner::new(config, clients, RunnerOptions::default())
        .await
        .unwrap();
    let handle = tokio::spawn(async move { runner.start().await });

    sleep(Duration::from_millis(20)).await;
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "v1");

    // One isolated change renders after a single quiet `min` interval.
    consul.set_kv("foo", "v2");
    sleep(Duration::from_millis(20)).await;
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "v2");

    handle.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_template_command_runs_after_render() {
    let (clients, consul) = consul_only();
    consul.set_kv("foo", "bar");

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.conf");
    let marker = dir.path().join("ran");
    let mut template = inline_template(r#"{{ key "foo" }}"#, &dest);
    template.command = Some(format!("touch {}", marker.display()));
    let config = config_with(template);

    let mut runner = Runner::new(config, clients, ONCE).await.unwrap();
    runner.start().await.unwrap();

    // Once mode drains in-flight commands before returning.
    assert!(marker.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_coalesces_overlapping_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("runs.log");
    let commands = CommandSet::new();
    let exec = ExecConfig {
        command: Some(format!("echo run >> {} && sleep 0.2", marker.display())),
        ..Default::default()
    };

    commands.trigger(&exec);
    sleep(Duration::from_millis(50)).await;
    // Three triggers while the first run sleeps coalesce into one
    // follow-up.
    commands.trigger(&exec);
    commands.trigger(&exec);
    commands.trigger(&exec);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while commands.busy() {
        assert!(std::time::Instant::now() < deadline, "commands never drained");
        sleep(Duration::from_millis(20)).await;
    }

    let runs = std::fs::read_to_string(&marker).unwrap().lines().count();
    assert_eq!(runs, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_timeout_kills_child() {
    let commands = CommandSet::new();
    let exec = ExecConfig {
        command: Some("sleep 30".to_string()),
        timeout_ms: 100,
        kill_timeout_ms: 100,
        ..Default::default()
    };

    commands.trigger(&exec);
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while commands.busy() {
        assert!(std::time::Instant::now() < deadline, "timed-out child not reaped");
        sleep(Duration::from_millis(20)).await;
    }
}
