use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::clients::{HealthStatus, TokenRenewal};
use crate::config::{RetryConfig, VaultConfig};
use crate::dependency::{Dep, KvGet, StatusFilter, VaultRead};
use crate::dependency::{Dependency, HealthService};
use crate::template::Value;
use crate::test_utils::{fake_clients, health_entry};

fn kv(path: &str) -> Dep {
    Arc::new(KvGet::new(path, None, None))
}

async fn recv_update(
    channels: &mut WatcherChannels,
) -> ViewUpdate {
    timeout(Duration::from_secs(120), channels.data_rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("data channel closed")
}

#[tokio::test(start_paused = true)]
async fn test_add_is_idempotent_by_fingerprint() {
    let (clients, _consul, _vault, _nomad) = fake_clients();
    let (watcher, _channels) = Watcher::new(clients, ViewConfig::default());

    assert!(watcher.add(kv("foo")));
    assert!(!watcher.add(kv("foo")));
    assert_eq!(watcher.size(), 1);
    assert!(watcher.watching("kv.get|foo"));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_view_publishes_on_change() {
    let (clients, consul, _vault, _nomad) = fake_clients();
    consul.set_kv("foo", "bar");
    let (watcher, mut channels) = Watcher::new(clients, ViewConfig::default());
    watcher.add(kv("foo"));

    let update = recv_update(&mut channels).await;
    assert_eq!(update.dep.fingerprint(), "kv.get|foo");
    assert_eq!(update.value, Value::from("bar"));

    consul.set_kv("foo", "baz");
    let update = recv_update(&mut channels).await;
    assert_eq!(update.value, Value::from("baz"));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_view_indexes_are_monotonic() {
    let (clients, consul, _vault, _nomad) = fake_clients();
    consul.set_kv("foo", "1");
    let (watcher, mut channels) = Watcher::new(clients, ViewConfig::default());
    watcher.add(kv("foo"));

    let first = recv_update(&mut channels).await;
    consul.set_kv("foo", "2");
    let second = recv_update(&mut channels).await;
    assert!(second.last_index > first.last_index);
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_view_suppresses_equal_values() {
    let (clients, consul, _vault, _nomad) = fake_clients();
    consul.set_kv("foo", "same");
    let (watcher, mut channels) = Watcher::new(clients, ViewConfig::default());
    watcher.add(kv("foo"));
    let _ = recv_update(&mut channels).await;

    // Touch an unrelated key: the index moves but foo's value does not.
    consul.set_kv("unrelated", "x");
    consul.set_kv("foo", "changed");
    let update = recv_update(&mut channels).await;
    assert_eq!(update.value, Value::from("changed"));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_remove_stops_view() {
    let (clients, _consul, _vault, _nomad) = fake_clients();
    let (watcher, _channels) = Watcher::new(clients, ViewConfig::default());
    watcher.add(kv("foo"));
    assert!(watcher.remove("kv.get|foo"));
    assert!(!watcher.remove("kv.get|foo"));
    assert_eq!(watcher.size(), 0);
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_prune_retains_protected_views() {
    let (clients, _consul, _vault, _nomad) = fake_clients();
    let (watcher, _channels) = Watcher::new(clients, ViewConfig::default());
    watcher.add(kv("used"));
    watcher.add(kv("stale"));
    watcher.add_protected(Arc::new(crate::dependency::VaultToken::new(0)));

    let keep = ["kv.get|used".to_string()].into_iter().collect();
    watcher.prune(&keep);

    assert!(watcher.watching("kv.get|used"));
    assert!(!watcher.watching("kv.get|stale"));
    assert!(watcher.watching("vault.token.renew"));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_surfaces_error() {
    let (clients, consul, _vault, _nomad) = fake_clients();
    consul.fail_transport(usize::MAX);
    let config = ViewConfig {
        retry: RetryConfig {
            attempts: 3,
            backoff_ms: 10,
            max_backoff_ms: 100,
        },
        ..Default::default()
    };
    let (watcher, mut channels) = Watcher::new(clients, config);
    watcher.add(kv("foo"));

    let err = timeout(Duration::from_secs(300), channels.err_rx.recv())
        .await
        .expect("timed out waiting for error")
        .expect("error channel closed");
    assert_eq!(err.dep.fingerprint(), "kv.get|foo");
    assert!(err.error.is_transient());
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_permission_error_is_fatal_immediately() {
    let (clients, consul, _vault, _nomad) = fake_clients();
    consul.fail_permission(true);
    let (watcher, mut channels) = Watcher::new(clients, ViewConfig::default());
    watcher.add(kv("foo"));

    let err = timeout(Duration::from_secs(120), channels.err_rx.recv())
        .await
        .expect("timed out")
        .expect("closed");
    assert!(matches!(err.error, crate::errors::FetchError::PermissionDenied(_)));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_once_mode_view_terminates_after_first_publish() {
    let (clients, consul, _vault, _nomad) = fake_clients();
    consul.set_kv("foo", "bar");
    let config = ViewConfig {
        once: true,
        ..Default::default()
    };
    let (watcher, mut channels) = Watcher::new(clients, config);
    watcher.add(kv("foo"));

    let _ = recv_update(&mut channels).await;
    // Further changes produce nothing: the View already returned.
    consul.set_kv("foo", "baz");
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(channels.data_rx.try_recv().is_err());
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_health_service_filter_applied() {
    let (clients, consul, _vault, _nomad) = fake_clients();
    consul.set_health(
        "webapp",
        vec![
            health_entry("1.2.3.4", &["prod", "staging"], HealthStatus::Passing),
            health_entry("5.6.7.8", &["staging"], HealthStatus::Critical),
        ],
    );
    let (watcher, mut channels) = Watcher::new(clients, ViewConfig::default());
    let dep: Dep = Arc::new(HealthService::new(
        "webapp",
        None,
        StatusFilter::parse("passing").unwrap(),
        None,
    ));
    watcher.add(dep);

    let update = recv_update(&mut channels).await;
    let list = update.value.as_list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].field("Address"), Some(&Value::from("1.2.3.4")));
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_vault_ttl_zero_retries_then_succeeds() {
    let (clients, _consul, vault, _nomad) = fake_clients();
    vault.set_secret("secret/foo", [("pass".to_string(), Value::from("hunter2"))].into());
    vault.ttl_zero_times("secret/foo", 3);

    let (watcher, mut channels) = Watcher::new(clients, ViewConfig::default());
    watcher.add(Arc::new(VaultRead::new("secret/foo")));

    // Three TTL=0 answers back off 250ms, 500ms, 1s, then the secret
    // arrives; no error ever surfaces.
    let update = recv_update(&mut channels).await;
    let data = update.value.field("Data").unwrap();
    assert_eq!(data.field("pass"), Some(&Value::from("hunter2")));
    assert!(channels.err_rx.try_recv().is_err());
    watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_vault_token_file_swap() {
    let (clients, _consul, vault, _nomad) = fake_clients();
    vault.push_renewal(TokenRenewal {
        lease_duration: 600,
        renewable: true,
    });
    vault.set_secret("secret/foo", [("k".to_string(), Value::from("v"))].into());

    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join("token");
    std::fs::write(&token_file, "first-token\n").unwrap();

    let (watcher, mut channels) = Watcher::new(clients.clone(), ViewConfig::default());
    let config = VaultConfig {
        agent_token_file: Some(token_file.to_string_lossy().into_owned()),
        renew_token: true,
        ..Default::default()
    };
    let _fatal_rx = watch_vault_token(&watcher, &config).await.unwrap();

    // Wait for the first token to land on the client.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while *clients.vault().unwrap().token() != "first-token" {
        assert!(tokio::time::Instant::now() < deadline, "token never applied");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Reads started after the swap use the new token.
    watcher.add(Arc::new(VaultRead::new("secret/foo")));
    let _ = recv_update(&mut channels).await;
    assert!(vault.tokens_seen().contains(&"first-token".to_string()));
    watcher.stop();
}
