use super::*;
use crate::clients::HealthStatus;

#[test]
fn test_kv_get_fingerprint_is_deterministic() {
    let a = KvGet::new("foo/bar", Some("dc1"), None);
    let b = KvGet::new("foo/bar", Some("dc1"), None);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(a.fingerprint(), "kv.get|foo/bar@dc1");
}

#[test]
fn test_kv_get_blocking_has_distinct_identity() {
    let plain = KvGet::new("foo", None, None);
    let blocking = KvGet::blocking("foo", None, None);
    assert_ne!(plain.fingerprint(), blocking.fingerprint());
}

#[test]
fn test_kv_get_omits_empty_fields() {
    let dep = KvGet::new("foo", None, None);
    assert_eq!(dep.fingerprint(), "kv.get|foo");
    let dep = KvGet::new("foo", Some(""), None);
    assert_eq!(dep.fingerprint(), "kv.get|foo");
}

#[test]
fn test_kv_get_namespace_is_part_of_identity() {
    let a = KvGet::new("foo", None, Some("ns1"));
    let b = KvGet::new("foo", None, Some("ns2"));
    assert_ne!(a.fingerprint(), b.fingerprint());
}

#[test]
fn test_catalog_services_fingerprint() {
    assert_eq!(CatalogServices::new(None).fingerprint(), "catalog.services");
    assert_eq!(
        CatalogServices::new(Some("dc1")).fingerprint(),
        "catalog.services|@dc1"
    );
}

#[test]
fn test_catalog_service_tag_is_part_of_identity() {
    let untagged = CatalogService::new("web", None, None);
    let tagged = CatalogService::new("web", Some("prod"), None);
    assert_eq!(untagged.fingerprint(), "catalog.service|web");
    assert_eq!(tagged.fingerprint(), "catalog.service|prod.web");
}

#[test]
fn test_health_service_statuses_are_sorted() {
    let a = HealthService::new(
        "web",
        None,
        StatusFilter::Only(vec![HealthStatus::Warning, HealthStatus::Passing]),
        Some("dc1"),
    );
    let b = HealthService::new(
        "web",
        None,
        StatusFilter::Only(vec![HealthStatus::Passing, HealthStatus::Warning]),
        Some("dc1"),
    );
    assert_eq!(a.fingerprint(), "health.service|web [passing,warning]@dc1");
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[test]
fn test_status_filter_parse() {
    assert_eq!(
        StatusFilter::parse("").unwrap(),
        StatusFilter::Only(vec![HealthStatus::Passing])
    );
    assert_eq!(StatusFilter::parse("any").unwrap(), StatusFilter::Any);
    assert!(StatusFilter::parse("any,passing").is_err());
    assert!(StatusFilter::parse("bogus").is_err());
    assert_eq!(
        StatusFilter::parse(" passing , critical ").unwrap(),
        StatusFilter::Only(vec![HealthStatus::Passing, HealthStatus::Critical])
    );
}

#[test]
fn test_file_query_fingerprint() {
    let dep = FileQuery::new("/etc/hosts");
    assert_eq!(dep.fingerprint(), "file|/etc/hosts");
    assert_eq!(dep.kind(), DepKind::Local);
}

#[test]
fn test_vault_fingerprints() {
    assert_eq!(VaultRead::new("secret/foo").fingerprint(), "vault.read|secret/foo");
    assert_eq!(VaultList::new("secret/").fingerprint(), "vault.list|secret/");
    assert!(!VaultAgentToken::new("/tmp/token").can_share());
    assert!(!VaultToken::new(0).can_share());
}

#[test]
fn test_nomad_fingerprints() {
    assert_eq!(NomadServices::new().fingerprint(), "nomad.services");
    assert_eq!(NomadService::new("api").fingerprint(), "nomad.service|api");
    assert_eq!(NomadVar::new("apps/web").fingerprint(), "nomad.var.get|apps/web");
    assert_eq!(NomadVarList::new("apps").fingerprint(), "nomad.var.list|apps");
}
