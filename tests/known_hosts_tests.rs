//! 主机密钥存储集成测试

use mmtest::common::HostKeyVerification;
use russh_keys::key::KeyPair;
use mmtest::error::AppError;
use mmtest::ssh::known_hosts::{check_system_known_hosts, fingerprint, SystemHostKey};
use mmtest::ssh::{HostKeyDecision, KnownHostsStore};

#[tokio::test]
async fn test_missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("known_hosts.json");

    let store = KnownHostsStore::load(&path).await.unwrap();
    assert!(store.is_empty());
    assert_eq!(store.path(), Some(path.as_path()));
}

#[tokio::test]
async fn test_learned_host_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("known_hosts.json");
    let fp = fingerprint("AAAAC3NzaC1lZDI1NTE5AAAAIWorker103");

    let mut store = KnownHostsStore::load(&path).await.unwrap();
    assert_eq!(
        store.check("2.2.2.103", 22, &fp, HostKeyVerification::Accept),
        HostKeyDecision::Learned
    );
    store.save().await.unwrap();
    assert!(path.exists());

    let mut reloaded = KnownHostsStore::load(&path).await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(
        reloaded.check("2.2.2.103", 22, &fp, HostKeyVerification::Strict),
        HostKeyDecision::Trusted
    );

    let other = fingerprint("AAAAC3NzaC1lZDI1NTE5AAAAIImposter");
    assert!(!reloaded
        .check("2.2.2.103", 22, &other, HostKeyVerification::Accept)
        .accepted());
}

#[tokio::test]
async fn test_shared_store_without_file() {
    let shared = KnownHostsStore::shared(None).await.unwrap();
    let mut store = shared.lock().await;
    store.insert("2.2.2.110", 22, "abc");
    assert!(store.path().is_none());
    // 没有文件时保存是空操作
    store.save().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("known_hosts.json");
    tokio::fs::write(&path, "not json").await.unwrap();

    let result = KnownHostsStore::load(&path).await;
    assert!(matches!(result, Err(AppError::Config(_))));
}

fn generate_public_key() -> russh_keys::key::PublicKey {
    KeyPair::generate_ed25519()
        .unwrap()
        .clone_public_key()
        .unwrap()
}

#[test]
fn test_system_known_hosts_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".ssh").join("known_hosts");
    let key = generate_public_key();
    let other = generate_public_key();

    // 文件不存在
    assert_eq!(
        check_system_known_hosts("2.2.2.103", 22, &key, &path),
        SystemHostKey::Absent
    );

    russh_keys::learn_known_hosts_path("2.2.2.103", 22, &key, &path).unwrap();
    russh_keys::learn_known_hosts_path("2.2.2.104", 2222, &key, &path).unwrap();

    assert_eq!(
        check_system_known_hosts("2.2.2.103", 22, &key, &path),
        SystemHostKey::Match
    );
    assert_eq!(
        check_system_known_hosts("2.2.2.104", 2222, &key, &path),
        SystemHostKey::Match
    );
    // 端口不同视为另一台主机
    assert_eq!(
        check_system_known_hosts("2.2.2.104", 22, &key, &path),
        SystemHostKey::Absent
    );
    assert!(matches!(
        check_system_known_hosts("2.2.2.103", 22, &other, &path),
        SystemHostKey::Changed { .. }
    ));
}

#[tokio::test]
async fn test_system_known_hosts_trusted_without_store_entry() {
    let dir = tempfile::tempdir().unwrap();
    let system_path = dir.path().join("known_hosts");
    let key = generate_public_key();
    russh_keys::learn_known_hosts_path("2.2.2.108", 22, &key, &system_path).unwrap();

    let mut store = KnownHostsStore::load(&dir.path().join("known_hosts.json"))
        .await
        .unwrap();
    let system = check_system_known_hosts("2.2.2.108", 22, &key, &system_path);
    let fp = fingerprint("AAAAC3NzaC1lZDI1NTE5AAAAIWorker108");

    assert_eq!(
        store.check_with_system("2.2.2.108", 22, &fp, HostKeyVerification::Strict, &system),
        HostKeyDecision::Trusted
    );
    assert!(store.is_empty());

    // 系统文件只读
    let content = std::fs::read_to_string(&system_path).unwrap();
    assert_eq!(content.lines().filter(|l| !l.is_empty()).count(), 1);
}
