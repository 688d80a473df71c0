//! Two devices exchanging environments through an in-memory relay.

use ksync_client::{DeviceIdentity, DeviceKeyPair, MockRelay, SecretStore, SyncEngine, SyncError};
use ksync_core::Declarations;
use ksync_types::{EnvironmentId, EnvironmentRecord, UserId};
use tempfile::TempDir;

struct Device {
    _dir: TempDir,
    engine: SyncEngine<MockRelay>,
}

fn device(relay: &MockRelay, user: &str, envs: &[&EnvironmentId]) -> Device {
    let dir = tempfile::tempdir().unwrap();
    let pair = DeviceKeyPair::generate().unwrap();
    let registered = relay.register_device(user, pair.public_key());
    for env in envs {
        relay.grant(env, registered.device_id);
    }
    let identity = DeviceIdentity::from_key_pair(
        registered.user_id,
        registered.device_id,
        registered.device_uid,
        &pair,
    );
    let declarations = Declarations::default()
        .with_secret("DATABASE_URL", true)
        .with_file("certs/server.pem", true);
    let store = SecretStore::open(dir.path().join("cache"), dir.path().join("work"), declarations)
        .unwrap();
    let engine = SyncEngine::new(relay.clone(), store, identity, "project-1").unwrap();
    Device { _dir: dir, engine }
}

fn adopt(device: &Device, relay: &MockRelay, env: &EnvironmentId, name: &str) {
    device
        .engine
        .store()
        .create_environment(EnvironmentRecord::new(
            env.clone(),
            name,
            relay.stamp(env).unwrap(),
        ))
        .unwrap();
}

#[tokio::test]
async fn send_then_fetch_is_byte_identical() {
    let relay = MockRelay::new();
    let prod = relay.add_environment("prod");
    let alice = device(&relay, "alice", &[&prod]);
    let bob = device(&relay, "bob", &[&prod]);
    adopt(&alice, &relay, &prod, "prod");

    let binary: Vec<u8> = (0u8..=255).rev().collect();
    let store = alice.engine.store();
    store
        .set_secret("prod", "DATABASE_URL", "postgres://u:p@db/app?sslmode=require")
        .unwrap();
    store.set_secret("prod", "MULTILINE", "line one\nline \"two\"").unwrap();
    store.set_file("prod", "certs/server.pem", &binary).unwrap();
    store
        .set_file("prod", "config/nested/app.yml", b"port: 443\n")
        .unwrap();

    alice.engine.send(&["prod"]).await.unwrap();
    let report = bob.engine.fetch().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.changes.get("prod").map(<[_]>::len), Some(4));
    assert_eq!(
        bob.engine.store().load_snapshot("prod").unwrap(),
        alice.engine.store().load_snapshot("prod").unwrap()
    );
    assert_eq!(
        bob.engine.store().stamp("prod").unwrap(),
        alice.engine.store().stamp("prod").unwrap()
    );

    let materialized = bob.engine.materialize("prod").await.unwrap();
    assert_eq!(materialized.written.len(), 2);
    let pem = std::fs::read(bob.engine.store().working_dir().join("certs/server.pem")).unwrap();
    assert_eq!(pem, binary);
}

#[tokio::test]
async fn reply_after_fetch_round_trips_back() {
    let relay = MockRelay::new();
    let dev = relay.add_environment("dev");
    let alice = device(&relay, "alice", &[&dev]);
    let bob = device(&relay, "bob", &[&dev]);
    adopt(&alice, &relay, &dev, "dev");
    alice.engine.store().set_secret("dev", "DATABASE_URL", "postgres://dev").unwrap();
    alice.engine.send(&["dev"]).await.unwrap();

    bob.engine.fetch().await.unwrap();
    bob.engine
        .set_secret("dev", "FEATURE_FLAG", "on", None)
        .await
        .unwrap();
    bob.engine.send(&["dev"]).await.unwrap();

    let report = alice.engine.fetch().await.unwrap();
    let changes = report.changes.get("dev").unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].name, "FEATURE_FLAG");
    assert_eq!(changes[0].to, "on");

    // the fetch just changed this entry
    assert!(matches!(
        alice.engine.set_secret("dev", "FEATURE_FLAG", "off", None).await,
        Err(SyncError::Conflict { .. })
    ));
}

#[tokio::test]
async fn revoked_device_cannot_be_targeted() {
    let relay = MockRelay::new();
    let prod = relay.add_environment("prod");
    let alice = device(&relay, "alice", &[&prod]);
    let bob = device(&relay, "bob", &[&prod]);
    adopt(&alice, &relay, &prod, "prod");
    relay.revoke(&prod, bob.engine.identity().device_id);

    let result = alice
        .engine
        .send_to_member(&["prod"], &UserId::new("bob"))
        .await;

    assert!(matches!(
        result,
        Err(SyncError::NoPublicKeyForRecipient { .. })
    ));
}
