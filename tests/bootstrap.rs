use std::rc::Rc;

use seclink::credentials::{provision_security_instance, RES_SECURITY_URI};
use seclink::transport::testkit::LoopbackFactory;
use seclink::{
    BackupManager, ClientState, Config, DeclaredMode, EngineCapabilities, LifecycleCoordinator,
    MemoryStore, ObjectStore, Value, SECURITY_OBJECT_ID, SERVER_OBJECT_ID,
};

const FULL: EngineCapabilities = EngineCapabilities {
    psk: true,
    certificate: true,
};

fn config() -> Config {
    Config::builder()
        .endpoint_name("test-client")
        .rng_seed(11)
        .psk_identity("client1")
        .psk_secret_hex("a1b2c3d4")
        .build()
        .unwrap()
}

fn provision(store: &mut MemoryStore, instance: u16, uri: &str) {
    provision_security_instance(
        store,
        instance,
        uri,
        DeclaredMode::PreSharedKey,
        false,
        &config(),
    )
    .unwrap();
}

fn stored_uri(store: &MemoryStore, instance: u16) -> Option<String> {
    store
        .read(SECURITY_OBJECT_ID, instance, RES_SECURITY_URI)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[test]
fn failed_bootstrap_rolls_back_and_tears_down() {
    let _ = env_logger::try_init();

    let mut store = MemoryStore::new();
    provision(&mut store, 0, "coap://old:5683");
    store.write(SERVER_OBJECT_ID, 0, 1, Value::Integer(300));

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config(), Box::new(factory.clone()), FULL);

    // Entering the bootstrap phase snapshots both objects.
    coordinator.on_state_transition(&store, ClientState::BootstrapRequired);
    coordinator.on_state_transition(&store, ClientState::Bootstrapping);
    assert!(coordinator.backup_pending());

    // The bootstrap server tentatively rewrites the configuration and
    // the client connects to the new address.
    provision(&mut store, 0, "coaps://127.0.0.1:9000");
    store.write(SERVER_OBJECT_ID, 0, 1, Value::Integer(60));
    let id = coordinator.on_connect_request(&store, 0).unwrap();

    // The bootstrap exchange then fails.
    assert!(coordinator.on_step_failure(&mut store));

    // Configuration is back to the pre-bootstrap contents.
    assert_eq!(stored_uri(&store, 0).as_deref(), Some("coap://old:5683"));
    assert_eq!(
        store.read(SERVER_OBJECT_ID, 0, 1).and_then(Value::as_int),
        Some(300)
    );

    // The tentative session is gone, the backup consumed, the state
    // forced back to Initial.
    assert!(coordinator.registry().get(id).is_none());
    assert!(factory.last_handle().closed.get());
    assert!(!coordinator.backup_pending());
    assert_eq!(coordinator.state(), ClientState::Initial);
}

#[test]
fn matching_sessions_survive_the_rollback() {
    let _ = env_logger::try_init();

    let mut store = MemoryStore::new();
    provision(&mut store, 0, "coaps://127.0.0.1:5684");
    provision(&mut store, 1, "coaps://127.0.0.1:7001");

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config(), Box::new(factory.clone()), FULL);

    let keep = coordinator.on_connect_request(&store, 0).unwrap();

    coordinator.on_state_transition(&store, ClientState::Bootstrapping);

    // Only instance 1 is rewritten before the failure.
    provision(&mut store, 1, "coaps://127.0.0.1:9000");
    let stale = coordinator.on_connect_request(&store, 1).unwrap();

    assert!(coordinator.on_step_failure(&mut store));

    // The untouched session survives; the stale one is closed.
    assert!(coordinator.registry().get(keep).is_some());
    assert!(coordinator.registry().get(stale).is_none());
}

#[test]
fn successful_bootstrap_discards_the_backup() {
    let _ = env_logger::try_init();

    let mut store = MemoryStore::new();
    provision(&mut store, 0, "coap://old:5683");

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config(), Box::new(factory), FULL);

    coordinator.on_state_transition(&store, ClientState::Bootstrapping);

    // Bootstrap rewrites the objects, then completes.
    provision(&mut store, 0, "coaps://127.0.0.1:5684");
    coordinator.on_state_transition(&store, ClientState::Ready);

    assert!(!coordinator.backup_pending());
    // The rewritten configuration stays live.
    assert_eq!(
        stored_uri(&store, 0).as_deref(),
        Some("coaps://127.0.0.1:5684")
    );

    // A later non-bootstrap failure is not absorbed here.
    assert!(!coordinator.on_step_failure(&mut store));
    assert_eq!(
        stored_uri(&store, 0).as_deref(),
        Some("coaps://127.0.0.1:5684")
    );
}

#[test]
fn snapshot_twice_releases_the_first_backup() {
    let _ = env_logger::try_init();

    let mut store = MemoryStore::new();
    provision(&mut store, 0, "coap://first:5683");

    let mut backups = BackupManager::new();
    backups.snapshot(&store);

    provision(&mut store, 0, "coap://second:5683");
    backups.snapshot(&store);

    // Only the second snapshot is restorable.
    provision(&mut store, 0, "coap://garbage:5683");
    assert!(backups.restore(&mut store));
    assert_eq!(stored_uri(&store, 0).as_deref(), Some("coap://second:5683"));

    // It was consumed by the restore.
    assert!(!backups.has_pending());
    assert!(!backups.restore(&mut store));
}

#[test]
fn snapshot_restore_round_trip_is_exact() {
    let _ = env_logger::try_init();

    let mut store = MemoryStore::new();
    provision(&mut store, 0, "coap://old:5683");
    provision(&mut store, 3, "coaps://other:5684");
    store.write(SERVER_OBJECT_ID, 0, 0, Value::Integer(101));
    store.write(SERVER_OBJECT_ID, 0, 1, Value::Integer(300));

    let before_security = store.export(SECURITY_OBJECT_ID);
    let before_server = store.export(SERVER_OBJECT_ID);

    let mut backups = BackupManager::new();
    backups.snapshot(&store);
    assert!(backups.restore(&mut store));

    assert_eq!(store.export(SECURITY_OBJECT_ID), before_security);
    assert_eq!(store.export(SERVER_OBJECT_ID), before_server);
}
