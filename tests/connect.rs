use std::net::UdpSocket;
use std::rc::Rc;
use std::time::Duration;

use seclink::credentials::provision_security_instance;
use seclink::transport::testkit::LoopbackFactory;
use seclink::{
    ClientState, Config, ConnectError, CredentialSource, DeclaredMode, EngineCapabilities, Error,
    LifecycleCoordinator, MemoryStore, PlaintextFactory, SecurityMode, TransportError,
};

const FULL: EngineCapabilities = EngineCapabilities {
    psk: true,
    certificate: true,
};

fn psk_config() -> Config {
    Config::builder()
        .endpoint_name("test-client")
        .rng_seed(7)
        .psk_identity("client1")
        .psk_secret_hex("a1b2c3d4")
        .build()
        .unwrap()
}

#[test]
fn psk_connect_configures_engine_with_decoded_secret() {
    let _ = env_logger::try_init();

    let config = psk_config();
    let mut store = MemoryStore::new();
    provision_security_instance(
        &mut store,
        0,
        "coaps://127.0.0.1:5684",
        DeclaredMode::PreSharedKey,
        false,
        &config,
    )
    .unwrap();

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config, Box::new(factory.clone()), FULL);

    let id = coordinator.on_connect_request(&store, 0).unwrap();

    let handle = factory.last_handle();
    assert_eq!(handle.credentials.mode, SecurityMode::Psk);
    assert_eq!(
        handle.credentials.psk_identity.as_deref(),
        Some(&b"client1"[..])
    );
    assert_eq!(
        handle.credentials.psk_secret.as_deref(),
        Some(&[0xA1, 0xB2, 0xC3, 0xD4][..])
    );
    assert!(handle.cipher_suites.iter().all(|s| s.is_psk()));

    // Traffic flows through the configured engine.
    assert_eq!(coordinator.send(id, b"register").unwrap(), 8);
    assert_eq!(handle.pop_outbound().as_deref(), Some(&b"register"[..]));

    handle.push_inbound(b"created");
    let mut buf = [0u8; 128];
    assert_eq!(coordinator.receive(id, &mut buf).unwrap(), 7);
    assert_eq!(&buf[..7], b"created");
}

#[test]
fn certificate_connect_carries_sni_and_cid() {
    let _ = env_logger::try_init();

    let config = Config::builder()
        .endpoint_name("test-client")
        .rng_seed(7)
        .credential_source(CredentialSource::Inline {
            ca: b"CA PEM".to_vec(),
            certificate: b"CERT PEM".to_vec(),
            private_key: b"KEY PEM".to_vec(),
        })
        .sni("mgmt.example.com")
        .connection_id(true)
        .connection_id_hex("c1d2")
        .build()
        .unwrap();

    let mut store = MemoryStore::new();
    provision_security_instance(
        &mut store,
        0,
        "coaps://127.0.0.1:5684",
        DeclaredMode::Certificate,
        false,
        &config,
    )
    .unwrap();

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config, Box::new(factory.clone()), FULL);

    coordinator.on_connect_request(&store, 0).unwrap();

    let creds = &factory.last_handle().credentials;
    assert_eq!(creds.mode, SecurityMode::Certificate);
    assert_eq!(creds.client_cert.as_deref(), Some(&b"CERT PEM"[..]));
    assert_eq!(creds.client_key.as_deref(), Some(&b"KEY PEM"[..]));
    assert_eq!(creds.ca_cert.as_deref(), Some(&b"CA PEM"[..]));
    assert_eq!(creds.sni.as_deref(), Some("mgmt.example.com"));
    assert_eq!(creds.connection_id.as_deref(), Some(&[0xC1, 0xD2][..]));
}

#[test]
fn plaintext_datagrams_reach_a_real_peer() {
    let _ = env_logger::try_init();

    // A local UDP "server" stands in for the management server.
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let config = Config::builder()
        .endpoint_name("test-client")
        .rng_seed(7)
        .build()
        .unwrap();
    let mut store = MemoryStore::new();
    provision_security_instance(
        &mut store,
        0,
        &format!("coap://127.0.0.1:{}", port),
        DeclaredMode::NoSec,
        false,
        &config,
    )
    .unwrap();

    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config, Box::new(PlaintextFactory), FULL);

    let id = coordinator.on_connect_request(&store, 0).unwrap();
    assert_eq!(coordinator.send(id, b"hello").unwrap(), 5);

    let mut buf = [0u8; 64];
    let (n, from) = server.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");

    // And back again.
    server.send_to(b"world", from).unwrap();
    let n = loop {
        match coordinator.receive(id, &mut buf) {
            Ok(n) => break n,
            Err(Error::Transport(TransportError::WouldBlock)) => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("receive failed: {}", e),
        }
    };
    assert_eq!(&buf[..n], b"world");
}

#[test]
fn connect_errors_are_local_to_the_peer() {
    let _ = env_logger::try_init();

    let config = psk_config();
    let mut store = MemoryStore::new();

    // Unrecognized scheme.
    provision_security_instance(
        &mut store,
        0,
        "mqtt://broker:1883",
        DeclaredMode::PreSharedKey,
        false,
        &config,
    )
    .unwrap();
    // A healthy peer next to it.
    provision_security_instance(
        &mut store,
        1,
        "coaps://127.0.0.1:5684",
        DeclaredMode::PreSharedKey,
        false,
        &config,
    )
    .unwrap();

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config, Box::new(factory.clone()), FULL);

    let result = coordinator.on_connect_request(&store, 0);
    assert!(matches!(
        result,
        Err(Error::Connect(ConnectError::BadUri(_)))
    ));

    // The failure did not poison the other peer.
    coordinator.on_connect_request(&store, 1).unwrap();
    assert_eq!(coordinator.registry().len(), 1);
}

#[test]
fn missing_credentials_abort_the_connect() {
    let _ = env_logger::try_init();

    let config = psk_config();
    let store = MemoryStore::new();

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config, Box::new(factory), FULL);

    // No security object instance at all.
    let result = coordinator.on_connect_request(&store, 0);
    assert!(matches!(result, Err(Error::Credential(_))));
    assert!(coordinator.registry().is_empty());
}

#[test]
fn transition_to_ready_keeps_sessions() {
    let _ = env_logger::try_init();

    let config = psk_config();
    let mut store = MemoryStore::new();
    provision_security_instance(
        &mut store,
        0,
        "coaps://127.0.0.1:5684",
        DeclaredMode::PreSharedKey,
        false,
        &config,
    )
    .unwrap();

    let factory = Rc::new(LoopbackFactory::new());
    let mut coordinator =
        LifecycleCoordinator::with_capabilities(config, Box::new(factory.clone()), FULL);

    let id = coordinator.on_connect_request(&store, 0).unwrap();
    coordinator.on_state_transition(&store, ClientState::Registering);
    coordinator.on_state_transition(&store, ClientState::Ready);

    assert!(coordinator.registry().get(id).is_some());
    assert!(!factory.last_handle().closed.get());
}
