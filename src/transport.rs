//! Secure-transport engine capability boundary.
//!
//! The actual handshake cryptography lives behind [`SecureTransport`]:
//! this crate decides which engine variant to configure and with what
//! credentials, then moves datagrams through it. Engines are produced by
//! a [`TransportFactory`] selected at runtime from one compiled feature
//! set, never by separate per-backend builds.

use std::io;
use std::net::UdpSocket;

use log::trace;

use crate::config::Config;
use crate::credentials::SecurityCredentials;
use crate::error::{ConnectError, TransportError};
use crate::mode::SecurityMode;
use crate::rng::SeededRng;

/// Ciphersuites the engines understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    PskAes128Ccm,
    PskAes128GcmSha256,
    EcdheEcdsaAes128GcmSha256,
    EcdheRsaAes256GcmSha384,
}

impl CipherSuite {
    /// All supported suites in default preference order.
    pub fn all() -> &'static [CipherSuite] {
        &[
            CipherSuite::EcdheEcdsaAes128GcmSha256,
            CipherSuite::EcdheRsaAes256GcmSha384,
            CipherSuite::PskAes128GcmSha256,
            CipherSuite::PskAes128Ccm,
        ]
    }

    /// IANA-style name, as accepted by the ciphersuite override.
    pub fn name(&self) -> &'static str {
        match self {
            CipherSuite::PskAes128Ccm => "TLS_PSK_WITH_AES_128_CCM",
            CipherSuite::PskAes128GcmSha256 => "TLS_PSK_WITH_AES_128_GCM_SHA256",
            CipherSuite::EcdheEcdsaAes128GcmSha256 => {
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"
            }
            CipherSuite::EcdheRsaAes256GcmSha384 => "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        }
    }

    /// Look a suite up by name.
    pub fn from_name(name: &str) -> Option<CipherSuite> {
        CipherSuite::all().iter().copied().find(|s| s.name() == name)
    }

    /// Whether the suite authenticates with a pre-shared key.
    pub fn is_psk(&self) -> bool {
        matches!(
            self,
            CipherSuite::PskAes128Ccm | CipherSuite::PskAes128GcmSha256
        )
    }

    /// Whether the suite can be offered under the given security mode.
    pub fn compatible_with(&self, mode: SecurityMode) -> bool {
        match mode {
            SecurityMode::None => false,
            SecurityMode::Psk => self.is_psk(),
            SecurityMode::Certificate => !self.is_psk(),
        }
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Filter an offered suite list down to what a mode can use.
pub fn suites_for_mode(suites: &[CipherSuite], mode: SecurityMode) -> Vec<CipherSuite> {
    suites
        .iter()
        .copied()
        .filter(|s| s.compatible_with(mode))
        .collect()
}

/// One established or establishing secure channel.
///
/// All operations are non-blocking. Transient unreadiness (handshake
/// still settling, no datagram pending) surfaces as
/// [`TransportError::WouldBlock`]; anything unrecoverable as
/// [`TransportError::Fatal`].
pub trait SecureTransport {
    /// Drive the handshake one step. `Ok(true)` once established.
    fn handshake_step(&mut self) -> Result<bool, TransportError>;

    /// Encrypt and hand one datagram to the peer.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive and decrypt one datagram into `buf`, returning its length.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Best-effort close notification. Must not fail.
    fn close_notify(&mut self);
}

/// Produces engines configured for one peer.
pub trait TransportFactory {
    /// Configure a new engine over `socket` for the given credentials.
    ///
    /// The socket is already bound, connected to the peer and set
    /// non-blocking. The factory must fully release anything it acquired
    /// when it fails.
    fn open(
        &self,
        socket: &UdpSocket,
        credentials: &SecurityCredentials,
        config: &Config,
        rng: &mut SeededRng,
    ) -> Result<Box<dyn SecureTransport>, ConnectError>;
}

/// Engine for security mode None: raw UDP datagrams, no handshake.
pub struct PlaintextFactory;

impl TransportFactory for PlaintextFactory {
    fn open(
        &self,
        socket: &UdpSocket,
        credentials: &SecurityCredentials,
        _config: &Config,
        _rng: &mut SeededRng,
    ) -> Result<Box<dyn SecureTransport>, ConnectError> {
        if credentials.mode != SecurityMode::None {
            return Err(ConnectError::TransportSetupFailed(format!(
                "Plaintext engine cannot provide {:?}",
                credentials.mode
            )));
        }

        let socket = socket.try_clone().map_err(|e| {
            ConnectError::TransportSetupFailed(format!("Socket clone failed: {}", e))
        })?;

        Ok(Box::new(PlaintextTransport { socket }))
    }
}

struct PlaintextTransport {
    socket: UdpSocket,
}

impl SecureTransport for PlaintextTransport {
    fn handshake_step(&mut self) -> Result<bool, TransportError> {
        // Nothing to negotiate.
        Ok(true)
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.socket.send(data).map_err(map_io)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.socket.recv(buf).map_err(map_io)?;
        trace!("Plaintext datagram of {} bytes", n);
        Ok(n)
    }

    fn close_notify(&mut self) {
        // Plaintext has no close notification on the wire.
    }
}

fn map_io(e: io::Error) -> TransportError {
    if e.kind() == io::ErrorKind::WouldBlock {
        TransportError::WouldBlock
    } else {
        TransportError::Fatal(e.to_string())
    }
}

pub mod testkit {
    //! Deterministic in-memory engine for tests.
    //!
    //! [`LoopbackFactory`] records exactly what each engine was
    //! configured with (credentials, suites, handshake randomness) and
    //! moves datagrams through in-memory queues, so session and
    //! lifecycle behavior can be tested without a DTLS stack.

    use std::cell::{Cell, Ref, RefCell};
    use std::collections::VecDeque;
    use std::net::UdpSocket;
    use std::rc::Rc;

    use super::{suites_for_mode, CipherSuite, SecureTransport, TransportFactory};
    use crate::config::Config;
    use crate::credentials::SecurityCredentials;
    use crate::error::{ConnectError, TransportError};
    use crate::rng::SeededRng;

    type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

    /// Test-side view of one opened engine.
    #[derive(Clone)]
    pub struct EngineHandle {
        /// Snapshot of the credentials the engine was configured with.
        pub credentials: SecurityCredentials,
        /// Suites offered for the selected mode.
        pub cipher_suites: Vec<CipherSuite>,
        /// Handshake randomness drawn from the session RNG.
        pub handshake_seed: u64,
        /// Datagrams queued for the session to receive.
        pub inbox: Queue,
        /// Datagrams the session has sent.
        pub outbox: Queue,
        /// Set once close_notify ran.
        pub closed: Rc<Cell<bool>>,
    }

    impl EngineHandle {
        /// Queue a datagram for the session to receive.
        pub fn push_inbound(&self, data: &[u8]) {
            self.inbox.borrow_mut().push_back(data.to_vec());
        }

        /// Take the next datagram the session sent.
        pub fn pop_outbound(&self) -> Option<Vec<u8>> {
            self.outbox.borrow_mut().pop_front()
        }
    }

    /// Factory producing loopback engines.
    #[derive(Default)]
    pub struct LoopbackFactory {
        handles: RefCell<Vec<EngineHandle>>,
        /// When set, the next open fails with TransportSetupFailed.
        pub fail_setup: Cell<bool>,
        /// Sends/receives reporting WouldBlock before the handshake settles.
        pub handshake_delay: Cell<usize>,
    }

    impl LoopbackFactory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Engines opened so far, in open order.
        pub fn handles(&self) -> Ref<'_, Vec<EngineHandle>> {
            self.handles.borrow()
        }

        /// The most recently opened engine.
        pub fn last_handle(&self) -> EngineHandle {
            self.handles
                .borrow()
                .last()
                .expect("No engine opened yet")
                .clone()
        }

        pub fn opened(&self) -> usize {
            self.handles.borrow().len()
        }
    }

    impl TransportFactory for LoopbackFactory {
        fn open(
            &self,
            _socket: &UdpSocket,
            credentials: &SecurityCredentials,
            config: &Config,
            rng: &mut SeededRng,
        ) -> Result<Box<dyn SecureTransport>, ConnectError> {
            if self.fail_setup.get() {
                return Err(ConnectError::TransportSetupFailed(
                    "Engine refused by test".into(),
                ));
            }

            let handle = EngineHandle {
                credentials: credentials.clone(),
                cipher_suites: suites_for_mode(config.cipher_suites(), credentials.mode),
                handshake_seed: rng.random(),
                inbox: Queue::default(),
                outbox: Queue::default(),
                closed: Rc::new(Cell::new(false)),
            };

            let transport = LoopbackTransport {
                inbox: handle.inbox.clone(),
                outbox: handle.outbox.clone(),
                closed: handle.closed.clone(),
                spins_left: self.handshake_delay.get(),
            };

            self.handles.borrow_mut().push(handle);

            Ok(Box::new(transport))
        }
    }

    // Tests keep their own Rc to the factory while the coordinator owns
    // the boxed copy.
    impl TransportFactory for Rc<LoopbackFactory> {
        fn open(
            &self,
            socket: &UdpSocket,
            credentials: &SecurityCredentials,
            config: &Config,
            rng: &mut SeededRng,
        ) -> Result<Box<dyn SecureTransport>, ConnectError> {
            (**self).open(socket, credentials, config, rng)
        }
    }

    struct LoopbackTransport {
        inbox: Queue,
        outbox: Queue,
        closed: Rc<Cell<bool>>,
        spins_left: usize,
    }

    impl LoopbackTransport {
        fn settle(&mut self) -> bool {
            if self.spins_left > 0 {
                self.spins_left -= 1;
                false
            } else {
                true
            }
        }
    }

    impl SecureTransport for LoopbackTransport {
        fn handshake_step(&mut self) -> Result<bool, TransportError> {
            if self.closed.get() {
                return Err(TransportError::Fatal("Engine closed".into()));
            }
            Ok(self.settle())
        }

        fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            if self.closed.get() {
                return Err(TransportError::Fatal("Engine closed".into()));
            }
            if !self.settle() {
                return Err(TransportError::WouldBlock);
            }
            self.outbox.borrow_mut().push_back(data.to_vec());
            Ok(data.len())
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.closed.get() {
                return Err(TransportError::Fatal("Engine closed".into()));
            }
            match self.inbox.borrow_mut().pop_front() {
                Some(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                None => Err(TransportError::WouldBlock),
            }
        }

        fn close_notify(&mut self) {
            self.closed.set(true);
        }
    }
}
