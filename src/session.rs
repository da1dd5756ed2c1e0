//! One secure session per peer.
//!
//! A session owns its socket, its transport engine and the credential
//! snapshot that configured it. Lifecycle is `Connecting` →
//! `Established` → `Closed`, with `Closed` terminal. Handshake
//! completion is delegated to the engine and may be lazy, settling on
//! the first send or receive.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use log::{debug, warn};

use crate::config::Config;
use crate::credentials::SecurityCredentials;
use crate::error::{ConnectError, TransportError};
use crate::mode::SecurityMode;
use crate::rng::SeededRng;
use crate::store::InstanceId;
use crate::transport::{SecureTransport, TransportFactory};
use crate::uri::PeerUri;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Established,
    Closed,
}

/// A secure channel to one peer.
pub struct SecureSession {
    peer_uri: String,
    peer_addr: SocketAddr,
    instance: InstanceId,
    mode: SecurityMode,
    state: SessionState,
    spin_limit: usize,
    socket: Option<UdpSocket>,
    engine: Option<Box<dyn SecureTransport>>,
}

impl SecureSession {
    /// Resolve the peer, bind and connect a socket, and configure the
    /// transport engine for the selected mode.
    ///
    /// Every failure releases whatever was acquired up to that point;
    /// nothing dangles on the error path.
    pub fn open(
        instance: InstanceId,
        credentials: &SecurityCredentials,
        factory: &dyn TransportFactory,
        config: &Config,
        rng: &mut SeededRng,
    ) -> Result<SecureSession, ConnectError> {
        let uri = PeerUri::parse(&credentials.uri)?;

        if uri.secure && credentials.mode == SecurityMode::None {
            warn!("{} is a coaps uri but the selected mode is None", uri.host);
        }

        let peer_addr = resolve(&uri)?;

        let local: SocketAddr = if peer_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).map_err(setup_failed)?;
        socket.connect(peer_addr).map_err(setup_failed)?;
        socket.set_nonblocking(true).map_err(setup_failed)?;

        let engine = factory.open(&socket, credentials, config, rng)?;

        debug!(
            "Session opened to {} ({:?}, instance {})",
            peer_addr, credentials.mode, instance
        );

        Ok(SecureSession {
            peer_uri: credentials.uri.clone(),
            peer_addr,
            instance,
            mode: credentials.mode,
            state: SessionState::Connecting,
            spin_limit: config.handshake_spin_limit(),
            socket: Some(socket),
            engine: Some(engine),
        })
    }

    /// Drive the handshake one step. `Ok(true)` once established.
    pub fn drive_handshake(&mut self) -> Result<bool, TransportError> {
        let engine = self.engine_mut()?;
        let done = engine.handshake_step()?;
        if done {
            self.mark_established();
        }
        Ok(done)
    }

    /// Hand bytes to the transport engine.
    ///
    /// Busy-polls a transient "not ready" engine until the data is out
    /// or the spin bound is hit; the bound keeps a stuck handshake from
    /// spinning across main-loop iterations.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut spins = self.spin_limit;
        loop {
            let engine = self.engine_mut()?;
            match engine.send(data) {
                Ok(n) => {
                    self.mark_established();
                    return Ok(n);
                }
                Err(TransportError::WouldBlock) => {
                    if spins == 0 {
                        return Err(TransportError::Fatal(
                            "Handshake did not settle within spin bound".into(),
                        ));
                    }
                    spins -= 1;
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    /// Receive one decrypted datagram into `buf`.
    ///
    /// [`TransportError::WouldBlock`] means no datagram is pending;
    /// retry after the next readiness event.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let engine = self.engine_mut()?;
        let n = engine.receive(buf)?;
        self.mark_established();
        Ok(n)
    }

    /// Close the session: best-effort close notification, then
    /// unconditional release of engine and socket.
    ///
    /// Idempotent. Closing an already-closed session is a no-op.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            debug!("Close on already-closed session to {}", self.peer_addr);
            return;
        }
        if let Some(mut engine) = self.engine.take() {
            engine.close_notify();
        }
        self.socket = None;
        self.state = SessionState::Closed;
        debug!("Session to {} closed", self.peer_addr);
    }

    #[inline(always)]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The URI this session was opened against.
    #[inline(always)]
    pub fn peer_uri(&self) -> &str {
        &self.peer_uri
    }

    #[inline(always)]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    #[inline(always)]
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    #[inline(always)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The underlying socket, for the multiplexed readiness wait.
    /// `None` once closed.
    pub fn socket(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }

    fn engine_mut(&mut self) -> Result<&mut Box<dyn SecureTransport>, TransportError> {
        self.engine
            .as_mut()
            .ok_or_else(|| TransportError::Fatal("Session is closed".into()))
    }

    fn mark_established(&mut self) {
        if self.state == SessionState::Connecting {
            debug!("Session to {} established", self.peer_addr);
            self.state = SessionState::Established;
        }
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("peer", &self.peer_addr)
            .field("instance", &self.instance)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .finish()
    }
}

fn setup_failed(e: io::Error) -> ConnectError {
    ConnectError::TransportSetupFailed(e.to_string())
}

fn resolve(uri: &PeerUri) -> Result<SocketAddr, ConnectError> {
    let mut addrs = (uri.host.as_str(), uri.port)
        .to_socket_addrs()
        .map_err(|e| ConnectError::ResolveFailed(format!("{}: {}", uri.host, e)))?;
    addrs
        .next()
        .ok_or_else(|| ConnectError::ResolveFailed(format!("{}: no addresses", uri.host)))
}
