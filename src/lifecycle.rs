//! Reactions to the protocol core's client-state transitions.
//!
//! The protocol core owns the canonical state machine; this coordinator
//! only observes its edges. Entering the bootstrapping phase snapshots
//! the security and server objects, a failed bootstrap step rolls them
//! back and tears down stale sessions, a successful one releases the
//! backup.

use log::{debug, info, warn};

use crate::backup::BackupManager;
use crate::config::Config;
use crate::credentials::{CredentialAccessor, SecurityCredentials};
use crate::error::{Error, TransportError};
use crate::mode::EngineCapabilities;
use crate::registry::{SessionId, SessionRegistry};
use crate::rng::SeededRng;
use crate::session::SecureSession;
use crate::store::{InstanceId, ObjectStore};
use crate::transport::TransportFactory;

/// Mirror of the protocol core's client state.
///
/// This crate never owns the canonical value; it only reacts to edges
/// reported through [`LifecycleCoordinator::on_state_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initial,
    BootstrapRequired,
    Bootstrapping,
    RegisterRequired,
    Registering,
    Ready,
}

/// Coordinates sessions and bootstrap backups across client-state
/// transitions.
pub struct LifecycleCoordinator {
    config: Config,
    caps: EngineCapabilities,
    factory: Box<dyn TransportFactory>,
    rng: SeededRng,
    registry: SessionRegistry,
    backups: BackupManager,
    observed: ClientState,
}

impl LifecycleCoordinator {
    /// Create a coordinator with the compiled engine capabilities.
    pub fn new(config: Config, factory: Box<dyn TransportFactory>) -> Self {
        Self::with_capabilities(config, factory, EngineCapabilities::compiled())
    }

    /// Create a coordinator with explicit capabilities (tests).
    pub fn with_capabilities(
        config: Config,
        factory: Box<dyn TransportFactory>,
        caps: EngineCapabilities,
    ) -> Self {
        let rng = SeededRng::for_endpoint(config.endpoint_name(), config.rng_seed());
        Self {
            config,
            caps,
            factory,
            rng,
            registry: SessionRegistry::new(),
            backups: BackupManager::new(),
            observed: ClientState::Initial,
        }
    }

    /// The protocol core asks for a channel to a security-object
    /// instance.
    ///
    /// Credential selection and session creation happen here; an
    /// existing session for the instance is reused. A failure aborts
    /// only this peer's connect attempt and never triggers a backup
    /// restore.
    pub fn on_connect_request(
        &mut self,
        store: &dyn ObjectStore,
        instance: InstanceId,
    ) -> Result<SessionId, Error> {
        let credentials = SecurityCredentials::load(store, &self.config, self.caps, instance)?;

        let Self {
            registry,
            factory,
            config,
            rng,
            ..
        } = self;

        let id = registry.create_or_reuse(instance, || {
            SecureSession::open(instance, &credentials, factory.as_ref(), config, rng)
        })?;

        Ok(id)
    }

    /// Observe a client-state transition reported by the protocol core.
    pub fn on_state_transition(&mut self, store: &dyn ObjectStore, new: ClientState) {
        if new == self.observed {
            return;
        }
        let old = self.observed;
        self.observed = new;
        debug!("Client state {:?} -> {:?}", old, new);

        match (old, new) {
            (_, ClientState::Bootstrapping) => self.backups.snapshot(store),
            (ClientState::Bootstrapping, ClientState::Ready) => self.backups.discard(),
            _ => {}
        }
    }

    /// The protocol core's step function reported a failure.
    ///
    /// During a bootstrap attempt this rolls the security and server
    /// objects back, forces the observed state to `Initial` and closes
    /// every session that no longer matches the restored configuration.
    /// Returns `true` when the rollback ran; `false` means the caller
    /// must handle the failure (it did not happen mid-bootstrap, or no
    /// backup was left to restore).
    pub fn on_step_failure(&mut self, store: &mut dyn ObjectStore) -> bool {
        if self.observed != ClientState::Bootstrapping {
            return false;
        }

        warn!("Bootstrap failed, restoring security and server objects");
        let restored = self.backups.restore(store);
        self.observed = ClientState::Initial;
        self.close_stale_sessions(store);
        restored
    }

    /// Send on a session, closing it on fatal transport errors.
    pub fn send(&mut self, id: SessionId, data: &[u8]) -> Result<usize, Error> {
        let session = self.registry.get_mut(id).ok_or(Error::UnknownSession)?;
        match session.send(data) {
            Ok(n) => Ok(n),
            Err(TransportError::Fatal(reason)) => {
                warn!("Session {:?} lost on send: {}", id, reason);
                self.registry.close_and_remove(id);
                Err(Error::SessionLost)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Receive on a session, closing it on fatal transport errors.
    ///
    /// `WouldBlock` passes through untouched; the host retries after the
    /// next readiness event.
    pub fn receive(&mut self, id: SessionId, buf: &mut [u8]) -> Result<usize, Error> {
        let session = self.registry.get_mut(id).ok_or(Error::UnknownSession)?;
        match session.receive(buf) {
            Ok(n) => Ok(n),
            Err(TransportError::Fatal(reason)) => {
                warn!("Session {:?} lost on receive: {}", id, reason);
                self.registry.close_and_remove(id);
                Err(Error::SessionLost)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A fatal engine condition was detected outside send/receive.
    pub fn on_session_fatal(&mut self, id: SessionId) {
        info!("Closing session {:?} after fatal transport error", id);
        self.registry.close_and_remove(id);
    }

    /// Terminal shutdown: close every session, release any unconsumed
    /// backup.
    pub fn shutdown(&mut self) {
        self.registry.close_all();
        self.backups.discard();
    }

    /// The last observed client state.
    pub fn state(&self) -> ClientState {
        self.observed
    }

    /// Whether an unconsumed bootstrap backup exists.
    pub fn backup_pending(&self) -> bool {
        self.backups.has_pending()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Close sessions whose instance is gone from the restored store or
    /// points at a different URI than the one the session connected to.
    fn close_stale_sessions(&mut self, store: &dyn ObjectStore) {
        let accessor = CredentialAccessor::new(store);

        let stale: Vec<SessionId> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| {
                let Some(session) = self.registry.get(*id) else {
                    return false;
                };
                match accessor.uri(session.instance()) {
                    Ok(uri) => uri != session.peer_uri(),
                    Err(_) => true,
                }
            })
            .collect();

        for id in stale {
            info!("Closing session {:?} keyed to rolled-back configuration", id);
            self.registry.close_and_remove(id);
        }
    }
}
