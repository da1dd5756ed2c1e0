//! Keyed collection of live sessions.
//!
//! Sessions are owned by the registry and addressed through copyable
//! [`SessionId`] handles, so no caller ever holds a dangling session
//! pointer across teardown. The registry enforces one live session per
//! peer address: repeated connect requests reuse the existing session
//! instead of creating duplicates.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};

use log::debug;

use crate::error::ConnectError;
use crate::session::SecureSession;
use crate::store::InstanceId;

/// Stable handle to a session in the registry.
///
/// Handles are never reused within one registry, so a stale handle held
/// across a close resolves to nothing rather than to a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Owned, indexed collection of [`SecureSession`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SecureSession>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `instance`, opening one via `open_fn` only
    /// if none exists.
    ///
    /// `open_fn` is not invoked when a matching session is found. If the
    /// newly opened session turns out to share a peer address with an
    /// existing one, the new session is closed and the existing handle
    /// returned, keeping the one-session-per-peer invariant.
    pub fn create_or_reuse<F>(
        &mut self,
        instance: InstanceId,
        open_fn: F,
    ) -> Result<SessionId, ConnectError>
    where
        F: FnOnce() -> Result<SecureSession, ConnectError>,
    {
        if let Some(id) = self.find_by_instance(instance) {
            debug!("Reusing session {:?} for instance {}", id, instance);
            return Ok(id);
        }

        let session = open_fn()?;

        if let Some(id) = self.find_by_peer(session.peer_addr()) {
            debug!(
                "Instance {} resolved to already-connected peer {}, reusing {:?}",
                instance,
                session.peer_addr(),
                id
            );
            drop(session);
            return Ok(id);
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Find the live session connected to `addr`.
    pub fn find_by_peer(&self, addr: SocketAddr) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.peer_addr() == addr)
            .map(|(id, _)| *id)
    }

    /// Find the live session opened for a security-object instance.
    pub fn find_by_instance(&self, instance: InstanceId) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.instance() == instance)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, id: SessionId) -> Option<&SecureSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut SecureSession> {
        self.sessions.get_mut(&id)
    }

    /// Close a session and drop it from the registry.
    ///
    /// The entry is removed before `close()` runs, so a receive event
    /// arriving reentrantly during teardown cannot observe a half-closed
    /// session through the registry.
    pub fn close_and_remove(&mut self, id: SessionId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.close();
        }
    }

    /// Close every session. Used at terminal shutdown.
    pub fn close_all(&mut self) {
        debug!("Closing all {} sessions", self.sessions.len());
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
    }

    /// Handles of all live sessions.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Sockets of all live sessions, for the multiplexed readiness wait.
    pub fn sockets(&self) -> Vec<(SessionId, &UdpSocket)> {
        self.sessions
            .iter()
            .filter_map(|(id, s)| s.socket().map(|sock| (*id, sock)))
            .collect()
    }

    /// De-duplication predicate handed to the protocol core for matching
    /// responses to the session that sent the request.
    pub fn sessions_equal(a: SessionId, b: SessionId) -> bool {
        a == b
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
