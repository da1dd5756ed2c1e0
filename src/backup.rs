//! Bootstrap backup of the security and server objects.
//!
//! A bootstrap server may overwrite both object types wholesale. The
//! backup manager deep-copies them when the client enters the
//! bootstrapping phase, so a failed attempt can roll the store back and
//! the client never runs with half-applied bootstrap configuration.

use log::{info, warn};

use crate::store::{ObjectStore, ObjectTree, SECURITY_OBJECT_ID, SERVER_OBJECT_ID};

/// A deep copy of the security and server object collections.
///
/// Value-independent of the live store: mutation on either side after
/// the copy never affects the other.
#[derive(Debug, Clone)]
pub struct ObjectBackup {
    security: ObjectTree,
    server: ObjectTree,
}

/// Owns at most one unconsumed [`ObjectBackup`] with explicit
/// create/consume transitions.
#[derive(Debug, Default)]
pub struct BackupManager {
    pending: Option<ObjectBackup>,
}

impl BackupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-copy the security and server objects out of the store.
    ///
    /// Any previously held unconsumed backup is released first; that is
    /// logged rather than silently dropped.
    pub fn snapshot(&mut self, store: &dyn ObjectStore) {
        if self.pending.take().is_some() {
            warn!("Replacing an unconsumed bootstrap backup");
        }

        info!("Backing up security and server objects");
        self.pending = Some(ObjectBackup {
            security: store.export(SECURITY_OBJECT_ID),
            server: store.export(SERVER_OBJECT_ID),
        });
    }

    /// Clear the live security and server objects and repopulate them
    /// from the pending backup, consuming it.
    ///
    /// Returns `false` if no backup was pending; the store is untouched
    /// in that case.
    pub fn restore(&mut self, store: &mut dyn ObjectStore) -> bool {
        let Some(backup) = self.pending.take() else {
            warn!("Restore requested but no backup is pending");
            return false;
        };

        store.import(SECURITY_OBJECT_ID, backup.security);
        store.import(SERVER_OBJECT_ID, backup.server);
        info!("Security and server objects restored from backup");
        true
    }

    /// Release the pending backup without touching the live store.
    ///
    /// Used on successful bootstrap completion.
    pub fn discard(&mut self) {
        if self.pending.take().is_some() {
            info!("Discarding bootstrap backup");
        }
    }

    /// Whether an unconsumed backup exists.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
