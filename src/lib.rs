#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! Secure-session and bootstrap-recovery layer for a constrained-device
//! management client.
//!
//! Per remote server this crate selects a transport-security mode,
//! establishes and tears down the secure channel, routes inbound
//! datagrams to the owning session, and rolls the security/server
//! configuration objects back when a bootstrap attempt fails. The
//! protocol engine and the handshake cryptography live outside; they
//! are consumed through the [`ObjectStore`] and
//! [`SecureTransport`](transport::SecureTransport) boundaries.

mod backup;
mod config;
mod error;
mod lifecycle;
mod mode;
mod registry;
mod rng;
mod session;
mod store;
mod uri;

pub mod credentials;
pub mod transport;

pub use backup::{BackupManager, ObjectBackup};
pub use config::{Config, ConfigBuilder, CredentialSource, MAX_CID_LEN};
pub use credentials::{CredentialAccessor, SecurityCredentials};
pub use error::{ConnectError, CredentialError, Error, TransportError};
pub use lifecycle::{ClientState, LifecycleCoordinator};
pub use mode::{select_mode, DeclaredMode, EngineCapabilities, SecurityMode};
pub use registry::{SessionId, SessionRegistry};
pub use rng::SeededRng;
pub use session::{SecureSession, SessionState};
pub use store::{
    InstanceId, MemoryStore, ObjectId, ObjectStore, ObjectTree, ResourceId, ResourceMap, Value,
    SECURITY_OBJECT_ID, SERVER_OBJECT_ID,
};
pub use transport::{CipherSuite, PlaintextFactory, SecureTransport, TransportFactory};
pub use uri::{PeerUri, COAPS_DEFAULT_PORT, COAP_DEFAULT_PORT};
