use thiserror::Error;

/// Failure to read a credential resource out of the object store.
///
/// Both variants are local to one peer's connect attempt: the caller
/// substitutes a safe default or aborts that attempt only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("Resource not found")]
    NotFound,

    #[error("Resource has unexpected type")]
    Malformed,
}

/// Failure to open a secure session towards a peer.
///
/// None of these are retryable for the same call; the caller may retry
/// later with the same or refreshed credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Bad uri: {0}")]
    BadUri(String),

    #[error("Host resolution failed: {0}")]
    ResolveFailed(String),

    #[error("Transport setup failed: {0}")]
    TransportSetupFailed(String),

    /// The declared security mode cannot be satisfied by the compiled
    /// transport capabilities. Fatal for that peer.
    #[error("Unsupported security mode")]
    UnsupportedMode,
}

/// Transport-level outcome of a send or receive on an open session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transient: the engine is not ready (handshake still settling or
    /// no datagram pending). Retry on the next readiness event.
    #[error("Would block")]
    WouldBlock,

    /// The session is dead. It must be closed and removed.
    #[error("Fatal transport error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Unknown session handle")]
    UnknownSession,

    /// A fatal transport error closed the session. The handle is gone;
    /// a fresh connect request is needed.
    #[error("Session lost")]
    SessionLost,

    #[error("File error: {0}")]
    File(String),

    #[error("Config error: {0}")]
    Config(String),
}
