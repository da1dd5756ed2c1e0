//! Security mode selection.
//!
//! The security object declares a mode per server instance; the build
//! declares which engine variants exist. The selector resolves both into
//! one concrete decision, and it never downgrades: a peer declared as
//! certificate mode must not silently fall back to PSK or plaintext.

use log::debug;

use crate::error::ConnectError;

/// Mode value as stored in the security object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredMode {
    PreSharedKey,
    RawPublicKey,
    Certificate,
    NoSec,
    Other(i64),
}

impl DeclaredMode {
    /// Decode the integer resource value.
    pub fn from_value(v: i64) -> DeclaredMode {
        match v {
            0 => DeclaredMode::PreSharedKey,
            1 => DeclaredMode::RawPublicKey,
            2 => DeclaredMode::Certificate,
            3 => DeclaredMode::NoSec,
            other => DeclaredMode::Other(other),
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            DeclaredMode::PreSharedKey => 0,
            DeclaredMode::RawPublicKey => 1,
            DeclaredMode::Certificate => 2,
            DeclaredMode::NoSec => 3,
            DeclaredMode::Other(v) => *v,
        }
    }
}

/// The concrete transport-security decision for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    None,
    Psk,
    Certificate,
}

/// Which engine variants this build carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub psk: bool,
    pub certificate: bool,
}

impl EngineCapabilities {
    /// Capabilities of the compiled feature set.
    pub fn compiled() -> EngineCapabilities {
        EngineCapabilities {
            psk: cfg!(feature = "psk"),
            certificate: cfg!(feature = "certificate"),
        }
    }
}

/// Resolve the declared mode against the compiled capabilities and the
/// availability of PSK credentials.
///
/// Deterministic, and the priority order matters:
///
/// 1. Declared certificate with a certificate-capable engine.
/// 2. Declared pre-shared-key with a resolvable identity and secret.
/// 3. Declared none.
/// 4. Anything else is unsupported and fatal for that peer.
pub fn select_mode(
    declared: DeclaredMode,
    caps: EngineCapabilities,
    psk_identity_present: bool,
    psk_secret_present: bool,
) -> Result<SecurityMode, ConnectError> {
    let decision = match declared {
        DeclaredMode::Certificate if caps.certificate => SecurityMode::Certificate,
        DeclaredMode::PreSharedKey if caps.psk && psk_identity_present && psk_secret_present => {
            SecurityMode::Psk
        }
        DeclaredMode::NoSec => SecurityMode::None,
        _ => {
            debug!("Declared mode {:?} unsupported with {:?}", declared, caps);
            return Err(ConnectError::UnsupportedMode);
        }
    };

    Ok(decision)
}
