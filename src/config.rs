use std::path::PathBuf;

use smallvec::{smallvec, SmallVec};

use crate::transport::CipherSuite;
use crate::Error;

/// Upper bound on the DTLS connection-id length accepted by the engines.
pub const MAX_CID_LEN: usize = 32;

const DEFAULT_ENDPOINT_NAME: &str = "seclink-client";

/// Where certificate-mode credential material is provisioned from.
///
/// Exactly one source is active per configuration; the choice is an
/// explicit runtime value, not a build flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialSource {
    /// No certificate material. Certificate mode is unavailable.
    #[default]
    None,

    /// Load PEM files from persistent storage at provisioning time.
    Files {
        ca: PathBuf,
        certificate: PathBuf,
        private_key: PathBuf,
    },

    /// Use byte buffers compiled into or handed to the host.
    Inline {
        ca: Vec<u8>,
        certificate: Vec<u8>,
        private_key: Vec<u8>,
    },
}

/// Client security configuration.
// No Debug derive: the decoded PSK secret must not end up in logs.
#[derive(Clone)]
pub struct Config {
    endpoint_name: String,
    rng_seed: Option<u64>,
    cipher_suites: SmallVec<[CipherSuite; 4]>,
    connection_id: Option<Vec<u8>>,
    sni: Option<String>,
    credential_source: CredentialSource,
    psk_identity: Option<Vec<u8>>,
    psk_secret: Option<Vec<u8>>,
    handshake_spin_limit: usize,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            endpoint_name: DEFAULT_ENDPOINT_NAME.to_string(),
            rng_seed: None,
            force_ciphersuite: None,
            cid_enabled: false,
            cid_hex: None,
            sni: None,
            credential_source: CredentialSource::None,
            psk_identity: None,
            psk_secret_hex: None,
            handshake_spin_limit: 1000,
        }
    }

    /// Endpoint name of the client. Also personalizes transport randomness.
    #[inline(always)]
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    /// Optional seed for deterministic non-cryptographic randomness.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    /// Ciphersuites offered to the transport engine, in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// DTLS connection-id for inbound records, if the extension is enabled.
    ///
    /// `Some(vec![])` means the extension is on with an empty CID.
    #[inline(always)]
    pub fn connection_id(&self) -> Option<&[u8]> {
        self.connection_id.as_deref()
    }

    /// Server Name Indication sent during certificate-mode handshakes.
    #[inline(always)]
    pub fn sni(&self) -> Option<&str> {
        self.sni.as_deref()
    }

    /// Source of certificate-mode credential material.
    #[inline(always)]
    pub fn credential_source(&self) -> &CredentialSource {
        &self.credential_source
    }

    /// PSK identity used when provisioning the security object.
    #[inline(always)]
    pub fn psk_identity(&self) -> Option<&[u8]> {
        self.psk_identity.as_deref()
    }

    /// Decoded PSK secret used when provisioning the security object.
    #[inline(always)]
    pub fn psk_secret(&self) -> Option<&[u8]> {
        self.psk_secret.as_deref()
    }

    /// Max busy-poll iterations while the engine reports "would block"
    /// inside a single send call.
    #[inline(always)]
    pub fn handshake_spin_limit(&self) -> usize {
        self.handshake_spin_limit
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    endpoint_name: String,
    rng_seed: Option<u64>,
    force_ciphersuite: Option<String>,
    cid_enabled: bool,
    cid_hex: Option<String>,
    sni: Option<String>,
    credential_source: CredentialSource,
    psk_identity: Option<Vec<u8>>,
    psk_secret_hex: Option<String>,
    handshake_spin_limit: usize,
}

impl ConfigBuilder {
    /// Set the endpoint name of the client.
    ///
    /// Defaults to "seclink-client".
    pub fn endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = name.into();
        self
    }

    /// Seed all non-cryptographic randomness for reproducible runs.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Force a single ciphersuite by name instead of the default list.
    pub fn force_ciphersuite(mut self, name: impl Into<String>) -> Self {
        self.force_ciphersuite = Some(name.into());
        self
    }

    /// Enable the DTLS connection-id extension.
    ///
    /// Defaults to disabled.
    pub fn connection_id(mut self, enabled: bool) -> Self {
        self.cid_enabled = enabled;
        self
    }

    /// Set the CID for incoming records, as a hex string without 0x.
    ///
    /// Only used when the extension is enabled. An enabled extension
    /// without a value uses an empty CID.
    pub fn connection_id_hex(mut self, hex: impl Into<String>) -> Self {
        self.cid_hex = Some(hex.into());
        self
    }

    /// Set the Server Name Indication for certificate-mode handshakes.
    pub fn sni(mut self, sni: impl Into<String>) -> Self {
        self.sni = Some(sni.into());
        self
    }

    /// Set where certificate-mode credentials are provisioned from.
    pub fn credential_source(mut self, source: CredentialSource) -> Self {
        self.credential_source = source;
        self
    }

    /// Set the PSK identity used when provisioning the security object.
    pub fn psk_identity(mut self, identity: impl Into<Vec<u8>>) -> Self {
        self.psk_identity = Some(identity.into());
        self
    }

    /// Set the pre-shared key as a hex string without 0x.
    pub fn psk_secret_hex(mut self, hex: impl Into<String>) -> Self {
        self.psk_secret_hex = Some(hex.into());
        self
    }

    /// Set the max busy-poll iterations per send while the handshake settles.
    ///
    /// Defaults to 1000.
    pub fn handshake_spin_limit(mut self, limit: usize) -> Self {
        self.handshake_spin_limit = limit;
        self
    }

    /// Build the configuration, validating hex fields and the CID length.
    pub fn build(self) -> Result<Config, Error> {
        if self.endpoint_name.is_empty() {
            return Err(Error::Config("Endpoint name must not be empty".into()));
        }

        let cipher_suites: SmallVec<[CipherSuite; 4]> = match &self.force_ciphersuite {
            Some(name) => {
                let suite = CipherSuite::from_name(name)
                    .ok_or_else(|| Error::Config(format!("Unknown ciphersuite: {}", name)))?;
                smallvec![suite]
            }
            None => CipherSuite::all().iter().copied().collect(),
        };

        let connection_id = if self.cid_enabled {
            let cid = match &self.cid_hex {
                Some(h) => hex::decode(h)
                    .map_err(|e| Error::Config(format!("Bad CID hex string: {}", e)))?,
                None => Vec::new(),
            };
            if cid.len() > MAX_CID_LEN {
                return Err(Error::Config(format!(
                    "CID too long: {} > {}",
                    cid.len(),
                    MAX_CID_LEN
                )));
            }
            Some(cid)
        } else {
            None
        };

        let psk_secret = match &self.psk_secret_hex {
            Some(h) => Some(
                hex::decode(h).map_err(|e| Error::Config(format!("Bad PSK hex string: {}", e)))?,
            ),
            None => None,
        };

        Ok(Config {
            endpoint_name: self.endpoint_name,
            rng_seed: self.rng_seed,
            cipher_suites,
            connection_id,
            sni: self.sni,
            credential_source: self.credential_source,
            psk_identity: self.psk_identity,
            psk_secret,
            handshake_spin_limit: self.handshake_spin_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psk_hex_is_decoded() {
        let config = Config::builder()
            .psk_identity("client1")
            .psk_secret_hex("a1b2c3d4")
            .build()
            .unwrap();

        assert_eq!(config.psk_identity(), Some(&b"client1"[..]));
        assert_eq!(config.psk_secret(), Some(&[0xA1, 0xB2, 0xC3, 0xD4][..]));
    }

    #[test]
    fn bad_psk_hex_is_rejected() {
        assert!(Config::builder().psk_secret_hex("a1b2c").build().is_err());
        assert!(Config::builder().psk_secret_hex("zz").build().is_err());
    }

    #[test]
    fn cid_requires_enable_flag() {
        let config = Config::builder().connection_id_hex("0011").build().unwrap();
        assert_eq!(config.connection_id(), None);

        let config = Config::builder()
            .connection_id(true)
            .connection_id_hex("0011")
            .build()
            .unwrap();
        assert_eq!(config.connection_id(), Some(&[0x00, 0x11][..]));

        // Enabled without a value means an empty CID.
        let config = Config::builder().connection_id(true).build().unwrap();
        assert_eq!(config.connection_id(), Some(&[][..]));
    }

    #[test]
    fn cid_length_is_capped() {
        let long = "00".repeat(MAX_CID_LEN + 1);
        let result = Config::builder()
            .connection_id(true)
            .connection_id_hex(long)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn force_ciphersuite_narrows_the_offer() {
        let config = Config::builder()
            .force_ciphersuite("TLS_PSK_WITH_AES_128_CCM")
            .build()
            .unwrap();
        assert_eq!(config.cipher_suites(), &[CipherSuite::PskAes128Ccm]);

        assert!(Config::builder().force_ciphersuite("TLS_BOGUS").build().is_err());
    }
}
