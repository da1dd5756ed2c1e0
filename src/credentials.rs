//! Credential access and assembly.
//!
//! All credential reads go through the object store's generic read
//! operation against the security object. [`SecurityCredentials`] is the
//! immutable snapshot taken at session-creation time; the session that
//! used it to configure its engine owns it.

use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;
use zeroize::Zeroize;

use crate::config::{Config, CredentialSource};
use crate::error::{CredentialError, Error};
use crate::mode::{select_mode, DeclaredMode, EngineCapabilities, SecurityMode};
use crate::store::{InstanceId, ObjectStore, Value, SECURITY_OBJECT_ID};

/// Server URI resource.
pub const RES_SECURITY_URI: u16 = 0;
/// Bootstrap-server flag resource.
pub const RES_SECURITY_BOOTSTRAP: u16 = 1;
/// Declared security mode resource.
pub const RES_SECURITY_MODE: u16 = 2;
/// PSK identity, or the client certificate in certificate mode.
pub const RES_SECURITY_PUBLIC_KEY: u16 = 3;
/// Server public key; the CA certificate in certificate mode.
pub const RES_SECURITY_SERVER_PUBLIC_KEY: u16 = 4;
/// PSK secret, or the client private key in certificate mode.
pub const RES_SECURITY_SECRET_KEY: u16 = 5;
/// Server Name Indication, vendor extension resource.
pub const RES_SECURITY_SNI: u16 = 30000;

/// Typed reads against one security-object instance.
///
/// Every method allocates a fresh copy; the caller owns the result.
pub struct CredentialAccessor<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> CredentialAccessor<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    fn read(&self, instance: InstanceId, resource: u16) -> Result<&Value, CredentialError> {
        self.store
            .read(SECURITY_OBJECT_ID, instance, resource)
            .ok_or(CredentialError::NotFound)
    }

    /// Server URI. Empty strings count as absent.
    pub fn uri(&self, instance: InstanceId) -> Result<String, CredentialError> {
        let uri = self
            .read(instance, RES_SECURITY_URI)?
            .as_str()
            .ok_or(CredentialError::Malformed)?;
        if uri.is_empty() {
            return Err(CredentialError::NotFound);
        }
        Ok(uri.to_string())
    }

    /// Declared security mode.
    pub fn declared_mode(&self, instance: InstanceId) -> Result<DeclaredMode, CredentialError> {
        let v = self
            .read(instance, RES_SECURITY_MODE)?
            .as_int()
            .ok_or(CredentialError::Malformed)?;
        Ok(DeclaredMode::from_value(v))
    }

    /// Whether this instance points at a bootstrap server.
    pub fn bootstrap_server(&self, instance: InstanceId) -> bool {
        matches!(
            self.store
                .read(SECURITY_OBJECT_ID, instance, RES_SECURITY_BOOTSTRAP),
            Some(Value::Boolean(true))
        )
    }

    /// PSK identity or client certificate, depending on the mode.
    pub fn public_key(&self, instance: InstanceId) -> Result<Vec<u8>, CredentialError> {
        self.opaque(instance, RES_SECURITY_PUBLIC_KEY)
    }

    /// Server public key; the CA certificate in certificate mode.
    pub fn server_public_key(&self, instance: InstanceId) -> Result<Vec<u8>, CredentialError> {
        self.opaque(instance, RES_SECURITY_SERVER_PUBLIC_KEY)
    }

    /// PSK secret or client private key, depending on the mode.
    pub fn secret_key(&self, instance: InstanceId) -> Result<Vec<u8>, CredentialError> {
        self.opaque(instance, RES_SECURITY_SECRET_KEY)
    }

    /// SNI extension resource. Absent is not an error.
    pub fn sni(&self, instance: InstanceId) -> Option<String> {
        self.store
            .read(SECURITY_OBJECT_ID, instance, RES_SECURITY_SNI)?
            .as_str()
            .map(str::to_string)
    }

    fn opaque(&self, instance: InstanceId, resource: u16) -> Result<Vec<u8>, CredentialError> {
        self.read(instance, resource)?
            .as_opaque()
            .map(<[u8]>::to_vec)
            .ok_or(CredentialError::Malformed)
    }
}

/// Immutable credential snapshot for one peer, taken at session-creation
/// time.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityCredentials {
    pub uri: String,
    pub mode: SecurityMode,
    pub psk_identity: Option<Vec<u8>>,
    pub psk_secret: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
    pub ca_cert: Option<Vec<u8>>,
    pub sni: Option<String>,
    pub connection_id: Option<Vec<u8>>,
}

impl SecurityCredentials {
    /// Assemble the snapshot for one security-object instance.
    ///
    /// Resolves the declared mode against `caps`, then pulls exactly the
    /// material the selected mode needs. Certificate mode requires all
    /// three of client certificate, private key and CA to be present.
    pub fn load(
        store: &dyn ObjectStore,
        config: &Config,
        caps: EngineCapabilities,
        instance: InstanceId,
    ) -> Result<SecurityCredentials, Error> {
        let acc = CredentialAccessor::new(store);

        let uri = acc.uri(instance)?;
        let declared = acc.declared_mode(instance)?;

        let psk_identity = acc.public_key(instance).ok().filter(|v| !v.is_empty());
        let psk_secret = acc.secret_key(instance).ok().filter(|v| !v.is_empty());

        let mode = select_mode(
            declared,
            caps,
            psk_identity.is_some(),
            psk_secret.is_some(),
        )?;

        debug!("Instance {}: {:?} -> {:?} ({})", instance, declared, mode, uri);

        let mut creds = SecurityCredentials {
            uri,
            mode,
            psk_identity: None,
            psk_secret: None,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            sni: None,
            connection_id: None,
        };

        match mode {
            SecurityMode::None => return Ok(creds),
            SecurityMode::Psk => {
                creds.psk_identity = psk_identity;
                creds.psk_secret = psk_secret;
            }
            SecurityMode::Certificate => {
                creds.client_cert = Some(acc.public_key(instance)?);
                creds.client_key = Some(acc.secret_key(instance)?);
                creds.ca_cert = Some(acc.server_public_key(instance)?);
                creds.sni = acc.sni(instance).or_else(|| config.sni().map(str::to_string));
            }
        }

        creds.connection_id = config.connection_id().map(<[u8]>::to_vec);

        Ok(creds)
    }
}

impl Drop for SecurityCredentials {
    fn drop(&mut self) {
        if let Some(secret) = self.psk_secret.as_mut() {
            secret.zeroize();
        }
        if let Some(key) = self.client_key.as_mut() {
            key.zeroize();
        }
    }
}

impl fmt::Debug for SecurityCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityCredentials")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .field("psk_identity", &self.psk_identity.as_ref().map(Vec::len))
            .field("psk_secret", &self.psk_secret.as_ref().map(Vec::len))
            .field("client_cert", &self.client_cert.as_ref().map(Vec::len))
            .field("client_key", &self.client_key.as_ref().map(Vec::len))
            .field("ca_cert", &self.ca_cert.as_ref().map(Vec::len))
            .field("sni", &self.sni)
            .field("connection_id", &self.connection_id.as_ref().map(Vec::len))
            .finish()
    }
}

/// Read a PEM file as the whole file plus a terminating NUL byte, which
/// the engine's PEM parser expects.
pub fn load_pem_file(path: &Path) -> Result<Vec<u8>, Error> {
    let mut buf =
        fs::read(path).map_err(|e| Error::File(format!("{}: {}", path.display(), e)))?;
    buf.push(0);
    Ok(buf)
}

/// Write one security-object instance into the store.
///
/// This is the provisioning step the host runs at startup (or a
/// bootstrap server runs remotely): URI and declared mode always, plus
/// the credential material of that mode. PSK material comes from the
/// config; certificate material from the configured
/// [`CredentialSource`].
pub fn provision_security_instance(
    store: &mut dyn ObjectStore,
    instance: InstanceId,
    uri: &str,
    declared: DeclaredMode,
    bootstrap: bool,
    config: &Config,
) -> Result<(), Error> {
    store.write(
        SECURITY_OBJECT_ID,
        instance,
        RES_SECURITY_URI,
        Value::String(uri.to_string()),
    );
    store.write(
        SECURITY_OBJECT_ID,
        instance,
        RES_SECURITY_BOOTSTRAP,
        Value::Boolean(bootstrap),
    );
    store.write(
        SECURITY_OBJECT_ID,
        instance,
        RES_SECURITY_MODE,
        Value::Integer(declared.value()),
    );

    match declared {
        DeclaredMode::PreSharedKey => {
            let identity = config
                .psk_identity()
                .ok_or_else(|| Error::Config("PSK mode without identity".into()))?;
            let secret = config
                .psk_secret()
                .ok_or_else(|| Error::Config("PSK mode without secret".into()))?;
            store.write(
                SECURITY_OBJECT_ID,
                instance,
                RES_SECURITY_PUBLIC_KEY,
                Value::Opaque(identity.to_vec()),
            );
            store.write(
                SECURITY_OBJECT_ID,
                instance,
                RES_SECURITY_SECRET_KEY,
                Value::Opaque(secret.to_vec()),
            );
        }
        DeclaredMode::Certificate => {
            let (ca, cert, key) = match config.credential_source() {
                CredentialSource::Files {
                    ca,
                    certificate,
                    private_key,
                } => (
                    load_pem_file(ca)?,
                    load_pem_file(certificate)?,
                    load_pem_file(private_key)?,
                ),
                CredentialSource::Inline {
                    ca,
                    certificate,
                    private_key,
                } => (ca.clone(), certificate.clone(), private_key.clone()),
                CredentialSource::None => {
                    return Err(Error::Config(
                        "Certificate mode without a credential source".into(),
                    ))
                }
            };
            store.write(
                SECURITY_OBJECT_ID,
                instance,
                RES_SECURITY_PUBLIC_KEY,
                Value::Opaque(cert),
            );
            store.write(
                SECURITY_OBJECT_ID,
                instance,
                RES_SECURITY_SERVER_PUBLIC_KEY,
                Value::Opaque(ca),
            );
            store.write(
                SECURITY_OBJECT_ID,
                instance,
                RES_SECURITY_SECRET_KEY,
                Value::Opaque(key),
            );
            if let Some(sni) = config.sni() {
                store.write(
                    SECURITY_OBJECT_ID,
                    instance,
                    RES_SECURITY_SNI,
                    Value::String(sni.to_string()),
                );
            }
        }
        DeclaredMode::NoSec => {}
        other => {
            return Err(Error::Config(format!(
                "Cannot provision declared mode {:?}",
                other
            )))
        }
    }

    Ok(())
}
