//! Parsing of device-management server URIs.
//!
//! Accepted forms are `coap://host[:port]` and `coaps://host[:port]`,
//! with bracketed literal IPv6 hosts such as `coaps://[::1]:5684`.
//! A missing port defaults to the standard port of the scheme.

use crate::error::ConnectError;

/// Default port for plaintext CoAP.
pub const COAP_DEFAULT_PORT: u16 = 5683;

/// Default port for CoAP over DTLS.
pub const COAPS_DEFAULT_PORT: u16 = 5684;

const COAP_SCHEME: &str = "coap://";
const COAPS_SCHEME: &str = "coaps://";

/// A parsed peer URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUri {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl PeerUri {
    /// Parse a `coap://` or `coaps://` URI.
    ///
    /// A URI without a recognized scheme prefix is rejected with
    /// [`ConnectError::BadUri`], as are empty hosts, unmatched brackets
    /// and unparseable ports.
    pub fn parse(uri: &str) -> Result<PeerUri, ConnectError> {
        let (rest, secure, default_port) = if let Some(r) = uri.strip_prefix(COAPS_SCHEME) {
            (r, true, COAPS_DEFAULT_PORT)
        } else if let Some(r) = uri.strip_prefix(COAP_SCHEME) {
            (r, false, COAP_DEFAULT_PORT)
        } else {
            return Err(ConnectError::BadUri(uri.to_string()));
        };

        let (host, port) = split_host_port(rest, default_port)
            .ok_or_else(|| ConnectError::BadUri(uri.to_string()))?;

        if host.is_empty() {
            return Err(ConnectError::BadUri(uri.to_string()));
        }

        Ok(PeerUri {
            host: host.to_string(),
            port,
            secure,
        })
    }

    /// The host formatted for address resolution, brackets restored for
    /// literal IPv6.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(rest: &str, default_port: u16) -> Option<(&str, u16)> {
    if let Some(inner) = rest.strip_prefix('[') {
        // Literal IPv6: the closing bracket must be present.
        let (host, tail) = inner.split_once(']')?;
        if tail.is_empty() {
            return Some((host, default_port));
        }
        let port = tail.strip_prefix(':')?.parse().ok()?;
        Some((host, port))
    } else if let Some((host, port)) = rest.rsplit_once(':') {
        let port = port.parse().ok()?;
        Some((host, port))
    } else {
        Some((rest, default_port))
    }
}
