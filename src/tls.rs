//! TLS context built from [`crate::config::SslConfig`], and the blocking
//! handshake a Worker runs before handing a socket to the application
//! `Handler`.
//!
//! Grounded on the `openssl`-crate usage pattern in the reference listener:
//! `SslAcceptor::mozilla_intermediate` plus file-based cert/key/CA loading
//! and an explicit verify mode, rather than `rustls`' cert-store API.

use log::debug;
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod, SslVerifyMode, SslVersion};

use crate::config::{SslConfig, VerifyClient};
use crate::error::{EndpointError, Result};
use crate::socket::PooledSocket;

pub struct TlsContext {
    acceptor: SslAcceptor,
}

/// `parse_ssl_protocol` tokens in ascending protocol-age order, paired with
/// their `openssl`-crate version constant. `SSLv2` has no `SslVersion`
/// counterpart in this backend -- it's accepted by `parse_ssl_protocol` for
/// compatibility with the attribute's historical token set, but contributes
/// no bound here, same as `honor_cipher_order`.
const VERSION_ORDER: &[(&str, SslVersion)] = &[
    ("SSLv3", SslVersion::SSL3),
    ("TLSv1", SslVersion::TLS1),
    ("TLSv1.1", SslVersion::TLS1_1),
    ("TLSv1.2", SslVersion::TLS1_2),
    ("TLSv1.3", SslVersion::TLS1_3),
];

impl TlsContext {
    pub fn new(config: &SslConfig) -> Result<TlsContext> {
        let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;

        let enabled = parse_ssl_protocol(&config.protocol_spec)
            .map_err(EndpointError::InvalidSslProtocol)?;
        let versions: Vec<SslVersion> = VERSION_ORDER
            .iter()
            .filter(|(name, _)| enabled.iter().any(|e| e == name))
            .map(|(_, version)| *version)
            .collect();
        let min = versions.first().copied();
        let max = versions.last().copied();
        builder
            .set_min_proto_version(min)
            .map_err(EndpointError::from)?;
        builder
            .set_max_proto_version(max)
            .map_err(EndpointError::from)?;

        if let Some(cert_file) = &config.certificate_file {
            builder
                .set_certificate_file(cert_file, SslFiletype::PEM)
                .map_err(EndpointError::from)?;
        }

        if let Some(key_file) = &config.certificate_key_file {
            builder
                .set_private_key_file(key_file, SslFiletype::PEM)
                .map_err(EndpointError::from)?;
        }

        if let Some(ca_file) = &config.ca_file {
            builder
                .set_ca_file(ca_file)
                .map_err(EndpointError::from)?;
        }

        if let Some(ciphers) = &config.cipher_suite {
            builder.set_cipher_list(ciphers).map_err(EndpointError::from)?;
        }

        builder.set_verify(match config.verify_client {
            VerifyClient::None => SslVerifyMode::NONE,
            VerifyClient::Optional => SslVerifyMode::PEER,
            VerifyClient::Require => SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        });

        if !config.honor_cipher_order {
            debug!("SSLHonorCipherOrder=false is not configurable on this TLS backend; ignoring");
        }
        if !config.disable_compression {
            debug!("SSLDisableCompression=false is not configurable on this TLS backend; ignoring");
        }

        Ok(TlsContext {
            acceptor: builder.build(),
        })
    }

    /// Runs the blocking TLS handshake on `socket`, swapping its transport
    /// from plain to TLS in place. A failed or aborted handshake is logged
    /// at DEBUG -- a client disconnecting mid-handshake is routine, not an
    /// operational error -- and the socket is left for the caller to close.
    pub fn accept(&self, socket: &PooledSocket) -> bool {
        let ok = socket.upgrade_tls(&self.acceptor);
        if !ok {
            debug!("TLS handshake failed for fd {}", socket.fd());
        }
        ok
    }
}

/// Parses a `+`-token `SSLProtocol` attribute (e.g. `"all -SSLv2 -SSLv3"` or
/// `"TLSv1.2 +TLSv1.3"`) into the list of protocol names to enable.
pub fn parse_ssl_protocol(spec: &str) -> std::result::Result<Vec<String>, String> {
    const KNOWN: &[&str] = &["SSLv2", "SSLv3", "TLSv1", "TLSv1.1", "TLSv1.2", "TLSv1.3"];

    let mut enabled: Vec<String> = Vec::new();
    for token in spec.split_whitespace() {
        let (sign, name) = match token.chars().next() {
            Some('+') => (true, &token[1..]),
            Some('-') => (false, &token[1..]),
            _ => (true, token),
        };

        if name.eq_ignore_ascii_case("all") {
            if sign {
                enabled = KNOWN.iter().map(|s| s.to_string()).collect();
            } else {
                enabled.clear();
            }
            continue;
        }

        let canonical = KNOWN
            .iter()
            .find(|k| k.eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("unknown SSL/TLS protocol token: {}", name))?;

        if sign {
            if !enabled.iter().any(|e| e == canonical) {
                enabled.push(canonical.to_string());
            }
        } else {
            enabled.retain(|e| e != canonical);
        }
    }

    if enabled.is_empty() {
        return Err(format!("SSLProtocol spec enables no protocols: {}", spec));
    }

    Ok(enabled)
}

#[cfg(test)]
mod tests {
    use super::parse_ssl_protocol;

    #[test]
    fn all_minus_old_protocols() {
        let protocols = parse_ssl_protocol("all -SSLv2 -SSLv3 -TLSv1").unwrap();
        assert!(protocols.contains(&"TLSv1.2".to_string()));
        assert!(!protocols.contains(&"SSLv2".to_string()));
        assert!(!protocols.contains(&"TLSv1".to_string()));
    }

    #[test]
    fn explicit_allowlist() {
        let protocols = parse_ssl_protocol("TLSv1.2 +TLSv1.3").unwrap();
        assert_eq!(protocols, vec!["TLSv1.2".to_string(), "TLSv1.3".to_string()]);
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert!(parse_ssl_protocol("TLSv9").is_err());
    }

    #[test]
    fn empty_result_is_rejected() {
        assert!(parse_ssl_protocol("all -all").is_err());
    }
}
