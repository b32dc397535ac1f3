//! X.509 certificate helpers
//!
//! Systems are identified by the common name of their certificate and
//! advertise the DER encoding of their public key as authentication info.

use std::fs;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use x509_parser::pem::parse_x509_pem;

use crate::{Error, Result};

/// Width of base64 lines inside a PEM block
const PEM_LINE_WIDTH: usize = 64;

/// Run `f` against the parsed certificate in `cert_pem`
fn with_certificate<T>(
    cert_pem: &str,
    f: impl FnOnce(&x509_parser::certificate::X509Certificate<'_>) -> Result<T>,
) -> Result<T> {
    let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| Error::Certificate(format!("invalid PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::Certificate(format!("invalid X.509 certificate: {e}")))?;
    f(&cert)
}

/// Extract the single subject common name of a PEM certificate
///
/// # Errors
///
/// Returns error if the PEM is invalid or the subject has zero or several common names
pub fn common_name(cert_pem: &str) -> Result<String> {
    with_certificate(cert_pem, |cert| {
        let names: Vec<_> = cert.subject().iter_common_name().collect();
        match names.as_slice() {
            [name] => name
                .as_str()
                .map(ToString::to_string)
                .map_err(|e| Error::Certificate(format!("unreadable common name: {e}"))),
            [] => Err(Error::Certificate("certificate has no common name".to_string())),
            _ => Err(Error::Certificate(format!(
                "certificate has {} common names",
                names.len()
            ))),
        }
    })
}

/// DER encoding of the certificate's `SubjectPublicKeyInfo`
///
/// # Errors
///
/// Returns error if the PEM is invalid
pub fn public_key_der(cert_pem: &str) -> Result<Vec<u8>> {
    with_certificate(cert_pem, |cert| Ok(cert.public_key().raw.to_vec()))
}

/// Base64 DER public key of the certificate in `certfile`
///
/// # Errors
///
/// Returns error if the file cannot be read or is not a certificate
pub fn authentication_info(certfile: &Path) -> Result<String> {
    let pem = fs::read_to_string(certfile)?;
    Ok(STANDARD.encode(public_key_der(&pem)?))
}

/// Wrap a base64 DER public key into a `PUBLIC KEY` PEM block
///
/// Accepts the key with or without surrounding JSON quotes, as returned by the
/// authorization system.
///
/// # Errors
///
/// Returns error if the input is not valid base64
pub fn public_key_pem_from_der_base64(der_base64: &str) -> Result<String> {
    let cleaned: String = der_base64
        .trim()
        .trim_matches('"')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD
        .decode(&cleaned)
        .map_err(|e| Error::Certificate(format!("public key is not base64: {e}")))?;

    Ok(pem_block("PUBLIC KEY", &cleaned))
}

/// PEM form of a DER certificate, as presented by a TLS peer
#[must_use]
pub fn certificate_pem_from_der(der: &[u8]) -> String {
    pem_block("CERTIFICATE", &STANDARD.encode(der))
}

fn pem_block(label: &str, base64: &str) -> String {
    let mut pem = format!("-----BEGIN {label}-----\n");
    for chunk in base64.as_bytes().chunks(PEM_LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

#[cfg(test)]
mod tests {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    use super::*;

    fn cert_with_names(names: &[&str]) -> String {
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let mut dn = DistinguishedName::new();
        for name in names {
            dn.push(DnType::CommonName, *name);
        }
        params.distinguished_name = dn;
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn extracts_single_common_name() {
        let pem = cert_with_names(&["consumer.testcloud.company.arrowhead.eu"]);
        assert_eq!(
            common_name(&pem).unwrap(),
            "consumer.testcloud.company.arrowhead.eu"
        );
    }

    #[test]
    fn missing_common_name_is_an_error() {
        let pem = cert_with_names(&[]);
        assert!(matches!(common_name(&pem), Err(Error::Certificate(_))));
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        assert!(matches!(common_name("not a pem"), Err(Error::Certificate(_))));
    }

    #[test]
    fn public_key_round_trips_through_pem() {
        let pem = cert_with_names(&["provider"]);
        let der = public_key_der(&pem).unwrap();
        let wrapped = public_key_pem_from_der_base64(&format!("\"{}\"", STANDARD.encode(&der))).unwrap();

        assert!(wrapped.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(wrapped.lines().all(|line| line.len() <= PEM_LINE_WIDTH));

        let body: String = wrapped.lines().filter(|l| !l.starts_with("-----")).collect();
        assert_eq!(STANDARD.decode(body).unwrap(), der);
    }

    #[test]
    fn authentication_info_reads_certfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.pem");
        let pem = cert_with_names(&["system"]);
        fs::write(&path, &pem).unwrap();

        let info = authentication_info(&path).unwrap();
        assert_eq!(STANDARD.decode(info).unwrap(), public_key_der(&pem).unwrap());
    }

    #[test]
    fn peer_der_converts_back_to_pem() {
        let params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let pem = certificate_pem_from_der(cert.der());
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert_eq!(
            public_key_der(&pem).unwrap(),
            public_key_der(&cert.pem()).unwrap()
        );
    }

    #[test]
    fn rejects_non_base64_public_key() {
        assert!(public_key_pem_from_der_base64("%%%").is_err());
    }
}
