//! Authorization tokens
//!
//! A token is a JWS signed by the authorization system, wrapped in a JWE
//! encrypted for the provider. The provider decrypts with its own private key,
//! verifies with the authorization system's public key and then checks the
//! claims against the clock and the issuer.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use super::jwe;
use crate::{Error, Result};

/// Issuer every accepted token must carry
pub const AUTHORIZATION_ISSUER: &str = "Authorization";

/// Claims carried by an authorization token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token identifier
    #[serde(default)]
    pub jti: String,
    /// Issuer
    pub iss: String,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Not before (seconds since epoch)
    pub nbf: i64,
    /// Expiry (seconds since epoch); tokens without one never expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Consumer system name
    pub cid: String,
    /// Service definition
    pub sid: String,
    /// Interface
    pub iid: String,
}

impl TokenClaims {
    /// Check time window and issuer against `now`
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` naming the first failing check
    pub fn validate(&self, now: i64) -> Result<()> {
        if self.iat > now {
            return Err(Error::InvalidToken("token issued in the future".to_string()));
        }
        if self.nbf > now {
            return Err(Error::InvalidToken("token not yet valid".to_string()));
        }
        if self.exp.is_some_and(|exp| exp < now) {
            return Err(Error::InvalidToken("token expired".to_string()));
        }
        if self.iss != AUTHORIZATION_ISSUER {
            return Err(Error::InvalidToken(format!("unexpected issuer '{}'", self.iss)));
        }
        Ok(())
    }
}

/// What a verified token grants: which consumer may call which service over which interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Consumer system name
    pub consumer_id: String,
    /// Interface
    pub interface_id: String,
    /// Service definition
    pub service_id: String,
}

impl From<TokenClaims> for AccessToken {
    fn from(claims: TokenClaims) -> Self {
        Self {
            consumer_id: claims.cid,
            interface_id: claims.iid,
            service_id: claims.sid,
        }
    }
}

/// Split an `Authorization` header into its bearer token
///
/// # Errors
///
/// Returns `InvalidToken` if the header is missing, the scheme is not exactly
/// `Bearer` or the token is empty
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or_else(|| Error::InvalidToken("missing authorization header".to_string()))?;
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| Error::InvalidToken("authorization header has no scheme".to_string()))?;
    if scheme != "Bearer" {
        return Err(Error::InvalidToken(format!("unsupported scheme '{scheme}'")));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::InvalidToken("empty bearer token".to_string()));
    }
    Ok(token)
}

/// Decrypt, verify and validate a token
///
/// # Errors
///
/// Returns `MalformedToken`/`InvalidToken` for envelope, signature or claim
/// failures and `Crypto` if the authorization key is unusable
pub fn verify(
    token: &str,
    provider_key: &RsaPrivateKey,
    authorization_key_pem: &str,
    now: i64,
) -> Result<TokenClaims> {
    let inner = jwe::decrypt(token, provider_key)?;
    let inner = std::str::from_utf8(&inner)
        .map_err(|e| Error::MalformedToken(format!("signed payload is not UTF-8: {e}")))?
        .trim();

    let header = decode_header(inner)
        .map_err(|e| Error::MalformedToken(format!("invalid JWS header: {e}")))?;
    if !matches!(
        header.alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    ) {
        return Err(Error::MalformedToken(format!(
            "unsupported signature algorithm {:?}",
            header.alg
        )));
    }

    let key = DecodingKey::from_rsa_pem(authorization_key_pem.as_bytes())
        .map_err(|e| Error::Crypto(format!("invalid authorization public key: {e}")))?;

    // Time and issuer checks are done below against the caller's clock
    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims = decode::<TokenClaims>(inner, &key, &validation)
        .map_err(|e| Error::InvalidToken(format!("signature verification failed: {e}")))?
        .claims;
    claims.validate(now)?;

    tracing::debug!(jti = %claims.jti, cid = %claims.cid, sid = %claims.sid, "token verified");
    Ok(claims)
}

/// Parse an RSA private key from PKCS#8 or PKCS#1 PEM
///
/// # Errors
///
/// Returns `Crypto` if neither encoding parses
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::Crypto(format!("invalid RSA private key: {e}")))
}

/// Parse an RSA public key from SPKI or PKCS#1 PEM
///
/// # Errors
///
/// Returns `Crypto` if neither encoding parses
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::Crypto(format!("invalid RSA public key: {e}")))
}
