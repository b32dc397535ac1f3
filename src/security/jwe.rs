//! Compact JWE envelopes (RFC 7516)
//!
//! Authorization tokens are signed by the authorization system and then
//! encrypted for the provider they are meant for. Only `RSA-OAEP-256` key
//! management is accepted; content may be encrypted with AES-CBC + HMAC or
//! AES-GCM.

use aes::{Aes128, Aes256};
use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// The only key management algorithm accepted
pub const KEY_MANAGEMENT: &str = "RSA-OAEP-256";

/// Content encryption algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncryption {
    /// AES-128-CBC with HMAC-SHA-256
    A128CbcHs256,
    /// AES-256-CBC with HMAC-SHA-512, the authorization system's default
    A256CbcHs512,
    /// AES-128-GCM
    A128Gcm,
    /// AES-256-GCM
    A256Gcm,
}

impl ContentEncryption {
    /// Header name of the algorithm
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A256CbcHs512 => "A256CBC-HS512",
            Self::A128Gcm => "A128GCM",
            Self::A256Gcm => "A256GCM",
        }
    }

    fn from_name(name: &str) -> Result<Self> {
        match name {
            "A128CBC-HS256" => Ok(Self::A128CbcHs256),
            "A256CBC-HS512" => Ok(Self::A256CbcHs512),
            "A128GCM" => Ok(Self::A128Gcm),
            "A256GCM" => Ok(Self::A256Gcm),
            other => Err(Error::MalformedToken(format!(
                "unsupported content encryption '{other}'"
            ))),
        }
    }

    /// Content encryption key length in bytes
    const fn key_len(self) -> usize {
        match self {
            Self::A128CbcHs256 | Self::A256Gcm => 32,
            Self::A256CbcHs512 => 64,
            Self::A128Gcm => 16,
        }
    }

    const fn iv_len(self) -> usize {
        match self {
            Self::A128CbcHs256 | Self::A256CbcHs512 => 16,
            Self::A128Gcm | Self::A256Gcm => 12,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

fn b64_decode(segment: &str, what: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::MalformedToken(format!("{what} is not base64url: {e}")))
}

/// Decrypt a compact JWE with the recipient's private key
///
/// # Errors
///
/// Returns `MalformedToken` for structural problems or unsupported algorithms
/// and `InvalidToken` when the key cannot unwrap the envelope or the
/// authentication tag does not match
pub fn decrypt(token: &str, key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    let [header_b64, encrypted_key, iv, ciphertext, tag] = segments.as_slice() else {
        return Err(Error::MalformedToken(format!(
            "expected 5 JWE segments, found {}",
            segments.len()
        )));
    };

    let header: JweHeader = serde_json::from_slice(&b64_decode(header_b64, "header")?)
        .map_err(|e| Error::MalformedToken(format!("invalid JWE header: {e}")))?;
    if header.alg != KEY_MANAGEMENT {
        return Err(Error::MalformedToken(format!(
            "unsupported key management '{}'",
            header.alg
        )));
    }
    let enc = ContentEncryption::from_name(&header.enc)?;

    let cek = key
        .decrypt(Oaep::new::<Sha256>(), &b64_decode(encrypted_key, "encrypted key")?)
        .map_err(|e| Error::InvalidToken(format!("cannot unwrap content key: {e}")))?;
    if cek.len() != enc.key_len() {
        return Err(Error::InvalidToken(format!(
            "content key is {} bytes, {} requires {}",
            cek.len(),
            enc.name(),
            enc.key_len()
        )));
    }

    let iv = b64_decode(iv, "iv")?;
    if iv.len() != enc.iv_len() {
        return Err(Error::MalformedToken(format!("iv is {} bytes", iv.len())));
    }
    let ciphertext = b64_decode(ciphertext, "ciphertext")?;
    let tag = b64_decode(tag, "tag")?;
    let aad = header_b64.as_bytes();

    match enc {
        ContentEncryption::A128CbcHs256 | ContentEncryption::A256CbcHs512 => {
            cbc_hs_decrypt(enc, &cek, aad, &iv, &ciphertext, &tag)
        }
        ContentEncryption::A128Gcm => gcm_decrypt::<Aes128Gcm>(&cek, aad, &iv, &ciphertext, &tag),
        ContentEncryption::A256Gcm => gcm_decrypt::<Aes256Gcm>(&cek, aad, &iv, &ciphertext, &tag),
    }
}

/// Encrypt `plaintext` for the holder of the private half of `key`
///
/// # Errors
///
/// Returns `Crypto` if key wrapping or encryption fails
pub fn encrypt(
    plaintext: &[u8],
    key: &RsaPublicKey,
    enc: ContentEncryption,
    content_type: Option<&str>,
) -> Result<String> {
    let header = JweHeader {
        alg: KEY_MANAGEMENT.to_string(),
        enc: enc.name().to_string(),
        cty: content_type.map(ToString::to_string),
    };
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

    let mut rng = rand::thread_rng();
    let mut cek = vec![0u8; enc.key_len()];
    rng.fill_bytes(&mut cek);
    let mut iv = vec![0u8; enc.iv_len()];
    rng.fill_bytes(&mut iv);

    let encrypted_key = key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), &cek)
        .map_err(|e| Error::Crypto(format!("cannot wrap content key: {e}")))?;

    let aad = header_b64.as_bytes();
    let (ciphertext, tag) = match enc {
        ContentEncryption::A128CbcHs256 | ContentEncryption::A256CbcHs512 => {
            cbc_hs_encrypt(enc, &cek, aad, &iv, plaintext)?
        }
        ContentEncryption::A128Gcm => gcm_encrypt::<Aes128Gcm>(&cek, aad, &iv, plaintext)?,
        ContentEncryption::A256Gcm => gcm_encrypt::<Aes256Gcm>(&cek, aad, &iv, plaintext)?,
    };

    Ok([
        header_b64,
        URL_SAFE_NO_PAD.encode(encrypted_key),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ]
    .join("."))
}

/// HMAC over `aad || iv || ciphertext || bitlen(aad)`, truncated to the MAC key length
fn cbc_hs_tag(
    enc: ContentEncryption,
    mac_key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let aad_bits = (aad.len() as u64).saturating_mul(8).to_be_bytes();
    let full = match enc {
        ContentEncryption::A128CbcHs256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
                .map_err(|e| Error::Crypto(e.to_string()))?;
            for part in [aad, iv, ciphertext, &aad_bits[..]] {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
        ContentEncryption::A256CbcHs512 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key)
                .map_err(|e| Error::Crypto(e.to_string()))?;
            for part in [aad, iv, ciphertext, &aad_bits[..]] {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
        ContentEncryption::A128Gcm | ContentEncryption::A256Gcm => {
            return Err(Error::Crypto(format!("{} is not a CBC-HMAC algorithm", enc.name())));
        }
    };
    Ok(full[..mac_key.len()].to_vec())
}

fn cbc_hs_decrypt(
    enc: ContentEncryption,
    cek: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let expected = cbc_hs_tag(enc, mac_key, aad, iv, ciphertext)?;
    if !bool::from(expected.as_slice().ct_eq(tag)) {
        return Err(Error::InvalidToken("authentication tag mismatch".to_string()));
    }

    let plaintext = match enc {
        ContentEncryption::A128CbcHs256 => cbc::Decryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    };
    plaintext.map_err(|_| Error::InvalidToken("bad padding".to_string()))
}

fn cbc_hs_encrypt(
    enc: ContentEncryption,
    cek: &[u8],
    aad: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let ciphertext = match enc {
        ContentEncryption::A128CbcHs256 => cbc::Encryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };
    let tag = cbc_hs_tag(enc, mac_key, aad, iv, &ciphertext)?;
    Ok((ciphertext, tag))
}

fn gcm_decrypt<C: KeyInit + Aead>(
    cek: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>> {
    let cipher = <C as KeyInit>::new_from_slice(cek).map_err(|e| Error::Crypto(e.to_string()))?;
    let mut msg = Vec::with_capacity(ciphertext.len() + tag.len());
    msg.extend_from_slice(ciphertext);
    msg.extend_from_slice(tag);
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), Payload { msg: &msg, aad })
        .map_err(|_| Error::InvalidToken("authentication tag mismatch".to_string()))
}

fn gcm_encrypt<C: KeyInit + Aead>(
    cek: &[u8],
    aad: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = <C as KeyInit>::new_from_slice(cek).map_err(|e| Error::Crypto(e.to_string()))?;
    let mut sealed = cipher
        .encrypt(Nonce::<C>::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let tag = sealed.split_off(sealed.len() - 16);
    Ok((sealed, tag))
}
