//! Shared RSA key pairs and token minting for unit tests

use std::sync::OnceLock;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::jwe::{self, ContentEncryption};
use super::token::TokenClaims;

pub struct TestKeys {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
    pub private_pem: String,
    pub public_pem: String,
}

fn generate() -> TestKeys {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let public = RsaPublicKey::from(&private);
    TestKeys {
        private_pem: private.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
        public_pem: public.to_public_key_pem(LineEnding::LF).unwrap(),
        private,
        public,
    }
}

pub fn provider() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(generate)
}

pub fn authorization() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(generate)
}

/// Sign `claims` as the authorization system and encrypt for the provider
pub fn mint(claims: &TokenClaims) -> String {
    let signing_key = EncodingKey::from_rsa_pem(authorization().private_pem.as_bytes()).unwrap();
    let signed = encode(&Header::new(Algorithm::RS512), claims, &signing_key).unwrap();
    jwe::encrypt(
        signed.as_bytes(),
        &provider().public,
        ContentEncryption::A256CbcHs512,
        Some("JWT"),
    )
    .unwrap()
}
