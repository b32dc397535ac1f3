//! Certificates, authorization tokens and access policies

pub mod cert;
pub mod jwe;
pub mod policy;
pub mod token;

#[cfg(test)]
pub(crate) mod test_keys;

pub use policy::{AccessPolicy, AccessRequest, AuthorizationKey, PolicyKeys, TokenAccessPolicy};
pub use token::{AUTHORIZATION_ISSUER, AccessToken, TokenClaims};
