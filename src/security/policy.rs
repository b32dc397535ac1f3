//! Access policies enforced at the provider boundary
//!
//! Three policies exist:
//! - unrestricted: every request passes
//! - certificate: the caller presented a client certificate
//! - token: the caller presented a bearer token issued by the authorization
//!   system for this consumer, service and interface

use std::sync::Arc;

use parking_lot::RwLock;
use rsa::RsaPrivateKey;

use super::{cert, token};
use crate::service::{AccessPolicyKind, Service, ServiceInterface};
use crate::{Error, Result};

/// What the provider knows about an inbound request
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessRequest<'a> {
    /// Client certificate PEM, if the transport forwarded one
    pub client_certificate: Option<&'a str>,
    /// Raw `Authorization` header
    pub authorization: Option<&'a str>,
}

/// Shared slot for the authorization system's public key (PEM)
///
/// Token policies are compiled before the key is fetched, so they hold this
/// handle and read it on every check. An empty slot fails closed.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationKey(Arc<RwLock<Option<String>>>);

impl AuthorizationKey {
    /// Empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot already holding `pem`
    #[must_use]
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(Some(pem.into()))))
    }

    /// Store the key
    pub fn set(&self, pem: impl Into<String>) {
        *self.0.write() = Some(pem.into());
    }

    /// Current key, if any
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0.read().clone()
    }

    /// Whether a key is present
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.read().is_some()
    }
}

/// Key material needed to compile token policies
#[derive(Debug, Clone, Default)]
pub struct PolicyKeys {
    /// Provider private key the tokens are encrypted for
    pub provider_key: Option<Arc<RsaPrivateKey>>,
    /// Authorization system public key slot
    pub authorization_key: AuthorizationKey,
}

/// Token policy bound to one provided service
#[derive(Debug, Clone)]
pub struct TokenAccessPolicy {
    provider_key: Arc<RsaPrivateKey>,
    authorization_key: AuthorizationKey,
    service_definition: String,
    interface: ServiceInterface,
}

impl TokenAccessPolicy {
    /// Bind the policy to `service`
    #[must_use]
    pub fn new(
        provider_key: Arc<RsaPrivateKey>,
        authorization_key: AuthorizationKey,
        service: &Service,
    ) -> Self {
        Self {
            provider_key,
            authorization_key,
            service_definition: service.service_definition().to_string(),
            interface: service.interface().clone(),
        }
    }

    /// Decide whether the request carries a token for this service
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` only when the `Authorization` header itself is
    /// missing or malformed; every later failure yields `Ok(false)`
    pub fn is_authorized(&self, request: &AccessRequest<'_>) -> Result<bool> {
        let bearer = token::bearer_token(request.authorization)?;
        match self.check(bearer, request.client_certificate) {
            Ok(granted) => Ok(granted),
            Err(e) => {
                tracing::debug!(service = %self.service_definition, error = %e, "token rejected");
                Ok(false)
            }
        }
    }

    fn check(&self, bearer: &str, client_certificate: Option<&str>) -> Result<bool> {
        let authorization_pem = self.authorization_key.get().ok_or_else(|| {
            Error::InvalidToken("authorization public key not available".to_string())
        })?;
        let claims = token::verify(
            bearer,
            &self.provider_key,
            &authorization_pem,
            chrono::Utc::now().timestamp(),
        )?;
        let access = token::AccessToken::from(claims);

        let certificate = client_certificate
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::InvalidToken("no client certificate".to_string()))?;
        let common_name = cert::common_name(certificate)?;

        Ok(common_name.starts_with(&access.consumer_id)
            && self.interface == access.interface_id
            && access.service_id == self.service_definition)
    }
}

/// Compiled access policy of a provided service
#[derive(Debug, Clone)]
pub enum AccessPolicy {
    /// Always authorized
    Unrestricted,
    /// Authorized when a client certificate is present
    Certificate,
    /// Authorized by a verified bearer token
    Token(TokenAccessPolicy),
}

impl AccessPolicy {
    /// Compile the policy `service` declares
    ///
    /// # Errors
    ///
    /// Returns `Config` if the token policy is requested without a provider key
    pub fn for_service(service: &Service, keys: &PolicyKeys) -> Result<Self> {
        match service.access_policy() {
            AccessPolicyKind::Unrestricted => Ok(Self::Unrestricted),
            AccessPolicyKind::Certificate => Ok(Self::Certificate),
            AccessPolicyKind::Token => {
                let provider_key = keys.provider_key.clone().ok_or_else(|| {
                    Error::Config(format!(
                        "service '{}' uses the token policy but no provider key is configured",
                        service.service_definition()
                    ))
                })?;
                Ok(Self::Token(TokenAccessPolicy::new(
                    provider_key,
                    keys.authorization_key.clone(),
                    service,
                )))
            }
        }
    }

    /// Compile a policy from its name
    ///
    /// # Errors
    ///
    /// Returns `UnknownAccessPolicy` for an unrecognised name and `Config` as in
    /// [`AccessPolicy::for_service`]
    pub fn from_name(name: &str, service: &Service, keys: &PolicyKeys) -> Result<Self> {
        let kind: AccessPolicyKind = name.parse()?;
        if kind == service.access_policy() {
            Self::for_service(service, keys)
        } else {
            let rebound = Service::new(
                service.service_definition(),
                service.service_uri(),
                service.interface().clone(),
                kind,
            );
            Self::for_service(&rebound, keys)
        }
    }

    /// Kind of the compiled policy
    #[must_use]
    pub const fn kind(&self) -> AccessPolicyKind {
        match self {
            Self::Unrestricted => AccessPolicyKind::Unrestricted,
            Self::Certificate => AccessPolicyKind::Certificate,
            Self::Token(_) => AccessPolicyKind::Token,
        }
    }

    /// Decide whether `request` may use the service
    ///
    /// # Errors
    ///
    /// Token policy only: a missing or non-`Bearer` `Authorization` header
    pub fn is_authorized(&self, request: &AccessRequest<'_>) -> Result<bool> {
        match self {
            Self::Unrestricted => Ok(true),
            Self::Certificate => Ok(request
                .client_certificate
                .is_some_and(|c| !c.trim().is_empty())),
            Self::Token(policy) => policy.is_authorized(request),
        }
    }
}
