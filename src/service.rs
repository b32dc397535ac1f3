//! Service and interface descriptions
//!
//! A [`ServiceInterface`] is the `PROTOCOL-SECURITY-PAYLOAD` triple a service
//! is reachable through, e.g. `HTTP-SECURE-JSON`. A [`Service`] adds the
//! definition name, URI, access policy and optional metadata/version.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Security token for an interface that requires TLS
pub const SECURE: &str = "SECURE";

/// Security token for an interface served in plain text
pub const INSECURE: &str = "INSECURE";

/// Authorization mechanism a provided service requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccessPolicyKind {
    /// Anyone may call the service
    Unrestricted,
    /// Callers must present a client certificate
    Certificate,
    /// Callers must present an authorization token
    Token,
}

impl AccessPolicyKind {
    /// Name used on the wire by the service registry
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unrestricted => "NOT_SECURE",
            Self::Certificate => "CERTIFICATE",
            Self::Token => "TOKEN",
        }
    }

    /// Security token implied by the policy
    #[must_use]
    pub const fn security(self) -> &'static str {
        match self {
            Self::Unrestricted => INSECURE,
            Self::Certificate | Self::Token => SECURE,
        }
    }
}

impl fmt::Display for AccessPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "UNRESTRICTED" | "NOT_SECURE" => Ok(Self::Unrestricted),
            "CERTIFICATE" => Ok(Self::Certificate),
            "TOKEN" => Ok(Self::Token),
            other => Err(Error::UnknownAccessPolicy(other.to_string())),
        }
    }
}

impl TryFrom<String> for AccessPolicyKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AccessPolicyKind> for String {
    fn from(kind: AccessPolicyKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Protocol, security mode and payload format of a service endpoint
///
/// All parts are stored uppercased, so equality is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceInterface {
    protocol: String,
    secure: String,
    payload: String,
}

impl ServiceInterface {
    /// Build an interface from its three parts
    #[must_use]
    pub fn new(protocol: &str, secure: &str, payload: &str) -> Self {
        Self {
            protocol: protocol.to_uppercase(),
            secure: secure.to_uppercase(),
            payload: payload.to_uppercase(),
        }
    }

    /// Build an interface whose security part follows from an access policy
    #[must_use]
    pub fn with_access_policy(protocol: &str, access_policy: AccessPolicyKind, payload: &str) -> Self {
        Self::new(protocol, access_policy.security(), payload)
    }

    /// Protocol part, e.g. `HTTP`
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Security part, usually `SECURE` or `INSECURE`
    #[must_use]
    pub fn secure(&self) -> &str {
        &self.secure
    }

    /// Payload part, e.g. `JSON`
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Whether the interface is served over TLS
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure == SECURE
    }

    /// Canonical `PROTOCOL-SECURITY-PAYLOAD` form
    #[must_use]
    pub fn dto(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServiceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.protocol, self.secure, self.payload)
    }
}

impl FromStr for ServiceInterface {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        match parts.as_slice() {
            [protocol, secure, payload]
                if !protocol.is_empty() && !secure.is_empty() && !payload.is_empty() =>
            {
                Ok(Self::new(protocol, secure, payload))
            }
            _ => Err(Error::Validation(format!(
                "interface '{s}' is not of the form PROTOCOL-SECURITY-PAYLOAD"
            ))),
        }
    }
}

impl TryFrom<String> for ServiceInterface {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ServiceInterface> for String {
    fn from(interface: ServiceInterface) -> Self {
        interface.to_string()
    }
}

impl PartialEq<str> for ServiceInterface {
    fn eq(&self, other: &str) -> bool {
        self.to_string().eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for ServiceInterface {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<String> for ServiceInterface {
    fn eq(&self, other: &String) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<ServiceInterface> for str {
    fn eq(&self, other: &ServiceInterface) -> bool {
        other == self
    }
}

impl PartialEq<ServiceInterface> for &str {
    fn eq(&self, other: &ServiceInterface) -> bool {
        other == *self
    }
}

impl PartialEq<ServiceInterface> for String {
    fn eq(&self, other: &ServiceInterface) -> bool {
        other == self.as_str()
    }
}

/// Description of a service: what it is called, where it lives, how it is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    service_definition: String,
    service_uri: String,
    interface: ServiceInterface,
    access_policy: AccessPolicyKind,
    metadata: BTreeMap<String, String>,
    version: Option<i64>,
}

impl Service {
    /// Create a service without metadata or version
    #[must_use]
    pub fn new(
        service_definition: impl Into<String>,
        service_uri: impl Into<String>,
        interface: ServiceInterface,
        access_policy: AccessPolicyKind,
    ) -> Self {
        Self {
            service_definition: service_definition.into(),
            service_uri: service_uri.into(),
            interface,
            access_policy,
            metadata: BTreeMap::new(),
            version: None,
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach a version
    #[must_use]
    pub const fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Service definition, e.g. `echo`
    #[must_use]
    pub fn service_definition(&self) -> &str {
        &self.service_definition
    }

    /// Service URI as declared
    #[must_use]
    pub fn service_uri(&self) -> &str {
        &self.service_uri
    }

    /// Service URI without leading slash, suitable for joining onto an authority
    #[must_use]
    pub fn uri_path(&self) -> &str {
        self.service_uri.trim_start_matches('/')
    }

    /// Interface the service is reached through
    #[must_use]
    pub const fn interface(&self) -> &ServiceInterface {
        &self.interface
    }

    /// Access policy the provider enforces
    #[must_use]
    pub const fn access_policy(&self) -> AccessPolicyKind {
        self.access_policy
    }

    /// Metadata
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Version, if declared
    #[must_use]
    pub const fn version(&self) -> Option<i64> {
        self.version
    }
}
