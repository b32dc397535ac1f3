//! Network identity of a system participating in the local cloud

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::security::cert;

/// A named network endpoint acting as provider, consumer or both
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrowheadSystem {
    /// System name, also the expected certificate common-name prefix
    pub system_name: String,
    /// Host name or IP address
    pub address: String,
    /// TCP port
    pub port: u16,
    /// Base64 DER public key, absent for insecure systems
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_info: Option<String>,
}

impl ArrowheadSystem {
    /// Create a system without authentication info
    #[must_use]
    pub fn new(system_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            system_name: system_name.into(),
            address: address.into(),
            port,
            authentication_info: None,
        }
    }

    /// Create a system whose authentication info is derived from its certificate
    ///
    /// # Errors
    ///
    /// Returns error if the certificate cannot be read or parsed
    pub fn with_certfile(
        system_name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        certfile: &Path,
    ) -> Result<Self> {
        Ok(Self {
            authentication_info: Some(cert::authentication_info(certfile)?),
            ..Self::new(system_name, address, port)
        })
    }

    /// `address:port`
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for ArrowheadSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.system_name, self.address, self.port)
    }
}
