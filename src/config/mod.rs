//! Configuration management for Arrowhead clients

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use self::file::{ArrowheadConfigFile, CoreAddressFileConfig};
use crate::forms::OrchestrationFlags;
use crate::system::ArrowheadSystem;
use crate::{Error, Result};

/// Client configuration
///
/// Built once and passed to the client; nothing reads configuration from
/// global state afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// This system's name
    pub system_name: String,

    /// Address this system is reachable at and listens on
    pub address: String,

    /// Port this system listens on
    pub port: u16,

    /// Use HTTPS and mutual TLS for every call
    pub secure: bool,

    /// Key and certificate paths
    pub tls: TlsConfig,

    /// Core system addresses
    pub core: CoreSystems,

    /// Timeout of every outbound request
    pub timeout: Duration,

    /// Flags sent with every orchestration request unless overridden
    pub orchestration_flags: OrchestrationFlags,

    /// Header carrying the client certificate forwarded by a trusted TLS
    /// terminator
    ///
    /// Only for providers reachable solely through that proxy. Direct callers
    /// could set the header themselves; over TLS the verified peer
    /// certificate always wins.
    pub trusted_proxy_cert_header: Option<String>,

    /// Stop instead of serving when a provided service fails to register
    pub fail_on_registration_error: bool,
}

/// PEM file locations
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Private key of this system (PKCS#8 or PKCS#1)
    pub keyfile: Option<PathBuf>,

    /// Certificate of this system
    pub certfile: Option<PathBuf>,

    /// Certificate authority of the local cloud
    pub cafile: Option<PathBuf>,

    /// Authorization system public key; fetched at startup when absent
    pub authorization_public_key: Option<PathBuf>,
}

/// Address of a core system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreAddress {
    pub address: String,
    pub port: u16,
}

impl CoreAddress {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    fn overlay(&self, file: &CoreAddressFileConfig) -> Self {
        Self {
            address: file.address.clone().unwrap_or_else(|| self.address.clone()),
            port: file.port.unwrap_or(self.port),
        }
    }
}

/// Core systems this client talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSystems {
    pub service_registry: CoreAddress,
    pub orchestrator: CoreAddress,
    pub authorization: CoreAddress,
    pub event_handler: CoreAddress,
}

impl Default for CoreSystems {
    fn default() -> Self {
        Self {
            service_registry: CoreAddress::new("127.0.0.1", 8443),
            orchestrator: CoreAddress::new("127.0.0.1", 8441),
            authorization: CoreAddress::new("127.0.0.1", 8445),
            event_handler: CoreAddress::new("127.0.0.1", 8455),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_name: "arrowhead_client".to_string(),
            address: "127.0.0.1".to_string(),
            port: 7000,
            secure: true,
            tls: TlsConfig::default(),
            core: CoreSystems::default(),
            timeout: Duration::from_secs(10),
            orchestration_flags: default_orchestration_flags(),
            trusted_proxy_cert_header: None,
            fail_on_registration_error: false,
        }
    }
}

fn default_orchestration_flags() -> OrchestrationFlags {
    OrchestrationFlags::new()
        .set("override_store", true)
        .unwrap_or_default()
}

impl Config {
    /// Load configuration (env > file > default)
    ///
    /// With `path` the file must exist and parse. Without it the standard
    /// config file is used when present.
    ///
    /// # Errors
    ///
    /// Returns `Config` if an explicit file is unusable or the file names an
    /// unknown orchestration flag
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::load_config_file(path)?,
            None => file::load_default_config_file(),
        };
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file names an unknown orchestration flag
    pub fn from_sources(
        fc: ArrowheadConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let orchestration_flags = fc
            .orchestration
            .flags
            .iter()
            .try_fold(OrchestrationFlags::new(), |flags, (name, value)| {
                flags.set(name, *value)
            })
            .map_err(|e| Error::Config(e.to_string()))?;

        let core = CoreSystems {
            service_registry: defaults.core.service_registry.overlay(&fc.core.service_registry),
            orchestrator: defaults.core.orchestrator.overlay(&fc.core.orchestrator),
            authorization: defaults.core.authorization.overlay(&fc.core.authorization),
            event_handler: defaults.core.event_handler.overlay(&fc.core.event_handler),
        };

        let tls = TlsConfig {
            keyfile: env("ARROWHEAD_KEYFILE").map(PathBuf::from).or(fc.tls.keyfile),
            certfile: env("ARROWHEAD_CERTFILE").map(PathBuf::from).or(fc.tls.certfile),
            cafile: env("ARROWHEAD_CAFILE").map(PathBuf::from).or(fc.tls.cafile),
            authorization_public_key: fc.tls.authorization_public_key,
        };

        Ok(Self {
            system_name: env("ARROWHEAD_SYSTEM_NAME")
                .or(fc.system.name)
                .unwrap_or(defaults.system_name),
            address: env("ARROWHEAD_ADDRESS")
                .or(fc.system.address)
                .unwrap_or(defaults.address),
            port: env("ARROWHEAD_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.system.port)
                .unwrap_or(defaults.port),
            secure: env("ARROWHEAD_SECURE")
                .and_then(|s| parse_bool(&s))
                .or(fc.system.secure)
                .unwrap_or(defaults.secure),
            tls,
            core,
            timeout: fc
                .timeout_secs
                .map_or(defaults.timeout, Duration::from_secs),
            orchestration_flags: defaults.orchestration_flags.merged(&orchestration_flags),
            trusted_proxy_cert_header: fc.provider.trusted_proxy_cert_header,
            fail_on_registration_error: fc
                .provider
                .fail_on_registration_error
                .unwrap_or(defaults.fail_on_registration_error),
        })
    }

    /// This system's identity
    ///
    /// In secure mode with a certificate, the identity carries the
    /// certificate's public key as authentication info.
    ///
    /// # Errors
    ///
    /// Returns `Io`/`Certificate` if the certificate cannot be read
    pub fn system(&self) -> Result<ArrowheadSystem> {
        match (&self.tls.certfile, self.secure) {
            (Some(certfile), true) => ArrowheadSystem::with_certfile(
                self.system_name.as_str(),
                self.address.as_str(),
                self.port,
                certfile,
            ),
            _ => Ok(ArrowheadSystem::new(
                self.system_name.as_str(),
                self.address.as_str(),
                self.port,
            )),
        }
    }

    /// Key and certificate paths, when both are configured
    #[must_use]
    pub fn identity_files(&self) -> Option<(&Path, &Path)> {
        match (&self.tls.keyfile, &self.tls.certfile) {
            (Some(keyfile), Some(certfile)) => Some((keyfile.as_path(), certfile.as_path())),
            _ => None,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
