//! Configuration file loading
//!
//! Supports `~/.config/arrowhead/config.toml` as a persistent config source,
//! or any `.toml`/`.yaml`/`.yml` file passed explicitly.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ArrowheadConfigFile {
    /// This system's identity
    #[serde(default)]
    pub system: SystemFileConfig,

    /// Key and certificate paths
    #[serde(default)]
    pub tls: TlsFileConfig,

    /// Core system addresses
    #[serde(default)]
    pub core: CoreFileConfig,

    /// Orchestration defaults
    #[serde(default)]
    pub orchestration: OrchestrationFileConfig,

    /// Provider adapter settings
    #[serde(default)]
    pub provider: ProviderFileConfig,

    /// Request timeout for core services and consumers
    pub timeout_secs: Option<u64>,
}

/// System identity
#[derive(Debug, Default, Deserialize)]
pub struct SystemFileConfig {
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    /// Use HTTPS and mutual TLS
    pub secure: Option<bool>,
}

/// PEM file locations
#[derive(Debug, Default, Deserialize)]
pub struct TlsFileConfig {
    pub keyfile: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub cafile: Option<PathBuf>,
    /// Authorization system public key; fetched at startup when absent
    pub authorization_public_key: Option<PathBuf>,
}

/// Address of one core system
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreAddressFileConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// Core system addresses
#[derive(Debug, Default, Deserialize)]
pub struct CoreFileConfig {
    #[serde(default)]
    pub service_registry: CoreAddressFileConfig,
    #[serde(default)]
    pub orchestrator: CoreAddressFileConfig,
    #[serde(default)]
    pub authorization: CoreAddressFileConfig,
    #[serde(default)]
    pub event_handler: CoreAddressFileConfig,
}

/// Orchestration defaults
#[derive(Debug, Default, Deserialize)]
pub struct OrchestrationFileConfig {
    /// Flags by snake_case name, e.g. `override_store = true`
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

/// Provider adapter settings
#[derive(Debug, Default, Deserialize)]
pub struct ProviderFileConfig {
    /// Header a trusted TLS-terminating proxy fills with the URL-encoded
    /// client certificate PEM
    pub trusted_proxy_cert_header: Option<String>,
    /// Stop serving when a provided service fails to register
    pub fail_on_registration_error: Option<bool>,
}

/// Parse an explicitly named configuration file
///
/// # Errors
///
/// Returns `Config` if the file cannot be read, has an unsupported extension
/// or does not parse
pub fn load_config_file(path: &Path) -> Result<ArrowheadConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = parse_config(path, &content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the config file from the standard path
///
/// Returns `ArrowheadConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_default_config_file() -> ArrowheadConfigFile {
    let Some(path) = config_file_path() else {
        return ArrowheadConfigFile::default();
    };

    if !path.exists() {
        return ArrowheadConfigFile::default();
    }

    match load_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ArrowheadConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/arrowhead/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("arrowhead").join("config.toml"))
}

fn parse_config(path: &Path, content: &str) -> Result<ArrowheadConfigFile> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("toml") => toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display()))),
        Some("yaml" | "yml") => serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid YAML in {}: {e}", path.display()))),
        _ => Err(Error::Config(format!(
            "unsupported config format: {} (expected .toml, .yaml or .yml)",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_overlay() {
        let file = parse_config(
            Path::new("client.toml"),
            r#"
timeout_secs = 3

[system]
name = "echo_provider"
port = 7001
secure = false

[core.orchestrator]
address = "10.0.0.5"

[orchestration.flags]
override_store = false
matchmaking = true

[provider]
trusted_proxy_cert_header = "x-ssl-client-cert"
"#,
        )
        .unwrap();

        assert_eq!(file.system.name.as_deref(), Some("echo_provider"));
        assert_eq!(file.system.port, Some(7001));
        assert_eq!(file.system.secure, Some(false));
        assert!(file.system.address.is_none());
        assert_eq!(file.core.orchestrator.address.as_deref(), Some("10.0.0.5"));
        assert!(file.core.orchestrator.port.is_none());
        assert_eq!(file.orchestration.flags.get("matchmaking"), Some(&true));
        assert_eq!(file.timeout_secs, Some(3));
        assert_eq!(
            file.provider.trusted_proxy_cert_header.as_deref(),
            Some("x-ssl-client-cert")
        );
    }

    #[test]
    fn parses_yaml_overlay() {
        let file = parse_config(
            Path::new("client.yml"),
            "system:\n  name: consumer\ntls:\n  keyfile: certs/consumer.key\n",
        )
        .unwrap();
        assert_eq!(file.system.name.as_deref(), Some("consumer"));
        assert_eq!(file.tls.keyfile, Some(PathBuf::from("certs/consumer.key")));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse_config(Path::new("c.toml"), "system = ["), Err(Error::Config(_))));
        assert!(matches!(parse_config(Path::new("c.json"), "{}"), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config_file(&dir.path().join("missing.toml")),
            Err(Error::Config(_))
        ));
    }
}
