//! Error types for the Arrowhead client

use thiserror::Error;

/// Result type alias for Arrowhead client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Arrowhead client
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed value supplied by the caller (interface strings, identifiers)
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Core service rejected the request (HTTP 400)
    #[error("core service rejected input: {0}")]
    CoreServiceInput(String),

    /// Core service refused the credentials (HTTP 401/403)
    #[error("not authorized by core service: {0}")]
    CoreServiceNotAuthorized(String),

    /// Core service failed internally (HTTP 500)
    #[error("core service unavailable: {0}")]
    CoreServiceUnavailable(String),

    /// Orchestrator rejected the orchestration request (HTTP 400)
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// Core service answered with a status outside the known taxonomy
    #[error("unexpected status {status} from {service}")]
    UnexpectedStatus {
        /// Core service definition
        service: String,
        /// HTTP status code
        status: u16,
    },

    /// A provided service could not be registered and registration is required
    #[error("registration failed: {0}")]
    Registration(String),

    /// No active rule left for the service definition
    #[error("no services available for '{0}'")]
    NoAvailableServices(String),

    /// Token failed verification
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token could not be parsed or uses unsupported algorithms
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Connection refused, timed out or dropped before a response arrived
    #[error("transport failure: {0}")]
    Transport(String),

    /// Access policy name not recognised
    #[error("unknown access policy: {0}")]
    UnknownAccessPolicy(String),

    /// No consumer adapter registered for the protocol
    #[error("no consumer for protocol: {0}")]
    UnknownProtocol(String),

    /// Certificate loading or inspection error
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Key handling or cipher error
    #[error("crypto error: {0}")]
    Crypto(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error that is not a transport failure (body decoding, builder)
    #[error("http error: {0}")]
    Http(reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether the failure happened below HTTP, so another provider may still answer
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            Self::Transport(e.to_string())
        } else {
            Self::Http(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_is_distinguishable() {
        assert!(Error::Transport("refused".to_string()).is_transport());
        assert!(!Error::CoreServiceUnavailable("boom".to_string()).is_transport());
        assert!(!Error::NoAvailableServices("echo".to_string()).is_transport());
    }

    #[test]
    fn messages_name_the_subject() {
        let err = Error::NoAvailableServices("echo".to_string());
        assert_eq!(err.to_string(), "no services available for 'echo'");

        let err = Error::UnexpectedStatus {
            service: "register".to_string(),
            status: 418,
        };
        assert_eq!(err.to_string(), "unexpected status 418 from register");
    }
}
