//! HTTP consumer backed by reqwest

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method};

use super::consumer::{ConsumeRequest, Consumer, Response, bearer_header};
use crate::config::Config;
use crate::orchestration::OrchestrationRule;
use crate::{Error, Result};

/// Consumer for `HTTP` interfaces
///
/// In secure mode the client presents this system's certificate and trusts
/// the local cloud's certificate authority.
#[derive(Debug, Clone)]
pub struct HttpConsumer {
    client: Client,
}

impl HttpConsumer {
    /// Plain client with a request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = builder(timeout).build().map_err(Error::Http)?;
        Ok(Self { client })
    }

    /// Client set up from the key, certificate and CA of `config`
    ///
    /// # Errors
    ///
    /// Returns `Io` if a PEM file cannot be read, `Certificate` if it does
    /// not parse and `Http` if the client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = builder(config.timeout);

        if config.secure {
            if let Some((keyfile, certfile)) = config.identity_files() {
                let cert = std::fs::read(certfile)?;
                let key = std::fs::read(keyfile)?;
                let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key).map_err(|e| {
                    Error::Certificate(format!(
                        "cannot use {} with {} as client identity: {e}",
                        certfile.display(),
                        keyfile.display()
                    ))
                })?;
                builder = builder.identity(identity);
            }
            if let Some(cafile) = &config.tls.cafile {
                let ca = reqwest::Certificate::from_pem(&std::fs::read(cafile)?).map_err(|e| {
                    Error::Certificate(format!("invalid CA certificate {}: {e}", cafile.display()))
                })?;
                builder = builder.add_root_certificate(ca);
            }
        }

        let client = builder.build().map_err(Error::Http)?;
        tracing::debug!(secure = config.secure, "HTTP consumer ready");
        Ok(Self { client })
    }
}

fn builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("arrowhead-client/", env!("CARGO_PKG_VERSION")))
}

#[async_trait]
impl Consumer for HttpConsumer {
    async fn consume(&self, rule: &OrchestrationRule, request: ConsumeRequest) -> Result<Response> {
        let method = Method::from_bytes(rule.method().as_bytes())
            .map_err(|_| Error::Validation(format!("invalid HTTP method '{}'", rule.method())))?;

        let mut builder = self.client.request(method, rule.url());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(bearer) = bearer_header(rule) {
            builder = builder.header(AUTHORIZATION, bearer);
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        tracing::debug!(method = %rule.method(), url = %rule.url(), "consuming");
        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let payload = response.bytes().await?.to_vec();

        Ok(Response {
            payload,
            payload_type: rule.payload_type().to_string(),
            status_code,
        })
    }
}
