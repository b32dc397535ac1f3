//! WebSocket consumer: one request message, one reply message

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::Connector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};

use super::consumer::{ConsumeRequest, Consumer, Response, bearer_header};
use crate::config::Config;
use crate::orchestration::OrchestrationRule;
use crate::{Error, Result};

/// Consumer for `WS` interfaces
///
/// Opens a connection per call, sends the JSON body as one text message and
/// returns the first text or binary message received.
#[derive(Clone)]
pub struct WsConsumer {
    connector: Option<Connector>,
    timeout: Duration,
}

impl WsConsumer {
    /// Consumer using the platform's default TLS settings
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            connector: None,
            timeout,
        }
    }

    /// Consumer presenting this system's certificate in secure mode
    ///
    /// # Errors
    ///
    /// Returns `Io` if a PEM file cannot be read and `Certificate` if the TLS
    /// connector cannot be built from them
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.secure {
            return Ok(Self::new(config.timeout));
        }

        let mut builder = native_tls::TlsConnector::builder();
        if let Some((keyfile, certfile)) = config.identity_files() {
            let identity =
                native_tls::Identity::from_pkcs8(&std::fs::read(certfile)?, &std::fs::read(keyfile)?)
                    .map_err(|e| Error::Certificate(format!("invalid client identity: {e}")))?;
            builder.identity(identity);
        }
        if let Some(cafile) = &config.tls.cafile {
            let ca = native_tls::Certificate::from_pem(&std::fs::read(cafile)?)
                .map_err(|e| Error::Certificate(format!("invalid CA certificate: {e}")))?;
            builder.add_root_certificate(ca);
        }
        let connector = builder
            .build()
            .map_err(|e| Error::Certificate(format!("cannot build TLS connector: {e}")))?;

        Ok(Self {
            connector: Some(Connector::NativeTls(connector)),
            timeout: config.timeout,
        })
    }
}

impl std::fmt::Debug for WsConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConsumer")
            .field("tls", &self.connector.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn url_with_query(url: String, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url;
    }
    let pairs: Vec<String> = query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("{url}?{}", pairs.join("&"))
}

fn ws_error(rule: &OrchestrationRule, e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Http(response) => Error::UnexpectedStatus {
            service: rule.service().service_definition().to_string(),
            status: response.status().as_u16(),
        },
        tungstenite::Error::Url(e) => Error::Validation(format!("invalid WebSocket URL: {e}")),
        other => Error::Transport(format!("{}: {other}", rule.url())),
    }
}

#[async_trait]
impl Consumer for WsConsumer {
    async fn consume(&self, rule: &OrchestrationRule, request: ConsumeRequest) -> Result<Response> {
        let url = url_with_query(rule.url(), &request.query);
        let mut ws_request = url.as_str().into_client_request().map_err(|e| ws_error(rule, e))?;

        let headers = ws_request.headers_mut();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Validation(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Validation(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(bearer) = bearer_header(rule) {
            let value = HeaderValue::from_str(&bearer)
                .map_err(|e| Error::Validation(format!("invalid authorization token: {e}")))?;
            headers.insert(tungstenite::http::header::AUTHORIZATION, value);
        }

        tracing::debug!(url = %url, "consuming over WebSocket");
        let connect = tokio_tungstenite::connect_async_tls_with_config(
            ws_request,
            None,
            false,
            self.connector.clone(),
        );
        let (mut stream, _) = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| Error::Transport(format!("{}: connect timed out", rule.url())))?
            .map_err(|e| ws_error(rule, e))?;

        let message = request.json.map(|json| json.to_string()).unwrap_or_default();
        stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ws_error(rule, e))?;

        let reply = tokio::time::timeout(self.timeout, async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => break Ok(text.as_str().as_bytes().to_vec()),
                    Some(Ok(Message::Binary(bytes))) => break Ok(bytes.to_vec()),
                    Some(Ok(Message::Close(_))) | None => {
                        break Err(Error::Transport(format!("{}: closed before reply", rule.url())));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(ws_error(rule, e)),
                }
            }
        })
        .await
        .map_err(|_| Error::Transport(format!("{}: no reply before timeout", rule.url())))??;

        if let Err(e) = stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }

        Ok(Response {
            payload: reply,
            payload_type: rule.payload_type().to_string(),
            status_code: 200,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::service::{AccessPolicyKind, Service, ServiceInterface};
    use crate::system::ArrowheadSystem;

    fn rule(port: u16) -> OrchestrationRule {
        OrchestrationRule::new(
            Service::new(
                "echo",
                "echo",
                ServiceInterface::new("WS", "INSECURE", "JSON"),
                AccessPolicyKind::Unrestricted,
            ),
            ArrowheadSystem::new("provider", "127.0.0.1", port),
            "GET",
            None,
        )
    }

    #[test]
    fn query_is_encoded() {
        let url = url_with_query(
            "ws://h:1/echo".to_string(),
            &[("a b".to_string(), "c&d".to_string())],
        );
        assert_eq!(url, "ws://h:1/echo?a%20b=c%26d");
        assert_eq!(url_with_query("ws://h:1/echo".to_string(), &[]), "ws://h:1/echo");
    }

    #[tokio::test]
    async fn round_trip_against_echo_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let upper = text.as_str().to_uppercase();
                ws.send(Message::Text(upper.into())).await.unwrap();
            }
        });

        let consumer = WsConsumer::new(Duration::from_secs(5));
        let response = consumer
            .consume(&rule(port), ConsumeRequest::new().json(json!({"msg": "echo"})))
            .await
            .unwrap();
        assert_eq!(response.text(), r#"{"MSG":"ECHO"}"#);
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn refused_connection_is_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = WsConsumer::new(Duration::from_secs(5))
            .consume(&rule(port), ConsumeRequest::new())
            .await
            .unwrap_err();
        assert!(err.is_transport(), "{err:?}");
    }
}
