//! Consumer contract shared by every outbound protocol

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::orchestration::OrchestrationRule;
use crate::{Error, Result};

/// Extra inputs of one consumption
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeRequest {
    /// JSON body
    pub json: Option<Value>,
    /// Query parameters, appended in order
    pub query: Vec<(String, String)>,
    /// Additional headers
    pub headers: Vec<(String, String)>,
}

impl ConsumeRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `json` as the body
    #[must_use]
    pub fn json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// What a provider answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Raw body
    pub payload: Vec<u8>,
    /// Payload format of the consumed interface, e.g. `JSON`
    pub payload_type: String,
    /// HTTP status, `200` for a WS reply
    pub status_code: u16,
}

impl Response {
    /// Decode the body as JSON
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the body is not valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Body as UTF-8 text, lossy
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }
}

/// Performs the network call described by a rule
///
/// Implementations attach `Authorization: Bearer <token>` when the rule
/// carries a token, and report connection failures and timeouts as
/// [`Error::Transport`] so the resolver can move on to another provider.
/// An HTTP error status is not a transport failure.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Call the provider bound by `rule`
    async fn consume(&self, rule: &OrchestrationRule, request: ConsumeRequest) -> Result<Response>;
}

/// `Authorization` header value for `rule`, if it carries a token
#[must_use]
pub fn bearer_header(rule: &OrchestrationRule) -> Option<String> {
    rule.authorization_token().map(|token| format!("Bearer {token}"))
}

/// Consumers keyed by protocol name
#[derive(Clone, Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<String, Arc<dyn Consumer>>,
}

impl ConsumerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` for `protocol`, replacing any previous one
    pub fn insert(&mut self, protocol: &str, consumer: Arc<dyn Consumer>) {
        self.consumers.insert(protocol.to_uppercase(), consumer);
    }

    /// Consumer for `protocol`
    ///
    /// # Errors
    ///
    /// Returns `UnknownProtocol` if none is registered
    pub fn get(&self, protocol: &str) -> Result<Arc<dyn Consumer>> {
        self.consumers
            .get(&protocol.to_uppercase())
            .cloned()
            .ok_or_else(|| Error::UnknownProtocol(protocol.to_string()))
    }

    /// Registered protocols, sorted
    #[must_use]
    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.consumers.keys().cloned().collect();
        protocols.sort();
        protocols
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::service::{AccessPolicyKind, Service, ServiceInterface};
    use crate::system::ArrowheadSystem;

    struct Fixed;

    #[async_trait]
    impl Consumer for Fixed {
        async fn consume(&self, rule: &OrchestrationRule, _request: ConsumeRequest) -> Result<Response> {
            Ok(Response {
                payload: bearer_header(rule).unwrap_or_default().into_bytes(),
                payload_type: rule.payload_type().to_string(),
                status_code: 200,
            })
        }
    }

    fn rule(token: Option<&str>) -> OrchestrationRule {
        OrchestrationRule::new(
            Service::new(
                "echo",
                "echo",
                ServiceInterface::new("HTTP", "SECURE", "JSON"),
                AccessPolicyKind::Token,
            ),
            ArrowheadSystem::new("provider", "127.0.0.1", 8000),
            "GET",
            token.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn registry_dispatches_by_protocol() {
        let mut registry = ConsumerRegistry::new();
        registry.insert("http", Arc::new(Fixed));
        assert_eq!(registry.protocols(), vec!["HTTP".to_string()]);

        let consumer = registry.get("HTTP").unwrap();
        let response = consumer.consume(&rule(Some("abc")), ConsumeRequest::new()).await.unwrap();
        assert_eq!(response.text(), "Bearer abc");
        assert_eq!(response.payload_type, "JSON");

        assert!(matches!(registry.get("COAP"), Err(Error::UnknownProtocol(_))));
    }

    #[test]
    fn no_token_no_header() {
        assert!(bearer_header(&rule(None)).is_none());
    }

    #[test]
    fn response_decoding() {
        let response = Response {
            payload: br#"{"msg":"ECHO"}"#.to_vec(),
            payload_type: "JSON".to_string(),
            status_code: 200,
        };
        assert!(response.is_success());
        assert_eq!(response.json::<Value>().unwrap(), json!({"msg": "ECHO"}));
        assert_eq!(response.text(), r#"{"msg":"ECHO"}"#);
    }

    #[test]
    fn request_builder() {
        let request = ConsumeRequest::new()
            .json(json!({"a": 1}))
            .query("event_type", "TEMPERATURE")
            .header("x-trace", "1");
        assert_eq!(request.query[0].1, "TEMPERATURE");
        assert_eq!(request.headers[0].0, "x-trace");
        assert!(request.json.is_some());
    }
}
