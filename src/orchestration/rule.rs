//! Resolved bindings of a consumed service to a concrete provider

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::forms::OrchestrationResult;
use crate::service::{AccessPolicyKind, Service, ServiceInterface};
use crate::system::ArrowheadSystem;
use crate::{Error, Result};

/// A consumed service bound to a provider, method and optional bearer token
///
/// `active` starts out `true` and is cleared once a transport failure is seen
/// through this rule. It is never set again; a fresh orchestration replaces
/// the rule instead.
#[derive(Debug)]
pub struct OrchestrationRule {
    service: Service,
    provider: ArrowheadSystem,
    method: String,
    authorization_token: Option<String>,
    active: AtomicBool,
}

impl OrchestrationRule {
    /// Create an active rule
    #[must_use]
    pub fn new(
        service: Service,
        provider: ArrowheadSystem,
        method: &str,
        authorization_token: Option<String>,
    ) -> Self {
        Self {
            service,
            provider,
            method: method.to_uppercase(),
            authorization_token: authorization_token.filter(|t| !t.is_empty()),
            active: AtomicBool::new(true),
        }
    }

    /// Build a rule from one orchestrator response entry
    ///
    /// Uses the first interface of the entry and the bearer token issued for
    /// that interface, if any.
    ///
    /// # Errors
    ///
    /// Returns `Orchestration` if the entry lists no interface, `Validation`
    /// for a malformed interface and `UnknownAccessPolicy` for an unknown
    /// security mode
    pub fn from_orchestration_result(result: &OrchestrationResult, method: &str) -> Result<Self> {
        let interface_name = result
            .interfaces
            .first()
            .map(|i| i.interface_name.as_str())
            .ok_or_else(|| {
                Error::Orchestration(format!(
                    "provider {} of '{}' lists no interface",
                    result.provider, result.service.service_definition
                ))
            })?;
        let interface: ServiceInterface = interface_name.parse()?;
        let access_policy = result
            .secure
            .as_deref()
            .map_or(Ok(AccessPolicyKind::Unrestricted), |name| name.parse::<AccessPolicyKind>())?;

        let mut service = Service::new(
            result.service.service_definition.as_str(),
            result.service_uri.as_str(),
            interface.clone(),
            access_policy,
        )
        .with_metadata(result.metadata.clone().unwrap_or_default());
        if let Some(version) = result.version {
            service = service.with_version(version);
        }

        let token = result
            .authorization_tokens
            .as_ref()
            .and_then(|tokens| token_for(tokens, &interface));

        Ok(Self::new(service, result.provider.clone(), method, token))
    }

    #[must_use]
    pub const fn service(&self) -> &Service {
        &self.service
    }

    #[must_use]
    pub const fn provider(&self) -> &ArrowheadSystem {
        &self.provider
    }

    /// HTTP method, uppercase
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn authorization_token(&self) -> Option<&str> {
        self.authorization_token.as_deref()
    }

    /// Interface protocol, e.g. `HTTP`
    #[must_use]
    pub fn protocol(&self) -> &str {
        self.service.interface().protocol()
    }

    /// Whether the interface is `SECURE`
    #[must_use]
    pub fn secure(&self) -> bool {
        self.service.interface().is_secure()
    }

    /// Interface payload format, e.g. `JSON`
    #[must_use]
    pub fn payload_type(&self) -> &str {
        self.service.interface().payload()
    }

    /// `address:port` of the provider
    #[must_use]
    pub fn authority(&self) -> String {
        self.provider.authority()
    }

    /// `address:port/uri`
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.authority(), self.service.uri_path())
    }

    /// Endpoint with a scheme derived from protocol and security mode
    ///
    /// `HTTP` becomes `http`/`https`, `WS` becomes `ws`/`wss`.
    #[must_use]
    pub fn url(&self) -> String {
        let mut scheme = self.protocol().to_lowercase();
        if self.secure() {
            scheme.push('s');
        }
        format!("{scheme}://{}", self.endpoint())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop handing this rule out
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Clone for OrchestrationRule {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            provider: self.provider.clone(),
            method: self.method.clone(),
            authorization_token: self.authorization_token.clone(),
            active: AtomicBool::new(self.is_active()),
        }
    }
}

impl fmt::Display for OrchestrationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} via {} ({})",
            self.method,
            self.service.service_definition(),
            self.url(),
            self.service.interface()
        )
    }
}

fn token_for(tokens: &BTreeMap<String, String>, interface: &ServiceInterface) -> Option<String> {
    tokens
        .iter()
        .find(|(name, _)| *interface == name.as_str())
        .map(|(_, token)| token.clone())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::forms::OrchestrationResponse;

    fn echo_rule(secure: &str, protocol: &str) -> OrchestrationRule {
        OrchestrationRule::new(
            Service::new(
                "echo",
                "/echo",
                ServiceInterface::new(protocol, secure, "json"),
                AccessPolicyKind::Unrestricted,
            ),
            ArrowheadSystem::new("provider", "10.0.0.2", 8000),
            "get",
            None,
        )
    }

    #[test]
    fn derived_views() {
        let rule = echo_rule("SECURE", "HTTP");
        assert_eq!(rule.method(), "GET");
        assert_eq!(rule.protocol(), "HTTP");
        assert!(rule.secure());
        assert_eq!(rule.payload_type(), "JSON");
        assert_eq!(rule.authority(), "10.0.0.2:8000");
        assert_eq!(rule.endpoint(), "10.0.0.2:8000/echo");
        assert_eq!(rule.url(), "https://10.0.0.2:8000/echo");

        assert_eq!(echo_rule("INSECURE", "HTTP").url(), "http://10.0.0.2:8000/echo");
        assert_eq!(echo_rule("SECURE", "WS").url(), "wss://10.0.0.2:8000/echo");
    }

    #[test]
    fn empty_token_is_no_token() {
        let rule = OrchestrationRule::new(
            echo_rule("INSECURE", "HTTP").service().clone(),
            ArrowheadSystem::new("provider", "10.0.0.2", 8000),
            "GET",
            Some(String::new()),
        );
        assert!(rule.authorization_token().is_none());
    }

    #[test]
    fn deactivation_sticks_and_survives_clone() {
        let rule = echo_rule("INSECURE", "HTTP");
        assert!(rule.is_active());
        rule.deactivate();
        assert!(!rule.is_active());
        assert!(!rule.clone().is_active());
    }

    #[test]
    fn builds_rule_from_orchestration_entry() {
        let response: OrchestrationResponse = serde_json::from_value(json!({
            "response": [{
                "provider": {"systemName": "provider", "address": "10.0.0.2", "port": 8000},
                "service": {"serviceDefinition": "echo"},
                "serviceUri": "echo",
                "secure": "TOKEN",
                "interfaces": [{"interfaceName": "HTTP-SECURE-JSON"}, {"interfaceName": "WS-SECURE-JSON"}],
                "version": 3,
                "authorizationTokens": {"http-secure-json": "tok", "WS-SECURE-JSON": "other"}
            }]
        }))
        .unwrap();

        let rule = OrchestrationRule::from_orchestration_result(&response.response[0], "post").unwrap();
        assert_eq!(rule.service().access_policy(), AccessPolicyKind::Token);
        assert_eq!(rule.service().version(), Some(3));
        assert_eq!(rule.authorization_token(), Some("tok"));
        assert_eq!(rule.url(), "https://10.0.0.2:8000/echo");
        assert_eq!(rule.method(), "POST");
    }

    #[test]
    fn entry_without_interfaces_is_rejected() {
        let response: OrchestrationResponse = serde_json::from_value(json!({
            "response": [{
                "provider": {"systemName": "provider", "address": "10.0.0.2", "port": 8000},
                "service": {"serviceDefinition": "echo"},
                "serviceUri": "echo"
            }]
        }))
        .unwrap();
        assert!(matches!(
            OrchestrationRule::from_orchestration_result(&response.response[0], "GET"),
            Err(Error::Orchestration(_))
        ));
    }
}
