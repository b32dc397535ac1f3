//! Arrowhead client: setup, orchestration, lifecycle and serving
//!
//! ```text
//! build ─▶ setup ─▶ run_forever:
//!                     fetch authorization key (token services only)
//!                     register_all ─▶ subscribe_all ─▶ serve
//!                     on shutdown: unsubscribe_all ─▶ unregister_all
//! ```

pub mod blocking;
pub mod core_services;
pub mod lifecycle;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

pub use self::blocking::BlockingClient;
pub use self::core_services::{CoreService, CoreSystem};
pub use self::lifecycle::{LifecycleCalls, LifecycleReport};
use crate::adapters::{
    AxumProvider, ConsumeRequest, Consumer, ConsumerRegistry, HttpConsumer, Provider, Response,
    ServerTls, WsConsumer,
};
use crate::config::Config;
use crate::forms::{
    EventPublishForm, OrchestrationFlags, OrchestrationForm, OrchestrationResponse,
    ServiceQueryForm, ServiceQueryResult, time_stamp,
};
use crate::orchestration::{OrchestrationRule, OrchestrationRuleContainer};
use crate::registration::{
    EventCallback, EventSubscriptionRule, EventSubscriptionRuleContainer, Handler,
    RegistrationRule, RegistrationRuleContainer,
};
use crate::security::cert::public_key_pem_from_der_base64;
use crate::security::token::private_key_from_pem;
use crate::security::{AccessPolicy, AuthorizationKey, PolicyKeys};
use crate::service::{AccessPolicyKind, Service, ServiceInterface};
use crate::system::ArrowheadSystem;
use crate::{Error, Result};

/// What to ask the orchestrator for
#[derive(Debug, Clone, Default)]
pub struct OrchestrationRequest {
    /// Accepted interfaces, e.g. `HTTP-SECURE-JSON`
    pub interfaces: Vec<ServiceInterface>,
    /// Accepted access policies
    pub access_policies: Vec<AccessPolicyKind>,
    /// Metadata the provider must carry
    pub metadata: BTreeMap<String, String>,
    /// Exact version wanted
    pub version: Option<i64>,
    /// Flags overriding the configured defaults
    pub flags: OrchestrationFlags,
    /// Providers to prefer
    pub preferred_providers: Vec<ArrowheadSystem>,
    /// Ask the orchestrator to ping providers first
    pub ping_providers: bool,
}

impl OrchestrationRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require one interface built from protocol, policy and payload
    #[must_use]
    pub fn interface(mut self, protocol: &str, access_policy: AccessPolicyKind, payload: &str) -> Self {
        self.interfaces
            .push(ServiceInterface::with_access_policy(protocol, access_policy, payload));
        if !self.access_policies.contains(&access_policy) {
            self.access_policies.push(access_policy);
        }
        self
    }

    /// Override the configured orchestration flags
    #[must_use]
    pub fn flags(mut self, flags: OrchestrationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Require a metadata entry
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn query(&self, definition: &str) -> ServiceQueryForm {
        ServiceQueryForm {
            interface_requirements: self.interfaces.iter().map(ServiceInterface::dto).collect(),
            security_requirements: self
                .access_policies
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            metadata_requirements: self.metadata.clone(),
            version_requirement: self.version,
            ping_providers: self.ping_providers,
            ..ServiceQueryForm::new(definition)
        }
    }
}

struct ProvidedService {
    service: Service,
    method: String,
    handler: Handler,
}

struct EventSubscription {
    event_type: String,
    callback: EventCallback,
    metadata: Option<BTreeMap<String, String>>,
}

/// Builder for [`ArrowheadClient`]
pub struct ArrowheadClientBuilder {
    config: Config,
    consumers: Vec<(String, Arc<dyn Consumer>)>,
    provided: Vec<ProvidedService>,
    subscriptions: Vec<EventSubscription>,
}

impl ArrowheadClientBuilder {
    /// Start from `config`
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            consumers: Vec::new(),
            provided: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Use `consumer` for `protocol` instead of the built-in one
    #[must_use]
    pub fn consumer(mut self, protocol: &str, consumer: Arc<dyn Consumer>) -> Self {
        self.consumers.push((protocol.to_string(), consumer));
        self
    }

    /// Declare a provided service
    #[must_use]
    pub fn provided_service(mut self, service: Service, method: &str, handler: Handler) -> Self {
        self.provided.push(ProvidedService {
            service,
            method: method.to_string(),
            handler,
        });
        self
    }

    /// Declare an event subscription
    #[must_use]
    pub fn subscribe_event(
        mut self,
        event_type: &str,
        callback: EventCallback,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        self.subscriptions.push(EventSubscription {
            event_type: event_type.to_string(),
            callback,
            metadata,
        });
        self
    }

    /// Build the client and run setup
    ///
    /// Setup stores one rule per core service, compiles the access policy of
    /// every provided service and creates the subscription rules.
    ///
    /// # Errors
    ///
    /// Returns error if key or certificate files cannot be loaded, a token
    /// service is declared without a provider key, or two provided services
    /// share a definition
    pub fn build(self) -> Result<ArrowheadClient> {
        let config = self.config;
        let system = config.system()?;

        let mut consumers = ConsumerRegistry::new();
        consumers.insert("HTTP", Arc::new(HttpConsumer::from_config(&config)?));
        consumers.insert("WS", Arc::new(WsConsumer::from_config(&config)?));
        for (protocol, consumer) in self.consumers {
            consumers.insert(&protocol, consumer);
        }

        let provider_key = match &config.tls.keyfile {
            Some(keyfile) => Some(Arc::new(private_key_from_pem(&std::fs::read_to_string(keyfile)?)?)),
            None => None,
        };
        let authorization_key = match &config.tls.authorization_public_key {
            Some(path) => AuthorizationKey::from_pem(std::fs::read_to_string(path)?),
            None => AuthorizationKey::new(),
        };

        let core_rules = CoreService::ALL
            .into_iter()
            .map(|core| (core, core.rule(&config)))
            .collect();

        let client = ArrowheadClient {
            system,
            consumers,
            core_rules,
            orchestration_rules: OrchestrationRuleContainer::new(),
            registration_rules: RegistrationRuleContainer::new(),
            event_rules: EventSubscriptionRuleContainer::new(),
            policy_keys: PolicyKeys {
                provider_key,
                authorization_key,
            },
            config,
        };
        client.setup(self.provided, self.subscriptions)?;
        Ok(client)
    }
}

/// Asynchronous Arrowhead client
///
/// Owns the system identity and every rule container for its lifetime.
/// Core service rules live apart from resolved user rules, so no user
/// definition can shadow or deactivate them.
pub struct ArrowheadClient {
    config: Config,
    system: ArrowheadSystem,
    consumers: ConsumerRegistry,
    core_rules: BTreeMap<CoreService, OrchestrationRule>,
    orchestration_rules: OrchestrationRuleContainer,
    registration_rules: RegistrationRuleContainer,
    event_rules: EventSubscriptionRuleContainer,
    policy_keys: PolicyKeys,
}

impl ArrowheadClient {
    /// Start building a client from `config`
    #[must_use]
    pub fn builder(config: Config) -> ArrowheadClientBuilder {
        ArrowheadClientBuilder::new(config)
    }

    fn setup(&self, provided: Vec<ProvidedService>, subscriptions: Vec<EventSubscription>) -> Result<()> {
        for declared in provided {
            let access_policy = AccessPolicy::for_service(&declared.service, &self.policy_keys)?;
            self.registration_rules.insert(RegistrationRule::new(
                declared.service,
                self.system.clone(),
                &declared.method,
                declared.handler,
                access_policy,
            ))?;
        }

        for declared in subscriptions {
            self.event_rules.insert(EventSubscriptionRule::new(
                &declared.event_type,
                self.system.clone(),
                declared.callback,
                declared.metadata,
            ));
        }

        tracing::debug!(
            system = %self.system,
            provided = self.registration_rules.len(),
            subscriptions = self.event_rules.len(),
            "client set up"
        );
        Ok(())
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// This system's identity
    #[must_use]
    pub const fn system(&self) -> &ArrowheadSystem {
        &self.system
    }

    /// Fixed rule reaching a core service
    #[must_use]
    pub fn core_rule(&self, service: CoreService) -> Option<&OrchestrationRule> {
        self.core_rules.get(&service)
    }

    #[must_use]
    pub const fn orchestration_rules(&self) -> &OrchestrationRuleContainer {
        &self.orchestration_rules
    }

    #[must_use]
    pub const fn registration_rules(&self) -> &RegistrationRuleContainer {
        &self.registration_rules
    }

    #[must_use]
    pub const fn event_rules(&self) -> &EventSubscriptionRuleContainer {
        &self.event_rules
    }

    /// Slot holding the authorization system's public key
    #[must_use]
    pub const fn authorization_key(&self) -> &AuthorizationKey {
        &self.policy_keys.authorization_key
    }

    /// Call a core service and map its status
    ///
    /// Core rules are never deactivated; an unreachable core system surfaces
    /// as a transport failure on every call.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the core system is unreachable and the status
    /// taxonomy of [`CoreService::check_status`] otherwise
    pub async fn call_core_service(&self, service: CoreService, request: ConsumeRequest) -> Result<Response> {
        let rule = self
            .core_rules
            .get(&service)
            .ok_or_else(|| Error::NoAvailableServices(service.definition().to_string()))?;
        let response = self
            .consumers
            .get(rule.protocol())?
            .consume(rule, request)
            .await?;
        service.check_status(&response)?;
        Ok(response)
    }

    /// Resolve `definition` through the orchestrator
    ///
    /// Replaces every rule previously stored for the definition. Returns the
    /// number of providers found; zero is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Orchestration` if the orchestrator rejects the request, or any
    /// core service error
    pub async fn add_orchestration_rule(
        &self,
        definition: &str,
        method: &str,
        request: OrchestrationRequest,
    ) -> Result<usize> {
        let flags = self.config.orchestration_flags.merged(&request.flags);
        let form = OrchestrationForm::new(
            self.system.clone(),
            request.query(definition),
            &flags,
            request.preferred_providers.clone(),
        );
        let response = self
            .call_core_service(
                CoreService::Orchestration,
                ConsumeRequest::new().json(serde_json::to_value(&form)?),
            )
            .await?;
        let response: OrchestrationResponse = response.json()?;

        let rules: Vec<OrchestrationRule> = response
            .response
            .iter()
            .filter_map(|entry| match OrchestrationRule::from_orchestration_result(entry, method) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(definition, provider = %entry.provider, error = %e, "orchestration entry ignored");
                    None
                }
            })
            .collect();

        let count = rules.len();
        for rule in &rules {
            tracing::info!(definition, rule = %rule, "orchestration rule resolved");
        }
        if count == 0 {
            tracing::warn!(definition, "orchestration returned no providers");
        }
        self.orchestration_rules.replace(definition, rules);
        Ok(count)
    }

    /// Consume `definition` through its stored rules
    ///
    /// Rules are tried in discovery order. A provider that fails at the
    /// transport level is deactivated and the next one is tried.
    ///
    /// # Errors
    ///
    /// Returns `NoAvailableServices` when no rule is left, `UnknownProtocol`
    /// when no consumer handles a rule's protocol, or any non-transport
    /// consumer error
    pub async fn consume_service(&self, definition: &str, request: ConsumeRequest) -> Result<Response> {
        self.orchestration_rules
            .resolve(definition, |rule| {
                let request = request.clone();
                async move {
                    let consumer = self.consumers.get(rule.protocol())?;
                    consumer.consume(&rule, request).await
                }
            })
            .await
    }

    /// Look up registry entries for a definition without orchestration
    ///
    /// # Errors
    ///
    /// Any core service error
    pub async fn query_service(&self, query: &ServiceQueryForm) -> Result<ServiceQueryResult> {
        let response = self
            .call_core_service(
                CoreService::Query,
                ConsumeRequest::new().json(serde_json::to_value(query)?),
            )
            .await?;
        response.json()
    }

    /// Publish an event through the event handler
    ///
    /// # Errors
    ///
    /// Any core service error
    pub async fn publish_event(
        &self,
        event_type: &str,
        payload: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let form = EventPublishForm {
            event_type: event_type.to_uppercase(),
            meta_data: metadata,
            payload: payload.into(),
            source: self.system.clone(),
            time_stamp: time_stamp(chrono::Utc::now()),
        };
        self.call_core_service(
            CoreService::Publish,
            ConsumeRequest::new().json(serde_json::to_value(&form)?),
        )
        .await?;
        tracing::debug!(event_type = %form.event_type, "event published");
        Ok(())
    }

    /// Fetch the authorization system's public key and share it with every
    /// token policy
    ///
    /// # Errors
    ///
    /// Any core service error, or `Certificate` if the key is not base64 DER
    pub async fn fetch_authorization_key(&self) -> Result<String> {
        let response = self
            .call_core_service(CoreService::PublicKey, ConsumeRequest::new())
            .await?;
        let pem = public_key_pem_from_der_base64(&response.text())?;
        self.policy_keys.authorization_key.set(pem.clone());
        tracing::info!("authorization public key loaded");
        Ok(pem)
    }

    /// Register every provided service not yet registered
    pub async fn register_all(&self) -> LifecycleReport {
        lifecycle::register_all(self, &self.registration_rules).await
    }

    /// Unregister every registered service
    pub async fn unregister_all(&self) -> LifecycleReport {
        lifecycle::unregister_all(self, &self.registration_rules).await
    }

    /// Subscribe every declared event not yet subscribed
    pub async fn subscribe_all(&self) -> LifecycleReport {
        lifecycle::subscribe_all(self, &self.event_rules).await
    }

    /// Cancel every active subscription
    pub async fn unsubscribe_all(&self) -> LifecycleReport {
        lifecycle::unsubscribe_all(self, &self.event_rules).await
    }

    /// Provider adapter with every provided service and event callback wired
    ///
    /// # Errors
    ///
    /// Returns `Validation` if two services claim the same route
    pub fn provider(&self) -> Result<AxumProvider> {
        let mut provider =
            AxumProvider::new().with_trusted_proxy_header(self.config.trusted_proxy_cert_header.clone());
        for rule in self.registration_rules.snapshot() {
            provider.add_provided_service(rule)?;
        }
        for rule in self.event_rules.snapshot() {
            provider.add_event_callback(rule)?;
        }
        Ok(provider)
    }

    /// Serve until Ctrl+C
    ///
    /// # Errors
    ///
    /// See [`ArrowheadClient::run_until`]
    pub async fn run_forever(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("interrupted, shutting down");
        })
        .await
    }

    /// Register, subscribe and serve until `shutdown` resolves, then tear down
    ///
    /// Everything is registered before the first request is served. Teardown
    /// unsubscribes and unregisters whatever was published, even when serving
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns `Registration` when `fail_on_registration_error` is set and a
    /// service failed to register, or the provider's serving error
    pub async fn run_until(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        self.bootstrap_authorization_key().await;
        let provider = self.provider()?;

        let registered = self.register_all().await;
        if !registered.is_clean() && self.config.fail_on_registration_error {
            self.unregister_all().await;
            let failed: Vec<String> = registered
                .failed
                .iter()
                .map(|(definition, error)| format!("{definition} ({error})"))
                .collect();
            return Err(Error::Registration(failed.join(", ")));
        }
        self.subscribe_all().await;

        let tls = match (self.config.secure, self.config.identity_files()) {
            (true, Some((keyfile, certfile))) => Some(ServerTls {
                keyfile,
                certfile,
                cafile: self.config.tls.cafile.as_deref(),
            }),
            _ => None,
        };
        let served = provider
            .run_forever(&self.config.address, self.config.port, tls, Box::pin(shutdown))
            .await;
        if let Err(e) = &served {
            tracing::error!(error = %e, "provider failed");
        }

        self.unsubscribe_all().await;
        self.unregister_all().await;
        served
    }

    async fn bootstrap_authorization_key(&self) {
        let needs_key = self
            .registration_rules
            .snapshot()
            .iter()
            .any(|rule| rule.access_policy().kind() == AccessPolicyKind::Token);
        if !needs_key || self.policy_keys.authorization_key.is_set() {
            return;
        }
        if let Err(e) = self.fetch_authorization_key().await {
            tracing::warn!(error = %e, "authorization public key unavailable, token requests will be denied");
        }
    }
}

impl std::fmt::Debug for ArrowheadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrowheadClient")
            .field("system", &self.system)
            .field("consumers", &self.consumers)
            .field("core_rules", &self.core_rules.len())
            .field("orchestration_rules", &self.orchestration_rules)
            .field("registration_rules", &self.registration_rules)
            .field("event_rules", &self.event_rules)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LifecycleCalls for ArrowheadClient {
    async fn register(&self, rule: &RegistrationRule) -> Result<()> {
        let form = serde_json::to_value(rule.registration_form())?;
        self.call_core_service(CoreService::Register, ConsumeRequest::new().json(form))
            .await?;
        Ok(())
    }

    async fn unregister(&self, rule: &RegistrationRule) -> Result<()> {
        let request = ConsumeRequest {
            query: rule.unregistration_query().params(),
            ..ConsumeRequest::default()
        };
        self.call_core_service(CoreService::Unregister, request).await?;
        Ok(())
    }

    async fn subscribe(&self, rule: &EventSubscriptionRule) -> Result<()> {
        let form = serde_json::to_value(rule.subscription_form())?;
        self.call_core_service(CoreService::Subscribe, ConsumeRequest::new().json(form))
            .await?;
        Ok(())
    }

    async fn unsubscribe(&self, rule: &EventSubscriptionRule) -> Result<()> {
        let request = ConsumeRequest {
            query: rule.unsubscription_query().params(),
            ..ConsumeRequest::default()
        };
        self.call_core_service(CoreService::Unsubscribe, request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insecure() -> Config {
        Config {
            secure: false,
            ..Config::default()
        }
    }

    #[test]
    fn build_stores_core_rules_apart() {
        let client = ArrowheadClient::builder(insecure()).build().unwrap();
        for core in CoreService::ALL {
            assert!(client.core_rule(core).is_some(), "{core}");
            assert!(!client.orchestration_rules().contains(core.definition()), "{core}");
        }
        assert!(client.registration_rules().is_empty());
    }

    #[test]
    fn token_service_needs_provider_key() {
        let service = Service::new(
            "echo",
            "echo",
            ServiceInterface::with_access_policy("HTTP", AccessPolicyKind::Token, "JSON"),
            AccessPolicyKind::Token,
        );
        let err = ArrowheadClient::builder(insecure())
            .provided_service(
                service,
                "GET",
                crate::registration::handler(|_| async {
                    Ok(crate::registration::ServiceResponse::text("ok"))
                }),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn orchestration_request_form() {
        let request = OrchestrationRequest::new()
            .interface("http", AccessPolicyKind::Certificate, "json")
            .interface("ws", AccessPolicyKind::Certificate, "json")
            .metadata("unit", "C");
        let query = request.query("temperature");
        assert_eq!(query.service_definition_requirement, "temperature");
        assert_eq!(query.interface_requirements, vec!["HTTP-SECURE-JSON", "WS-SECURE-JSON"]);
        assert_eq!(query.security_requirements, vec!["CERTIFICATE"]);
        assert_eq!(query.metadata_requirements["unit"], "C");
    }

    #[tokio::test]
    async fn unresolved_definition_has_no_services() {
        let client = ArrowheadClient::builder(insecure()).build().unwrap();
        let err = client
            .consume_service("echo", ConsumeRequest::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAvailableServices(ref d) if d == "echo"));
    }
}
