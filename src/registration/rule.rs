//! Provided services and event subscriptions declared by this system

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::forms::{
    EventNotification, EventSubscriptionForm, EventUnsubscriptionQuery, ServiceRegistrationForm,
    ServiceUnregistrationQuery,
};
use crate::security::{AccessPolicy, AccessRequest};
use crate::service::Service;
use crate::system::ArrowheadSystem;
use crate::{Error, Result};

/// Inbound request handed to a provided-service handler
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    /// HTTP method, uppercase
    pub method: String,
    /// Request path without query
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Headers with lowercase names
    pub headers: HashMap<String, String>,
    /// Raw body
    pub body: Vec<u8>,
}

impl ServiceRequest {
    /// Deserialize the body as JSON
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the body is not valid JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as UTF-8 text, lossy
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outbound response produced by a provided-service handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl ServiceResponse {
    /// `200` with a JSON body
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if `value` cannot be encoded
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            status: 200,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(value)?,
        })
    }

    /// `200` with a plain text body
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: body.into().into_bytes(),
        }
    }

    /// Same body with another status
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// Async handler of a provided service
pub type Handler = Arc<dyn Fn(ServiceRequest) -> BoxFuture<'static, Result<ServiceResponse>> + Send + Sync>;

/// Async callback for a subscribed event type
pub type EventCallback = Arc<dyn Fn(EventNotification) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async function as a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceResponse>> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Wrap an async function as an [`EventCallback`]
pub fn event_callback<F, Fut>(f: F) -> EventCallback
where
    F: Fn(EventNotification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// A service this system provides, with its handler and compiled policy
///
/// `is_provided` mirrors whether the service registry currently lists the
/// service. It only changes after the remote call has succeeded.
pub struct RegistrationRule {
    service: Service,
    provider: ArrowheadSystem,
    method: String,
    handler: Handler,
    access_policy: AccessPolicy,
    is_provided: AtomicBool,
}

impl RegistrationRule {
    /// Create an unregistered rule
    #[must_use]
    pub fn new(
        service: Service,
        provider: ArrowheadSystem,
        method: &str,
        handler: Handler,
        access_policy: AccessPolicy,
    ) -> Self {
        Self {
            service,
            provider,
            method: method.to_uppercase(),
            handler,
            access_policy,
            is_provided: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn service(&self) -> &Service {
        &self.service
    }

    #[must_use]
    pub const fn provider(&self) -> &ArrowheadSystem {
        &self.provider
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub const fn access_policy(&self) -> &AccessPolicy {
        &self.access_policy
    }

    /// Run the handler
    ///
    /// # Errors
    ///
    /// Whatever the handler returns
    pub async fn handle(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        (self.handler)(request).await
    }

    /// Apply the compiled access policy
    ///
    /// # Errors
    ///
    /// Token policy only: a missing or malformed `Authorization` header
    pub fn is_authorized(&self, request: &AccessRequest<'_>) -> Result<bool> {
        self.access_policy.is_authorized(request)
    }

    #[must_use]
    pub fn is_provided(&self) -> bool {
        self.is_provided.load(Ordering::Acquire)
    }

    pub(crate) fn set_provided(&self, provided: bool) {
        self.is_provided.store(provided, Ordering::Release);
    }

    /// Body of the registration request
    #[must_use]
    pub fn registration_form(&self) -> ServiceRegistrationForm {
        ServiceRegistrationForm::new(&self.service, &self.provider)
    }

    /// Query of the unregistration request
    #[must_use]
    pub fn unregistration_query(&self) -> ServiceUnregistrationQuery {
        ServiceUnregistrationQuery::new(&self.service, &self.provider)
    }
}

impl fmt::Debug for RegistrationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRule")
            .field("service", &self.service)
            .field("provider", &self.provider)
            .field("method", &self.method)
            .field("access_policy", &self.access_policy.kind())
            .field("is_provided", &self.is_provided())
            .finish_non_exhaustive()
    }
}

/// A subscription to one event type
///
/// Each subscription gets its own notify URI so two subscriptions to the
/// same event type never collide on the provider router.
pub struct EventSubscriptionRule {
    event_type: String,
    subscriber: ArrowheadSystem,
    callback: EventCallback,
    metadata: Option<BTreeMap<String, String>>,
    notify_uri: String,
    subscribed: AtomicBool,
}

impl EventSubscriptionRule {
    /// Create an inactive subscription with a fresh notify URI
    #[must_use]
    pub fn new(
        event_type: &str,
        subscriber: ArrowheadSystem,
        callback: EventCallback,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        let event_type = event_type.to_uppercase();
        let notify_uri = format!(
            "{}-{}",
            event_type.to_lowercase(),
            uuid::Uuid::new_v4().simple()
        );
        Self {
            event_type,
            subscriber,
            callback,
            metadata,
            notify_uri,
            subscribed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub const fn subscriber(&self) -> &ArrowheadSystem {
        &self.subscriber
    }

    #[must_use]
    pub const fn metadata(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.as_ref()
    }

    /// Path segment events for this subscription are posted to
    #[must_use]
    pub fn notify_uri(&self) -> &str {
        &self.notify_uri
    }

    /// Deliver an event to the callback
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an event of another type, otherwise whatever
    /// the callback returns
    pub async fn notify(&self, event: EventNotification) -> Result<()> {
        if !event.event_type.eq_ignore_ascii_case(&self.event_type) {
            return Err(Error::Validation(format!(
                "event '{}' delivered to subscription for '{}'",
                event.event_type, self.event_type
            )));
        }
        (self.callback)(event).await
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub(crate) fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Release);
    }

    /// Body of the subscription request
    #[must_use]
    pub fn subscription_form(&self) -> EventSubscriptionForm {
        EventSubscriptionForm {
            event_type: self.event_type.clone(),
            notify_uri: self.notify_uri.clone(),
            subscriber_system: self.subscriber.clone(),
            filter_meta_data: self.metadata.clone(),
            match_meta_data: self.metadata.is_some(),
            sources: Vec::new(),
            start_date: None,
            end_date: None,
        }
    }

    /// Query of the unsubscription request
    #[must_use]
    pub fn unsubscription_query(&self) -> EventUnsubscriptionQuery {
        EventUnsubscriptionQuery {
            event_type: self.event_type.clone(),
            system_name: self.subscriber.system_name.clone(),
            address: self.subscriber.address.clone(),
            port: self.subscriber.port,
        }
    }
}

impl fmt::Debug for EventSubscriptionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscriptionRule")
            .field("event_type", &self.event_type)
            .field("subscriber", &self.subscriber)
            .field("notify_uri", &self.notify_uri)
            .field("subscribed", &self.is_subscribed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::service::{AccessPolicyKind, ServiceInterface};

    fn system() -> ArrowheadSystem {
        ArrowheadSystem::new("provider", "127.0.0.1", 7000)
    }

    fn echo() -> RegistrationRule {
        RegistrationRule::new(
            Service::new(
                "echo",
                "echo",
                ServiceInterface::new("HTTP", "INSECURE", "JSON"),
                AccessPolicyKind::Unrestricted,
            ),
            system(),
            "get",
            handler(|request: ServiceRequest| async move {
                ServiceResponse::json(&json!({"msg": request.text().to_uppercase()}))
            }),
            AccessPolicy::Unrestricted,
        )
    }

    #[test]
    fn handler_runs() {
        let rule = echo();
        assert_eq!(rule.method(), "GET");
        let response = tokio_test::block_on(rule.handle(ServiceRequest {
            body: b"echo".to_vec(),
            ..ServiceRequest::default()
        }))
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"msg":"ECHO"}"#);
    }

    #[test]
    fn provided_flag_starts_false() {
        let rule = echo();
        assert!(!rule.is_provided());
        rule.set_provided(true);
        assert!(rule.is_provided());
        assert_eq!(rule.registration_form().service_definition, "echo");
        assert_eq!(rule.unregistration_query().port, 7000);
    }

    #[test]
    fn notify_uris_are_unique_per_subscription() {
        let callback = event_callback(|_| async { Ok(()) });
        let a = EventSubscriptionRule::new("temperature", system(), Arc::clone(&callback), None);
        let b = EventSubscriptionRule::new("temperature", system(), callback, None);
        assert_ne!(a.notify_uri(), b.notify_uri());
        assert!(a.notify_uri().starts_with("temperature-"));
        assert_eq!(a.event_type(), "TEMPERATURE");
    }

    #[tokio::test]
    async fn notify_checks_event_type() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let rule = EventSubscriptionRule::new(
            "temperature",
            system(),
            event_callback(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            Some(BTreeMap::from([("unit".to_string(), "C".to_string())])),
        );

        let event = |event_type: &str| EventNotification {
            event_type: event_type.to_string(),
            meta_data: BTreeMap::new(),
            payload: "21".to_string(),
            time_stamp: String::new(),
        };
        rule.notify(event("TEMPERATURE")).await.unwrap();
        assert!(rule.notify(event("PRESSURE")).await.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let form = rule.subscription_form();
        assert!(form.match_meta_data);
        assert_eq!(form.notify_uri, rule.notify_uri());
    }
}
