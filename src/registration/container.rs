//! Declared registration and subscription rules, in declaration order

use std::sync::Arc;

use parking_lot::RwLock;

use super::{EventSubscriptionRule, RegistrationRule};
use crate::{Error, Result};

/// Provided services keyed by service definition
#[derive(Debug, Default)]
pub struct RegistrationRuleContainer {
    rules: RwLock<Vec<Arc<RegistrationRule>>>,
}

impl RegistrationRuleContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the definition is already provided
    pub fn insert(&self, rule: RegistrationRule) -> Result<Arc<RegistrationRule>> {
        let mut rules = self.rules.write();
        let definition = rule.service().service_definition();
        if rules.iter().any(|r| r.service().service_definition() == definition) {
            return Err(Error::Validation(format!(
                "service '{definition}' is already provided"
            )));
        }
        let rule = Arc::new(rule);
        rules.push(Arc::clone(&rule));
        Ok(rule)
    }

    #[must_use]
    pub fn get(&self, definition: &str) -> Option<Arc<RegistrationRule>> {
        self.rules
            .read()
            .iter()
            .find(|r| r.service().service_definition() == definition)
            .cloned()
    }

    /// Every rule, in declaration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<RegistrationRule>> {
        self.rules.read().clone()
    }

    /// Rules currently registered
    #[must_use]
    pub fn provided(&self) -> Vec<Arc<RegistrationRule>> {
        self.rules.read().iter().filter(|r| r.is_provided()).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

/// Event subscriptions keyed by notify URI
#[derive(Debug, Default)]
pub struct EventSubscriptionRuleContainer {
    rules: RwLock<Vec<Arc<EventSubscriptionRule>>>,
}

impl EventSubscriptionRuleContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription
    pub fn insert(&self, rule: EventSubscriptionRule) -> Arc<EventSubscriptionRule> {
        let rule = Arc::new(rule);
        self.rules.write().push(Arc::clone(&rule));
        rule
    }

    /// Subscription owning `notify_uri`
    #[must_use]
    pub fn by_notify_uri(&self, notify_uri: &str) -> Option<Arc<EventSubscriptionRule>> {
        let notify_uri = notify_uri.trim_start_matches('/');
        self.rules
            .read()
            .iter()
            .find(|r| r.notify_uri() == notify_uri)
            .cloned()
    }

    /// Subscriptions to `event_type`
    #[must_use]
    pub fn by_event_type(&self, event_type: &str) -> Vec<Arc<EventSubscriptionRule>> {
        self.rules
            .read()
            .iter()
            .filter(|r| r.event_type().eq_ignore_ascii_case(event_type))
            .cloned()
            .collect()
    }

    /// Every subscription, in declaration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<EventSubscriptionRule>> {
        self.rules.read().clone()
    }

    /// Subscriptions currently active at the event handler
    #[must_use]
    pub fn subscribed(&self) -> Vec<Arc<EventSubscriptionRule>> {
        self.rules.read().iter().filter(|r| r.is_subscribed()).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
