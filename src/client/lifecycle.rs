//! Bulk registration and subscription engine
//!
//! Every bulk operation visits each rule once, in declaration order, and
//! tolerates partial failure: a failed item is logged and reported, and the
//! remaining items are still attempted. Flags only change after the remote
//! call succeeds, so a cancelled call leaves the rule as it was.

use async_trait::async_trait;

use crate::Result;
use crate::registration::{
    EventSubscriptionRule, EventSubscriptionRuleContainer, RegistrationRule,
    RegistrationRuleContainer,
};

/// Remote calls the engine drives
#[async_trait]
pub trait LifecycleCalls: Send + Sync {
    /// Register one provided service with the service registry
    async fn register(&self, rule: &RegistrationRule) -> Result<()>;

    /// Remove one provided service from the service registry
    async fn unregister(&self, rule: &RegistrationRule) -> Result<()>;

    /// Subscribe to one event type at the event handler
    async fn subscribe(&self, rule: &EventSubscriptionRule) -> Result<()>;

    /// Cancel one subscription at the event handler
    async fn unsubscribe(&self, rule: &EventSubscriptionRule) -> Result<()>;
}

/// Outcome of one bulk operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    /// Items whose remote call succeeded
    pub succeeded: Vec<String>,
    /// Items already in the target state, no call made
    pub skipped: Vec<String>,
    /// Items whose remote call failed, with the error
    pub failed: Vec<(String, String)>,
}

impl LifecycleReport {
    /// Whether nothing failed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Register every rule not yet provided
pub async fn register_all(
    calls: &dyn LifecycleCalls,
    rules: &RegistrationRuleContainer,
) -> LifecycleReport {
    let mut report = LifecycleReport::default();
    for rule in rules.snapshot() {
        let definition = rule.service().service_definition().to_string();
        if rule.is_provided() {
            report.skipped.push(definition);
            continue;
        }
        match calls.register(&rule).await {
            Ok(()) => {
                rule.set_provided(true);
                tracing::info!(definition = %definition, provider = %rule.provider(), "service registered");
                report.succeeded.push(definition);
            }
            Err(e) => {
                tracing::error!(definition = %definition, error = %e, "service registration failed");
                report.failed.push((definition, e.to_string()));
            }
        }
    }
    report
}

/// Unregister every provided rule
pub async fn unregister_all(
    calls: &dyn LifecycleCalls,
    rules: &RegistrationRuleContainer,
) -> LifecycleReport {
    let mut report = LifecycleReport::default();
    for rule in rules.snapshot() {
        let definition = rule.service().service_definition().to_string();
        if !rule.is_provided() {
            report.skipped.push(definition);
            continue;
        }
        match calls.unregister(&rule).await {
            Ok(()) => {
                rule.set_provided(false);
                tracing::info!(definition = %definition, "service unregistered");
                report.succeeded.push(definition);
            }
            Err(e) => {
                tracing::error!(definition = %definition, error = %e, "service unregistration failed");
                report.failed.push((definition, e.to_string()));
            }
        }
    }
    report
}

/// Subscribe every rule not yet subscribed
pub async fn subscribe_all(
    calls: &dyn LifecycleCalls,
    rules: &EventSubscriptionRuleContainer,
) -> LifecycleReport {
    let mut report = LifecycleReport::default();
    for rule in rules.snapshot() {
        let event_type = rule.event_type().to_string();
        if rule.is_subscribed() {
            report.skipped.push(event_type);
            continue;
        }
        match calls.subscribe(&rule).await {
            Ok(()) => {
                rule.set_subscribed(true);
                tracing::info!(event_type = %event_type, notify_uri = %rule.notify_uri(), "subscribed");
                report.succeeded.push(event_type);
            }
            Err(e) => {
                tracing::error!(event_type = %event_type, error = %e, "subscription failed");
                report.failed.push((event_type, e.to_string()));
            }
        }
    }
    report
}

/// Unsubscribe every subscribed rule
pub async fn unsubscribe_all(
    calls: &dyn LifecycleCalls,
    rules: &EventSubscriptionRuleContainer,
) -> LifecycleReport {
    let mut report = LifecycleReport::default();
    for rule in rules.snapshot() {
        let event_type = rule.event_type().to_string();
        if !rule.is_subscribed() {
            report.skipped.push(event_type);
            continue;
        }
        match calls.unsubscribe(&rule).await {
            Ok(()) => {
                rule.set_subscribed(false);
                tracing::info!(event_type = %event_type, "unsubscribed");
                report.succeeded.push(event_type);
            }
            Err(e) => {
                tracing::error!(event_type = %event_type, error = %e, "unsubscription failed");
                report.failed.push((event_type, e.to_string()));
            }
        }
    }
    report
}
