//! Per-definition rule store and the consume-time resolver

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use super::OrchestrationRule;
use crate::{Error, Result};

/// Immutable snapshot of the rules for one definition, in discovery order
pub type RuleList = Arc<[Arc<OrchestrationRule>]>;

/// Orchestration rules keyed by service definition
///
/// Lists are replaced wholesale under the write lock. Readers clone the
/// current `Arc` and iterate that snapshot, so they never see a list that
/// is halfway replaced.
#[derive(Debug, Default)]
pub struct OrchestrationRuleContainer {
    rules: RwLock<HashMap<String, RuleList>>,
}

impl OrchestrationRuleContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one rule to its definition's list
    pub fn insert(&self, rule: OrchestrationRule) {
        let definition = rule.service().service_definition().to_string();
        let rule = Arc::new(rule);
        let mut rules = self.rules.write();
        let list: RuleList = match rules.get(&definition) {
            Some(existing) => existing.iter().cloned().chain([rule]).collect(),
            None => vec![rule].into(),
        };
        rules.insert(definition, list);
    }

    /// Replace every rule for `definition`
    ///
    /// An empty `rules` leaves the definition resolved with nothing to offer.
    pub fn replace(&self, definition: &str, rules: Vec<OrchestrationRule>) {
        let list: RuleList = rules.into_iter().map(Arc::new).collect();
        tracing::debug!(definition, rules = list.len(), "orchestration rules replaced");
        self.rules.write().insert(definition.to_string(), list);
    }

    /// Current rules for `definition`; `None` when absent or empty
    #[must_use]
    pub fn get(&self, definition: &str) -> Option<RuleList> {
        self.rules
            .read()
            .get(definition)
            .filter(|list| !list.is_empty())
            .cloned()
    }

    /// Whether `definition` has at least one rule
    #[must_use]
    pub fn contains(&self, definition: &str) -> bool {
        self.get(definition).is_some()
    }

    /// Drop the rules for `definition`
    pub fn remove(&self, definition: &str) -> Option<RuleList> {
        self.rules.write().remove(definition)
    }

    /// Definitions with at least one rule, sorted
    #[must_use]
    pub fn definitions(&self) -> Vec<String> {
        let mut definitions: Vec<String> = self
            .rules
            .read()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(definition, _)| definition.clone())
            .collect();
        definitions.sort();
        definitions
    }

    /// Snapshot of every definition and its rules
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, RuleList)> {
        let mut all: Vec<(String, RuleList)> = self
            .rules
            .read()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(definition, list)| (definition.clone(), Arc::clone(list)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Number of definitions with at least one rule
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().values().filter(|list| !list.is_empty()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try the active rules for `definition` in order until one succeeds
    ///
    /// A transport failure deactivates the rule and moves on to the next one.
    /// Any other error is returned as is.
    ///
    /// # Errors
    ///
    /// Returns `NoAvailableServices` when the definition is unresolved, was
    /// resolved to nothing or every rule is inactive
    pub async fn resolve<T, F, Fut>(&self, definition: &str, mut call: F) -> Result<T>
    where
        F: FnMut(Arc<OrchestrationRule>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let rules = self
            .get(definition)
            .ok_or_else(|| Error::NoAvailableServices(definition.to_string()))?;

        for rule in rules.iter().filter(|rule| rule.is_active()) {
            match call(Arc::clone(rule)).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() => {
                    rule.deactivate();
                    tracing::warn!(
                        definition,
                        provider = %rule.provider(),
                        error = %e,
                        "provider unreachable, rule deactivated"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoAvailableServices(definition.to_string()))
    }
}
