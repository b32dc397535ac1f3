//! Orchestration rules and the resolver that consumes them

mod container;
mod rule;

pub use container::{OrchestrationRuleContainer, RuleList};
pub use rule::OrchestrationRule;
