//! Locally provided services and event subscriptions

mod container;
mod rule;

pub use container::{EventSubscriptionRuleContainer, RegistrationRuleContainer};
pub use rule::{
    EventCallback, EventSubscriptionRule, Handler, RegistrationRule, ServiceRequest,
    ServiceResponse, event_callback, handler,
};
