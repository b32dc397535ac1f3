//! Core services of the local cloud, consumed like any other service

use std::fmt;

use crate::adapters::Response;
use crate::config::{Config, CoreAddress};
use crate::forms::ErrorMessage;
use crate::orchestration::OrchestrationRule;
use crate::service::{AccessPolicyKind, Service, ServiceInterface};
use crate::system::ArrowheadSystem;
use crate::{Error, Result};

/// Core system hosting a core service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreSystem {
    ServiceRegistry,
    Orchestrator,
    Authorization,
    EventHandler,
}

impl CoreSystem {
    /// System name used for the provider identity
    #[must_use]
    pub const fn system_name(self) -> &'static str {
        match self {
            Self::ServiceRegistry => "service_registry",
            Self::Orchestrator => "orchestrator",
            Self::Authorization => "authorization",
            Self::EventHandler => "event_handler",
        }
    }

    /// Configured address of this system
    #[must_use]
    pub const fn address(self, config: &Config) -> &CoreAddress {
        match self {
            Self::ServiceRegistry => &config.core.service_registry,
            Self::Orchestrator => &config.core.orchestrator,
            Self::Authorization => &config.core.authorization,
            Self::EventHandler => &config.core.event_handler,
        }
    }
}

/// One core service endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoreService {
    Register,
    Unregister,
    Query,
    Orchestration,
    PublicKey,
    Publish,
    Subscribe,
    Unsubscribe,
}

impl CoreService {
    pub const ALL: [Self; 8] = [
        Self::Register,
        Self::Unregister,
        Self::Query,
        Self::Orchestration,
        Self::PublicKey,
        Self::Publish,
        Self::Subscribe,
        Self::Unsubscribe,
    ];

    /// Service definition the rule is stored under
    #[must_use]
    pub const fn definition(self) -> &'static str {
        match self {
            Self::Register => "service-register",
            Self::Unregister => "service-unregister",
            Self::Query => "service-query",
            Self::Orchestration => "orchestration-service",
            Self::PublicKey => "auth-public-key",
            Self::Publish => "event-publish",
            Self::Subscribe => "event-subscribe",
            Self::Unsubscribe => "event-unsubscribe",
        }
    }

    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Register => "serviceregistry/register",
            Self::Unregister => "serviceregistry/unregister",
            Self::Query => "serviceregistry/query",
            Self::Orchestration => "orchestrator/orchestration",
            Self::PublicKey => "authorization/publickey",
            Self::Publish => "eventhandler/publish",
            Self::Subscribe => "eventhandler/subscribe",
            Self::Unsubscribe => "eventhandler/unsubscribe",
        }
    }

    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::Unregister | Self::Unsubscribe => "DELETE",
            Self::PublicKey => "GET",
            Self::Register | Self::Query | Self::Orchestration | Self::Publish | Self::Subscribe => "POST",
        }
    }

    #[must_use]
    pub const fn system(self) -> CoreSystem {
        match self {
            Self::Register | Self::Unregister | Self::Query => CoreSystem::ServiceRegistry,
            Self::Orchestration => CoreSystem::Orchestrator,
            Self::PublicKey => CoreSystem::Authorization,
            Self::Publish | Self::Subscribe | Self::Unsubscribe => CoreSystem::EventHandler,
        }
    }

    /// Rule pointing at this service as configured
    ///
    /// Secure clients reach core services over `HTTP-SECURE-JSON` with their
    /// certificate; insecure ones over `HTTP-INSECURE-JSON`.
    #[must_use]
    pub fn rule(self, config: &Config) -> OrchestrationRule {
        let access_policy = if config.secure {
            AccessPolicyKind::Certificate
        } else {
            AccessPolicyKind::Unrestricted
        };
        let core = self.system();
        let address = core.address(config);
        OrchestrationRule::new(
            Service::new(
                self.definition(),
                self.uri(),
                ServiceInterface::with_access_policy("HTTP", access_policy, "JSON"),
                access_policy,
            ),
            ArrowheadSystem::new(core.system_name(), address.address.as_str(), address.port),
            self.method(),
            None,
        )
    }

    /// Map a core service answer to the error taxonomy
    ///
    /// # Errors
    ///
    /// - `400`: `Orchestration` for the orchestrator, `CoreServiceInput` otherwise
    /// - `401`/`403`: `CoreServiceNotAuthorized`
    /// - `500`: `CoreServiceUnavailable`
    /// - any other non-2xx status: `UnexpectedStatus`
    pub fn check_status(self, response: &Response) -> Result<()> {
        if response.is_success() {
            return Ok(());
        }
        let message = response
            .json::<ErrorMessage>()
            .map_or_else(|_| response.text(), |body| body.error_message);
        let message = format!("{}: {message}", self.definition());

        match response.status_code {
            400 if self == Self::Orchestration => Err(Error::Orchestration(message)),
            400 => Err(Error::CoreServiceInput(message)),
            401 | 403 => Err(Error::CoreServiceNotAuthorized(message)),
            500 => Err(Error::CoreServiceUnavailable(message)),
            status => Err(Error::UnexpectedStatus {
                service: self.definition().to_string(),
                status,
            }),
        }
    }
}

impl fmt::Display for CoreService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.definition())
    }
}
