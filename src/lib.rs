//! Arrowhead client - consume and provide services in an Arrowhead local cloud
//!
//! This library provides:
//! - Service and system identity model
//! - Access policies (unrestricted, certificate, signed and encrypted token)
//! - Orchestration rule store with failover across providers
//! - Registration and event subscription lifecycle
//! - HTTP and WebSocket consumers, an axum based provider
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  ArrowheadClient                     │
//! │  orchestration rules │ registration rules │ events  │
//! └──────────┬───────────────────────┬──────────────────┘
//!            │ consume               │ serve
//! ┌──────────▼──────────┐  ┌─────────▼──────────────────┐
//! │ HTTP / WS consumers │  │ axum provider + policies   │
//! └──────────┬──────────┘  └─────────▲──────────────────┘
//!            │                       │
//! ┌──────────▼───────────────────────┴──────────────────┐
//! │ Core systems: registry │ orchestrator │ auth │ events│
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod client;
pub mod config;
pub mod error;
pub mod forms;
pub mod orchestration;
pub mod registration;
pub mod security;
pub mod service;
pub mod system;
pub mod text;

pub use adapters::{ConsumeRequest, Consumer, Provider, Response};
pub use client::{
    ArrowheadClient, ArrowheadClientBuilder, BlockingClient, CoreService, LifecycleReport,
    OrchestrationRequest,
};
pub use config::Config;
pub use error::{Error, Result};
pub use forms::OrchestrationFlags;
pub use orchestration::{OrchestrationRule, OrchestrationRuleContainer};
pub use registration::{
    EventSubscriptionRule, RegistrationRule, ServiceRequest, ServiceResponse, event_callback,
    handler,
};
pub use security::{AccessPolicy, AccessToken, TokenClaims};
pub use service::{AccessPolicyKind, Service, ServiceInterface};
pub use system::ArrowheadSystem;
