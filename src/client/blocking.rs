//! Synchronous facade over [`ArrowheadClient`]
//!
//! Owns a current-thread runtime and blocks on every call. Must not be used
//! from inside another Tokio runtime.

use std::collections::BTreeMap;
use std::future::Future;

use super::{ArrowheadClient, ArrowheadClientBuilder, LifecycleReport, OrchestrationRequest};
use crate::adapters::{ConsumeRequest, Response};
use crate::forms::{ServiceQueryForm, ServiceQueryResult};
use crate::{Error, Result};

/// Blocking Arrowhead client
#[derive(Debug)]
pub struct BlockingClient {
    runtime: tokio::runtime::Runtime,
    inner: ArrowheadClient,
}

impl BlockingClient {
    /// Build the client inside a fresh runtime
    ///
    /// # Errors
    ///
    /// Returns error if the runtime cannot start or the client fails to build
    pub fn new(builder: ArrowheadClientBuilder) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("cannot start runtime: {e}")))?;
        // reqwest and tungstenite clients must be created inside the runtime
        let inner = runtime.block_on(async { builder.build() })?;
        Ok(Self { runtime, inner })
    }

    /// The wrapped asynchronous client
    #[must_use]
    pub const fn inner(&self) -> &ArrowheadClient {
        &self.inner
    }

    fn block<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// See [`ArrowheadClient::add_orchestration_rule`]
    ///
    /// # Errors
    ///
    /// As the asynchronous call
    pub fn add_orchestration_rule(
        &self,
        definition: &str,
        method: &str,
        request: OrchestrationRequest,
    ) -> Result<usize> {
        self.block(self.inner.add_orchestration_rule(definition, method, request))
    }

    /// See [`ArrowheadClient::consume_service`]
    ///
    /// # Errors
    ///
    /// As the asynchronous call
    pub fn consume_service(&self, definition: &str, request: ConsumeRequest) -> Result<Response> {
        self.block(self.inner.consume_service(definition, request))
    }

    /// See [`ArrowheadClient::query_service`]
    ///
    /// # Errors
    ///
    /// As the asynchronous call
    pub fn query_service(&self, query: &ServiceQueryForm) -> Result<ServiceQueryResult> {
        self.block(self.inner.query_service(query))
    }

    /// See [`ArrowheadClient::publish_event`]
    ///
    /// # Errors
    ///
    /// As the asynchronous call
    pub fn publish_event(
        &self,
        event_type: &str,
        payload: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        self.block(self.inner.publish_event(event_type, payload, metadata))
    }

    /// See [`ArrowheadClient::fetch_authorization_key`]
    ///
    /// # Errors
    ///
    /// As the asynchronous call
    pub fn fetch_authorization_key(&self) -> Result<String> {
        self.block(self.inner.fetch_authorization_key())
    }

    pub fn register_all(&self) -> LifecycleReport {
        self.block(self.inner.register_all())
    }

    pub fn unregister_all(&self) -> LifecycleReport {
        self.block(self.inner.unregister_all())
    }

    pub fn subscribe_all(&self) -> LifecycleReport {
        self.block(self.inner.subscribe_all())
    }

    pub fn unsubscribe_all(&self) -> LifecycleReport {
        self.block(self.inner.unsubscribe_all())
    }

    /// Serve until Ctrl+C, see [`ArrowheadClient::run_forever`]
    ///
    /// # Errors
    ///
    /// As the asynchronous call
    pub fn run_forever(&self) -> Result<()> {
        self.block(self.inner.run_forever())
    }
}
