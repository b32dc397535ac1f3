//! Provider adapter: exposes provided services and event callbacks over HTTP
//!
//! Each provided service is routed at `/{service_uri}` with its declared
//! method. The service's compiled access policy runs before the handler, and
//! denied requests get `403` with `{"errorMessage": ...}`.
//!
//! Over TLS with a CA file every caller must present a certificate signed by
//! the local cloud's CA. The verified certificate is what the access policies
//! see. A provider behind a TLS-terminating proxy may instead trust a header
//! the proxy fills, see [`AxumProvider::with_trusted_proxy_header`]. With
//! neither, token-protected services answer `501` since the token cannot be
//! matched to a caller.
//!
//! Event subscriptions are routed at `POST /{notify_uri}`. A path serves
//! either services or one event callback, never both.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, Request};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::AddExtension;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter, on, post};
use axum::{Extension, Router};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures::future::BoxFuture;
use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::trace::TraceLayer;

use crate::forms::{ErrorMessage, EventNotification};
use crate::registration::{EventSubscriptionRule, RegistrationRule, ServiceRequest};
use crate::security::{AccessPolicy, AccessRequest, cert};
use crate::{Error, Result};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Future resolving when the provider should stop serving
pub type Shutdown = Pin<Box<dyn Future<Output = ()> + Send>>;

/// TLS material of the provider's listener
#[derive(Debug, Clone, Copy)]
pub struct ServerTls<'a> {
    /// Private key (PEM)
    pub keyfile: &'a Path,
    /// Certificate chain (PEM)
    pub certfile: &'a Path,
    /// CA that must have signed every caller's certificate
    ///
    /// Without it callers are not asked for a certificate, so `CERTIFICATE`
    /// and `TOKEN` services deny everyone.
    pub cafile: Option<&'a Path>,
}

/// Client certificate verified during the TLS handshake, as PEM
///
/// Present on every request of a listener that asks for client certificates;
/// `None` inside when the caller sent none.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificate(pub Option<Arc<str>>);

/// Serves provided services and receives event notifications
#[async_trait]
pub trait Provider: Send + Sync {
    /// Wire a provided service into the router
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the URI and method are already taken, or the
    /// URI is an event notify URI
    fn add_provided_service(&mut self, rule: Arc<RegistrationRule>) -> Result<()>;

    /// Wire an event subscription's notify URI into the router
    ///
    /// # Errors
    ///
    /// Returns `Validation` if any service or callback already uses the path
    fn add_event_callback(&mut self, rule: Arc<EventSubscriptionRule>) -> Result<()>;

    /// Serve until `shutdown` resolves, over TLS when `tls` is given
    ///
    /// # Errors
    ///
    /// Returns error if the TLS files are unusable, the listener cannot be
    /// bound or the server fails
    async fn run_forever(
        &self,
        address: &str,
        port: u16,
        tls: Option<ServerTls<'_>>,
        shutdown: Shutdown,
    ) -> Result<()>;
}

/// Provider adapter built on axum
#[derive(Debug, Default)]
pub struct AxumProvider {
    proxy_cert_header: Option<String>,
    services: Vec<Arc<RegistrationRule>>,
    events: Vec<Arc<EventSubscriptionRule>>,
    routes: BTreeSet<(String, String)>,
    event_paths: BTreeSet<String>,
}

impl AxumProvider {
    /// Provider that only trusts certificates verified in its own handshake
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust the client certificate (URL-encoded PEM) a proxy puts in `header`
    ///
    /// Only for providers that are reachable solely through that proxy. A
    /// certificate verified by this provider's own TLS listener takes
    /// precedence.
    #[must_use]
    pub fn with_trusted_proxy_header(mut self, header: Option<String>) -> Self {
        self.proxy_cert_header = header.map(|h| h.to_ascii_lowercase());
        self
    }

    fn claim_route(&mut self, path: &str, method: &str) -> Result<()> {
        if self.event_paths.contains(path) {
            return Err(Error::Validation(format!("path {path} is an event notify URI")));
        }
        if !self.routes.insert((path.to_string(), method.to_string())) {
            return Err(Error::Validation(format!("route {method} {path} is already taken")));
        }
        Ok(())
    }

    fn claim_event_path(&mut self, path: &str) -> Result<()> {
        if self.routes.iter().any(|(taken, _)| taken == path) {
            return Err(Error::Validation(format!("path {path} is already a service URI")));
        }
        if !self.event_paths.insert(path.to_string()) {
            return Err(Error::Validation(format!("notify URI {path} is already taken")));
        }
        Ok(())
    }

    /// Router with every wired service and callback
    pub fn router(&self) -> Router {
        let proxy_header = Arc::new(self.proxy_cert_header.clone());
        let mut method_routers: BTreeMap<String, MethodRouter> = BTreeMap::new();

        for rule in &self.services {
            let path = format!("/{}", rule.service().uri_path());
            let Some(filter) = method_filter(rule.method()) else {
                tracing::warn!(method = %rule.method(), path = %path, "unroutable method, service skipped");
                continue;
            };
            let rule = Arc::clone(rule);
            let proxy_header = Arc::clone(&proxy_header);
            let handler = move |request: Request| {
                let rule = Arc::clone(&rule);
                let proxy_header = Arc::clone(&proxy_header);
                async move { serve_service(&rule, proxy_header.as_deref(), request).await }
            };
            let router = match method_routers.remove(&path) {
                Some(existing) => existing.on(filter, handler),
                None => on(filter, handler),
            };
            method_routers.insert(path, router);
        }

        for rule in &self.events {
            let path = format!("/{}", rule.notify_uri());
            let rule = Arc::clone(rule);
            let handler = move |request: Request| {
                let rule = Arc::clone(&rule);
                async move { deliver_event(&rule, request).await }
            };
            method_routers.insert(path, post(handler));
        }

        method_routers
            .into_iter()
            .fold(Router::new(), |router, (path, method_router)| {
                router.route(&path, method_router)
            })
            .layer(TraceLayer::new_for_http())
    }
}

#[async_trait]
impl Provider for AxumProvider {
    fn add_provided_service(&mut self, rule: Arc<RegistrationRule>) -> Result<()> {
        let path = format!("/{}", rule.service().uri_path());
        if method_filter(rule.method()).is_none() {
            return Err(Error::Validation(format!("unsupported HTTP method '{}'", rule.method())));
        }
        self.claim_route(&path, rule.method())?;
        tracing::debug!(
            definition = %rule.service().service_definition(),
            method = %rule.method(),
            path = %path,
            policy = %rule.access_policy().kind(),
            "provided service wired"
        );
        self.services.push(rule);
        Ok(())
    }

    fn add_event_callback(&mut self, rule: Arc<EventSubscriptionRule>) -> Result<()> {
        self.claim_event_path(&format!("/{}", rule.notify_uri()))?;
        tracing::debug!(event_type = %rule.event_type(), notify_uri = %rule.notify_uri(), "event callback wired");
        self.events.push(rule);
        Ok(())
    }

    async fn run_forever(
        &self,
        address: &str,
        port: u16,
        tls: Option<ServerTls<'_>>,
        shutdown: Shutdown,
    ) -> Result<()> {
        let app = self.router();

        if let Some(tls) = tls {
            let addr = resolve(address, port).await?;
            let config = RustlsConfig::from_config(Arc::new(server_config(tls)?));

            let handle = axum_server::Handle::new();
            let stopper = handle.clone();
            tokio::spawn(async move {
                shutdown.await;
                stopper.graceful_shutdown(Some(Duration::from_secs(5)));
            });

            tracing::info!(%addr, client_auth = tls.cafile.is_some(), "provider listening (TLS)");
            let served = if tls.cafile.is_some() {
                let acceptor = PeerCertAcceptor {
                    inner: RustlsAcceptor::new(config),
                };
                axum_server::bind(addr)
                    .acceptor(acceptor)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
            } else {
                axum_server::bind_rustls(addr, config)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
            };
            served.map_err(|e| Error::Config(format!("provider server error: {e}")))?;
        } else {
            let listener = TcpListener::bind((address, port))
                .await
                .map_err(|e| Error::Config(format!("failed to bind provider on {address}:{port}: {e}")))?;
            tracing::info!(addr = %listener.local_addr()?, "provider listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(|e| Error::Config(format!("provider server error: {e}")))?;
        }

        tracing::info!("provider stopped");
        Ok(())
    }
}

/// rustls server config, demanding a CA-signed client certificate when a CA
/// file is given
fn server_config(tls: ServerTls<'_>) -> Result<rustls::ServerConfig> {
    let crypto = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let unreadable = |path: &Path, e: rustls::pki_types::pem::Error| {
        Error::Certificate(format!("cannot read {}: {e}", path.display()))
    };

    let chain = CertificateDer::pem_file_iter(tls.certfile)
        .map_err(|e| unreadable(tls.certfile, e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| unreadable(tls.certfile, e))?;
    let key = PrivateKeyDer::from_pem_file(tls.keyfile).map_err(|e| unreadable(tls.keyfile, e))?;

    let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&crypto))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Certificate(format!("TLS setup failed: {e}")))?;

    let builder = if let Some(cafile) = tls.cafile {
        let mut roots = RootCertStore::empty();
        for ca in CertificateDer::pem_file_iter(cafile).map_err(|e| unreadable(cafile, e))? {
            roots
                .add(ca.map_err(|e| unreadable(cafile, e))?)
                .map_err(|e| Error::Certificate(format!("invalid CA certificate: {e}")))?;
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), crypto)
            .build()
            .map_err(|e| Error::Certificate(format!("cannot verify client certificates: {e}")))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        tracing::warn!("no CA file configured, callers are not asked for certificates");
        builder.with_no_client_auth()
    };

    let mut config = builder
        .with_single_cert(chain, key)
        .map_err(|e| Error::Certificate(format!("unusable server certificate: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// TLS acceptor that attaches the verified client certificate to every request
#[derive(Clone)]
struct PeerCertAcceptor {
    inner: RustlsAcceptor,
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = <RustlsAcceptor as Accept<I, S>>::Stream;
    type Service = AddExtension<S, PeerCertificate>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = inner.accept(stream, service).await?;
            let peer = stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(<[CertificateDer<'static>]>::first)
                .map(|der| Arc::<str>::from(cert::certificate_pem_from_der(der)));
            Ok((stream, Extension(PeerCertificate(peer)).layer(service)))
        })
    }
}

fn method_filter(method: &str) -> Option<MethodFilter> {
    Method::from_bytes(method.as_bytes())
        .ok()
        .and_then(|m| MethodFilter::try_from(m).ok())
}

async fn resolve(address: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((address, port))
        .await?
        .next()
        .ok_or_else(|| Error::Config(format!("cannot resolve {address}:{port}")))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, axum::Json(ErrorMessage::new(message))).into_response()
}

/// Caller certificate: the one verified in the handshake, else the trusted
/// proxy header when configured
fn client_certificate(parts: &Parts, proxy_header: Option<&str>) -> Option<String> {
    if let Some(PeerCertificate(Some(pem))) = parts.extensions.get::<PeerCertificate>() {
        return Some(pem.to_string());
    }
    let value = parts.headers.get(proxy_header?)?.to_str().ok()?;
    urlencoding::decode(value).ok().map(std::borrow::Cow::into_owned)
}

async fn serve_service(
    rule: &RegistrationRule,
    proxy_header: Option<&str>,
    request: Request,
) -> Response {
    let definition = rule.service().service_definition();

    let (parts, body) = request.into_parts();
    let sees_certificates = parts.extensions.get::<PeerCertificate>().is_some() || proxy_header.is_some();
    if matches!(rule.access_policy(), AccessPolicy::Token(_)) && !sees_certificates {
        return error_response(
            StatusCode::NOT_IMPLEMENTED,
            "token access policy needs client certificates, which this provider cannot see",
        );
    }

    let certificate = client_certificate(&parts, proxy_header);
    let authorization = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let access = AccessRequest {
        client_certificate: certificate.as_deref(),
        authorization,
    };

    match rule.is_authorized(&access) {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(definition, policy = %rule.access_policy().kind(), "request denied");
            return error_response(StatusCode::FORBIDDEN, format!("not authorized to use '{definition}'"));
        }
        Err(e) => {
            tracing::info!(definition, error = %e, "request denied");
            return error_response(StatusCode::FORBIDDEN, e.to_string());
        }
    }

    let Query(query) = match Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
        Ok(query) => query,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid query: {e}")),
    };

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body.to_vec(),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("cannot read body: {e}")),
    };

    let service_request = ServiceRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query,
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body,
    };

    match rule.handle(service_request).await {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
            let content_type = HeaderValue::from_str(&response.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            (status, [(header::CONTENT_TYPE, content_type)], Body::from(response.body)).into_response()
        }
        Err(e) => {
            tracing::error!(definition, error = %e, "handler failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn deliver_event(rule: &EventSubscriptionRule, request: Request) -> Response {
    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("cannot read body: {e}")),
    };
    let event: EventNotification = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid event: {e}")),
    };

    tracing::debug!(event_type = %event.event_type, notify_uri = %rule.notify_uri(), "event received");
    match rule.notify(event).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(Error::Validation(message)) => error_response(StatusCode::BAD_REQUEST, message),
        Err(e) => {
            tracing::error!(event_type = %rule.event_type(), error = %e, "event callback failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
