//! Shared test utilities: a mock local cloud and config helpers

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use arrowhead_client::Config;
use arrowhead_client::config::CoreAddress;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Recorded state of the mock core systems
#[derive(Default)]
pub struct MockCore {
    /// `METHOD path` of every request, in arrival order
    pub calls: Mutex<Vec<String>>,
    /// Registered service definitions
    pub registered: Mutex<HashSet<String>>,
    /// Subscribed event types
    pub subscribed: Mutex<HashSet<String>>,
    /// Answer of the orchestrator
    pub orchestration: Mutex<Value>,
    /// Last orchestration request body
    pub last_orchestration: Mutex<Option<Value>>,
    /// Published events
    pub published: Mutex<Vec<Value>>,
    /// Definitions the registry rejects
    pub reject: Mutex<HashSet<String>>,
}

impl MockCore {
    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.ends_with(path)).count()
    }

    /// Make the orchestrator answer with these providers
    pub fn orchestrate_to(&self, results: Vec<Value>) {
        *self.orchestration.lock() = json!({ "response": results });
    }
}

type Shared = Arc<MockCore>;

async fn register(State(core): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    core.calls.lock().push("POST /serviceregistry/register".to_string());
    let definition = body["serviceDefinition"].as_str().unwrap_or_default().to_string();
    if core.reject.lock().contains(&definition) || !core.registered.lock().insert(definition.clone()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "errorMessage": format!("service {definition} already exists"),
                "errorCode": 400,
                "exceptionType": "INVALID_PARAMETER"
            })),
        );
    }
    (StatusCode::CREATED, Json(body))
}

async fn unregister(
    State(core): State<Shared>,
    Query(params): Query<Vec<(String, String)>>,
) -> StatusCode {
    core.calls.lock().push("DELETE /serviceregistry/unregister".to_string());
    if let Some((_, definition)) = params.iter().find(|(k, _)| k == "service_definition") {
        core.registered.lock().remove(definition);
    }
    StatusCode::OK
}

async fn orchestration(State(core): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    core.calls.lock().push("POST /orchestrator/orchestration".to_string());
    *core.last_orchestration.lock() = Some(body.clone());
    if body["requestedService"]["serviceDefinitionRequirement"] == "unknown" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "errorMessage": "no such service definition", "errorCode": 400 })),
        );
    }
    (StatusCode::OK, Json(core.orchestration.lock().clone()))
}

async fn public_key(State(core): State<Shared>) -> String {
    core.calls.lock().push("GET /authorization/publickey".to_string());
    // The authorization system answers with a JSON string
    "\"MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEtest\"".to_string()
}

async fn publish(State(core): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    core.calls.lock().push("POST /eventhandler/publish".to_string());
    core.published.lock().push(body);
    StatusCode::OK
}

async fn subscribe(State(core): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    core.calls.lock().push("POST /eventhandler/subscribe".to_string());
    let event_type = body["eventType"].as_str().unwrap_or_default().to_string();
    core.subscribed.lock().insert(event_type);
    StatusCode::CREATED
}

async fn unsubscribe(
    State(core): State<Shared>,
    Query(params): Query<Vec<(String, String)>>,
) -> StatusCode {
    core.calls.lock().push("DELETE /eventhandler/unsubscribe".to_string());
    if let Some((_, event_type)) = params.iter().find(|(k, _)| k == "event_type") {
        core.subscribed.lock().remove(event_type);
    }
    StatusCode::OK
}

/// Start every core system on one ephemeral port
pub async fn start_mock_core() -> (SocketAddr, Shared) {
    let core = Arc::new(MockCore {
        orchestration: Mutex::new(json!({ "response": [] })),
        ..MockCore::default()
    });
    let app = Router::new()
        .route("/serviceregistry/register", post(register))
        .route("/serviceregistry/unregister", delete(unregister))
        .route("/orchestrator/orchestration", post(orchestration))
        .route("/authorization/publickey", get(public_key))
        .route("/eventhandler/publish", post(publish))
        .route("/eventhandler/subscribe", post(subscribe))
        .route("/eventhandler/unsubscribe", delete(unsubscribe))
        .with_state(Arc::clone(&core));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, core)
}

/// Insecure config pointing every core system at `core`
pub fn insecure_config(core: SocketAddr, system_name: &str, port: u16) -> Config {
    let at = CoreAddress::new(core.ip().to_string(), core.port());
    let mut config = Config {
        system_name: system_name.to_string(),
        address: "127.0.0.1".to_string(),
        port,
        secure: false,
        ..Config::default()
    };
    config.core.service_registry = at.clone();
    config.core.orchestrator = at.clone();
    config.core.authorization = at.clone();
    config.core.event_handler = at;
    config
}

/// A port nothing is listening on
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Orchestrator answer entry for an insecure HTTP provider
pub fn http_provider(definition: &str, system_name: &str, port: u16, uri: &str) -> Value {
    json!({
        "provider": { "systemName": system_name, "address": "127.0.0.1", "port": port },
        "service": { "id": 1, "serviceDefinition": definition },
        "serviceUri": uri,
        "secure": "NOT_SECURE",
        "metadata": {},
        "interfaces": [{ "id": 1, "interfaceName": "HTTP-INSECURE-JSON" }],
        "version": 1,
        "warnings": []
    })
}

/// Start a plain HTTP server answering `POST /{uri}` with `answer`, counting hits
pub async fn start_static_provider(uri: &str, answer: Value) -> (u16, Arc<Mutex<usize>>) {
    let hits = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&hits);
    let app = Router::new().route(
        &format!("/{uri}"),
        post(move || {
            let counter = Arc::clone(&counter);
            let answer = answer.clone();
            async move {
                *counter.lock() += 1;
                Json(answer)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, hits)
}

/// Wait until something accepts connections on `port`
pub async fn wait_for_port(port: u16) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("nothing listening on port {port}");
}
