//! Request and response bodies exchanged with the core services
//!
//! Field names are snake_case here and camelCase on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::service::Service;
use crate::system::ArrowheadSystem;
use crate::text::{camelize_keys, snakeify_keys, to_snake_case};
use crate::{Error, Result};

/// Error body used by core services and by the provider adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Human readable reason
    pub error_message: String,
    /// HTTP status mirrored in the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    /// Server-side exception name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
}

impl ErrorMessage {
    /// Body carrying only a reason
    #[must_use]
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            error_code: None,
            exception_type: None,
        }
    }
}

/// `serviceregistry/register` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistrationForm {
    pub service_definition: String,
    pub service_uri: String,
    pub interfaces: Vec<String>,
    pub provider_system: ArrowheadSystem,
    pub secure: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_validity: Option<String>,
}

impl ServiceRegistrationForm {
    /// Describe `service` as provided by `provider`
    #[must_use]
    pub fn new(service: &Service, provider: &ArrowheadSystem) -> Self {
        Self {
            service_definition: service.service_definition().to_string(),
            service_uri: service.service_uri().to_string(),
            interfaces: vec![service.interface().dto()],
            provider_system: provider.clone(),
            secure: service.access_policy().as_str().to_string(),
            metadata: service.metadata().clone(),
            version: service.version(),
            end_of_validity: None,
        }
    }
}

/// Query parameters of `serviceregistry/unregister`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnregistrationQuery {
    pub service_definition: String,
    pub system_name: String,
    pub address: String,
    pub port: u16,
}

impl ServiceUnregistrationQuery {
    /// Identify `service` as provided by `provider`
    #[must_use]
    pub fn new(service: &Service, provider: &ArrowheadSystem) -> Self {
        Self {
            service_definition: service.service_definition().to_string(),
            system_name: provider.system_name.clone(),
            address: provider.address.clone(),
            port: provider.port,
        }
    }

    /// Query string pairs
    #[must_use]
    pub fn params(&self) -> Vec<(String, String)> {
        vec![
            ("service_definition".to_string(), self.service_definition.clone()),
            ("system_name".to_string(), self.system_name.clone()),
            ("address".to_string(), self.address.clone()),
            ("port".to_string(), self.port.to_string()),
        ]
    }
}

/// Service definition as nested in registry entries
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinitionEntry {
    #[serde(default)]
    pub id: i64,
    pub service_definition: String,
}

/// Interface as nested in registry entries
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceEntry {
    #[serde(default)]
    pub id: i64,
    pub interface_name: String,
}

/// One service registry entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistryEntry {
    #[serde(default)]
    pub id: i64,
    pub service_definition: ServiceDefinitionEntry,
    pub provider: ArrowheadSystem,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_uri: String,
    #[serde(default)]
    pub secure: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interfaces: Vec<InterfaceEntry>,
}

/// Requirements a wanted service must satisfy
///
/// Used both as `requestedService` in orchestration and as the body of
/// `serviceregistry/query`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceQueryForm {
    pub service_definition_requirement: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interface_requirements: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_requirements: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata_requirements: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_requirement: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_version_requirement: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version_requirement: Option<i64>,
    pub ping_providers: bool,
}

impl ServiceQueryForm {
    /// Require only a service definition
    #[must_use]
    pub fn new(service_definition: impl Into<String>) -> Self {
        Self {
            service_definition_requirement: service_definition.into(),
            ..Self::default()
        }
    }
}

/// `serviceregistry/query` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceQueryResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_query_data: Vec<ServiceRegistryEntry>,
    #[serde(default)]
    pub unfiltered_hits: i64,
}

/// Orchestration flag names understood by the orchestrator, in snake_case
pub const ORCHESTRATION_FLAGS: [&str; 7] = [
    "matchmaking",
    "metadata_search",
    "only_preferred",
    "ping_providers",
    "override_store",
    "enable_inter_cloud",
    "trigger_inter_cloud",
];

/// Orchestration flags keyed by snake_case name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrchestrationFlags(BTreeMap<String, bool>);

impl OrchestrationFlags {
    /// No flags set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag, accepting snake_case or camelCase names
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a name the orchestrator does not know
    pub fn set(mut self, name: &str, value: bool) -> Result<Self> {
        let name = to_snake_case(name);
        if !ORCHESTRATION_FLAGS.contains(&name.as_str()) {
            return Err(Error::Validation(format!("unknown orchestration flag '{name}'")));
        }
        self.0.insert(name, value);
        Ok(self)
    }

    /// Flag value, `false` when unset
    #[must_use]
    pub fn get(&self, name: &str) -> bool {
        self.0.get(&to_snake_case(name)).copied().unwrap_or(false)
    }

    /// Overlay `other` on top of these flags
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), *v)));
        Self(merged)
    }

    /// camelCase object for the orchestration request
    #[must_use]
    pub fn to_wire(&self) -> Map<String, Value> {
        let snake: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::Bool(*v)))
            .collect();
        camelize_keys(&snake)
    }

    /// Read flags back from a camelCase object
    ///
    /// # Errors
    ///
    /// Returns `Validation` for unknown names or non-boolean values
    pub fn from_wire(map: &Map<String, Value>) -> Result<Self> {
        snakeify_keys(map)
            .into_iter()
            .try_fold(Self::new(), |flags, (name, value)| {
                let value = value.as_bool().ok_or_else(|| {
                    Error::Validation(format!("orchestration flag '{name}' is not a boolean"))
                })?;
                flags.set(&name, value)
            })
    }
}

/// Entry of `preferredProviders`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredProvider {
    pub provider_system: ArrowheadSystem,
}

/// `orchestrator/orchestration` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationForm {
    pub requester_system: ArrowheadSystem,
    pub requested_service: ServiceQueryForm,
    pub orchestration_flags: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preferred_providers: Vec<PreferredProvider>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub commands: BTreeMap<String, String>,
}

impl OrchestrationForm {
    /// Ask for `requested_service` on behalf of `requester_system`
    #[must_use]
    pub fn new(
        requester_system: ArrowheadSystem,
        requested_service: ServiceQueryForm,
        flags: &OrchestrationFlags,
        preferred_providers: Vec<ArrowheadSystem>,
    ) -> Self {
        Self {
            requester_system,
            requested_service,
            orchestration_flags: flags.to_wire(),
            preferred_providers: preferred_providers
                .into_iter()
                .map(|provider_system| PreferredProvider { provider_system })
                .collect(),
            commands: BTreeMap::new(),
        }
    }
}

/// One provider returned by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub provider: ArrowheadSystem,
    pub service: ServiceDefinitionEntry,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_uri: String,
    #[serde(default)]
    pub secure: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interfaces: Vec<InterfaceEntry>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub authorization_tokens: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<String>,
}

/// `orchestrator/orchestration` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OrchestrationResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub response: Vec<OrchestrationResult>,
}

/// `eventhandler/publish` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPublishForm {
    pub event_type: String,
    pub meta_data: BTreeMap<String, String>,
    pub payload: String,
    pub source: ArrowheadSystem,
    pub time_stamp: String,
}

/// `eventhandler/subscribe` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscriptionForm {
    pub event_type: String,
    pub notify_uri: String,
    pub subscriber_system: ArrowheadSystem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_meta_data: Option<BTreeMap<String, String>>,
    pub match_meta_data: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ArrowheadSystem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// Query parameters of `eventhandler/unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventUnsubscriptionQuery {
    pub event_type: String,
    pub system_name: String,
    pub address: String,
    pub port: u16,
}

impl EventUnsubscriptionQuery {
    /// Query string pairs
    #[must_use]
    pub fn params(&self) -> Vec<(String, String)> {
        vec![
            ("event_type".to_string(), self.event_type.clone()),
            ("system_name".to_string(), self.system_name.clone()),
            ("address".to_string(), self.address.clone()),
            ("port".to_string(), self.port.to_string()),
        ]
    }
}

/// Event delivered by the event handler to a subscriber's notify URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotification {
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta_data: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payload: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_stamp: String,
}

/// Treat an explicit `null` from a core system like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Event handler time stamp format (UTC, second precision)
#[must_use]
pub fn time_stamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::service::{AccessPolicyKind, ServiceInterface};

    fn provider() -> ArrowheadSystem {
        ArrowheadSystem::new("provider", "127.0.0.1", 8080)
    }

    #[test]
    fn registration_form_wire_shape() {
        let service = Service::new(
            "echo",
            "echo",
            ServiceInterface::new("http", "secure", "json"),
            AccessPolicyKind::Certificate,
        )
        .with_version(2);
        let json = serde_json::to_value(ServiceRegistrationForm::new(&service, &provider())).unwrap();

        assert_eq!(
            json,
            json!({
                "serviceDefinition": "echo",
                "serviceUri": "echo",
                "interfaces": ["HTTP-SECURE-JSON"],
                "providerSystem": {"systemName": "provider", "address": "127.0.0.1", "port": 8080},
                "secure": "CERTIFICATE",
                "version": 2
            })
        );
    }

    #[test]
    fn unregistration_query_uses_snake_case_params() {
        let service = Service::new(
            "echo",
            "echo",
            ServiceInterface::new("http", "insecure", "json"),
            AccessPolicyKind::Unrestricted,
        );
        let params = ServiceUnregistrationQuery::new(&service, &provider()).params();
        assert_eq!(params[0], ("service_definition".to_string(), "echo".to_string()));
        assert_eq!(params[3], ("port".to_string(), "8080".to_string()));
    }

    #[test]
    fn orchestration_flags_are_camel_case_on_the_wire() {
        let flags = OrchestrationFlags::new()
            .set("override_store", true)
            .unwrap()
            .set("enableInterCloud", false)
            .unwrap();
        let wire = flags.to_wire();
        assert_eq!(wire["overrideStore"], json!(true));
        assert_eq!(wire["enableInterCloud"], json!(false));
        assert_eq!(OrchestrationFlags::from_wire(&wire).unwrap(), flags);

        assert!(flags.get("override_store"));
        assert!(!flags.get("matchmaking"));
        assert!(OrchestrationFlags::new().set("teleport", true).is_err());
    }

    #[test]
    fn merged_flags_prefer_overrides() {
        let base = OrchestrationFlags::new().set("override_store", true).unwrap();
        let extra = OrchestrationFlags::new()
            .set("override_store", false)
            .unwrap()
            .set("matchmaking", true)
            .unwrap();
        let merged = base.merged(&extra);
        assert!(!merged.get("override_store"));
        assert!(merged.get("matchmaking"));
    }

    #[test]
    fn orchestration_form_wire_shape() {
        let mut query = ServiceQueryForm::new("echo");
        query.interface_requirements = vec!["HTTP-SECURE-JSON".to_string()];
        query.security_requirements = vec!["CERTIFICATE".to_string()];
        let flags = OrchestrationFlags::new().set("override_store", true).unwrap();
        let form = OrchestrationForm::new(provider(), query, &flags, vec![]);
        let json = serde_json::to_value(form).unwrap();

        assert_eq!(json["requesterSystem"]["systemName"], "provider");
        assert_eq!(json["requestedService"]["serviceDefinitionRequirement"], "echo");
        assert_eq!(json["requestedService"]["interfaceRequirements"], json!(["HTTP-SECURE-JSON"]));
        assert_eq!(json["requestedService"]["pingProviders"], json!(false));
        assert_eq!(json["orchestrationFlags"], json!({"overrideStore": true}));
        assert!(json.get("preferredProviders").is_none());
    }

    #[test]
    fn parses_orchestration_response() {
        let response: OrchestrationResponse = serde_json::from_value(json!({
            "response": [{
                "provider": {"id": 3, "systemName": "provider", "address": "10.0.0.2", "port": 8000,
                             "authenticationInfo": null},
                "service": {"id": 1, "serviceDefinition": "echo"},
                "serviceUri": "/echo",
                "secure": "TOKEN",
                "metadata": null,
                "interfaces": [{"id": 1, "interfaceName": "HTTP-SECURE-JSON"}],
                "version": 1,
                "authorizationTokens": {"HTTP-SECURE-JSON": "abc.def"},
                "warnings": ["TTL_UNKNOWN"]
            }]
        }))
        .unwrap();

        let result = &response.response[0];
        assert_eq!(result.provider.authority(), "10.0.0.2:8000");
        assert_eq!(result.service.service_definition, "echo");
        assert_eq!(result.interfaces[0].interface_name, "HTTP-SECURE-JSON");
        assert_eq!(
            result.authorization_tokens.as_ref().unwrap()["HTTP-SECURE-JSON"],
            "abc.def"
        );
    }

    #[test]
    fn null_lists_from_core_systems_read_as_empty() {
        let response: OrchestrationResponse = serde_json::from_value(json!({
            "response": [{
                "provider": {"systemName": "provider", "address": "10.0.0.2", "port": 8000},
                "service": {"id": 1, "serviceDefinition": "echo"},
                "serviceUri": null,
                "interfaces": null,
                "warnings": null
            }]
        }))
        .unwrap();
        let result = &response.response[0];
        assert!(result.interfaces.is_empty());
        assert!(result.warnings.is_empty());
        assert!(result.service_uri.is_empty());

        let empty: OrchestrationResponse = serde_json::from_value(json!({"response": null})).unwrap();
        assert!(empty.response.is_empty());

        let hits: ServiceQueryResult = serde_json::from_value(json!({
            "serviceQueryData": [{
                "serviceDefinition": {"serviceDefinition": "echo"},
                "provider": {"systemName": "provider", "address": "10.0.0.2", "port": 8000},
                "interfaces": null
            }],
            "unfilteredHits": 1
        }))
        .unwrap();
        assert!(hits.service_query_data[0].interfaces.is_empty());

        let event: EventNotification =
            serde_json::from_value(json!({"eventType": "TEMPERATURE", "metaData": null, "payload": null}))
                .unwrap();
        assert!(event.meta_data.is_empty());
        assert!(event.payload.is_empty());
    }

    #[test]
    fn event_forms_use_meta_data_spelling() {
        let form = EventPublishForm {
            event_type: "TEMPERATURE".to_string(),
            meta_data: BTreeMap::from([("unit".to_string(), "C".to_string())]),
            payload: "21".to_string(),
            source: provider(),
            time_stamp: "2024-05-01T10:00:00Z".to_string(),
        };
        let json = serde_json::to_value(form).unwrap();
        assert_eq!(json["metaData"]["unit"], "C");
        assert_eq!(json["timeStamp"], "2024-05-01T10:00:00Z");

        let notification: EventNotification =
            serde_json::from_value(json!({"eventType": "TEMPERATURE", "payload": "21"})).unwrap();
        assert!(notification.meta_data.is_empty());
    }

    #[test]
    fn time_stamp_format() {
        let at = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123+00:00")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(time_stamp(at), "2024-05-01T10:00:00Z");
    }
}
