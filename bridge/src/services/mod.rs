//! Operation handlers, one module per envelope service.
//!
//! Each service exposes typed async methods for its operations plus a
//! [`Service::invoke`] entry point that decodes envelope arguments, calls the
//! matching method and encodes the result.

pub mod au_control;
pub mod au_status;
pub mod content;
pub mod content_configuration;
pub mod daemon_status;
pub mod hasher;
pub mod import;
pub mod metadata;

use crate::client::BridgeClient;
use crate::config::Backends;
use crate::credentials::InboundCall;
use crate::errors::BridgeFault;
use crate::request::{BackendRole, Endpoint};
use async_trait::async_trait;
use futures::StreamExt;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub const NO_SUCH_AU: &str = "No Archival Unit with provided identifier";

/// An envelope service: a named group of operations.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs `call.operation` with the JSON arguments of the envelope.
    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault>;
}

/// Every service, sharing one context.
pub fn all(context: &ServiceContext) -> Vec<Arc<dyn Service>> {
    vec![
        Arc::new(daemon_status::DaemonStatusService::new(context.clone())),
        Arc::new(au_status::AuService::new(context.clone())),
        Arc::new(au_control::AuControlService::new(context.clone())),
        Arc::new(content_configuration::ContentConfigurationService::new(context.clone())),
        Arc::new(content::ContentService::new(context.clone())),
        Arc::new(import::ImportService::new(context.clone())),
        Arc::new(hasher::HasherService::new(context.clone())),
        Arc::new(metadata::MetadataService::new(context.clone())),
    ]
}

/// Everything a handler needs, cheap to clone.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    client: BridgeClient,
    backends: Backends,
    collection: String,
    fanout_concurrency: usize,
}

impl ServiceContext {
    pub fn new(
        client: BridgeClient,
        backends: Backends,
        collection: String,
        fanout_concurrency: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                client,
                backends,
                collection,
                fanout_concurrency: fanout_concurrency.max(1),
            }),
        }
    }

    pub fn client(&self) -> &BridgeClient {
        &self.inner.client
    }

    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    fn endpoint(&self, role: BackendRole, url: &url::Url) -> Endpoint {
        Endpoint::new(role, url.clone())
    }

    pub fn repository(&self) -> Endpoint {
        self.endpoint(BackendRole::Repository, &self.inner.backends.repository)
    }

    pub fn configuration(&self) -> Endpoint {
        self.endpoint(BackendRole::Configuration, &self.inner.backends.configuration)
    }

    pub fn poller(&self) -> Endpoint {
        self.endpoint(BackendRole::Poller, &self.inner.backends.poller)
    }

    pub fn crawler(&self) -> Endpoint {
        self.endpoint(BackendRole::Crawler, &self.inner.backends.crawler)
    }

    pub fn metadata_extractor(&self) -> Endpoint {
        self.endpoint(
            BackendRole::MetadataExtractor,
            &self.inner.backends.metadata_extractor,
        )
    }

    pub fn metadata_query(&self) -> Endpoint {
        self.endpoint(BackendRole::MetadataQuery, &self.inner.backends.metadata_query)
    }

    /// Runs `f` once per id and returns the outputs in input order.
    ///
    /// At most `fanout_concurrency` calls are in flight at a time.
    pub async fn fan_out<T, F, Fut>(&self, ids: Vec<String>, f: F) -> Vec<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = T>,
    {
        futures::stream::iter(ids)
            .map(f)
            .buffered(self.inner.fanout_concurrency)
            .collect()
            .await
    }
}

/// Outcome of an operation on one archival unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResult {
    pub fn succeeded(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            message: None,
        }
    }

    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            message: Some(message.into()),
        }
    }

    /// Captures a backend fault for one item of a batch.
    pub fn from_fault(id: impl Into<String>, fault: &BridgeFault) -> Self {
        let id = id.into();
        tracing::warn!(id = %id, error = %fault, "Operation failed for item");
        Self::failed(id, item_message(fault))
    }
}

/// Message for a failed item; a 404 means the AU does not exist.
pub fn item_message(fault: &BridgeFault) -> String {
    if fault.is_not_found() {
        NO_SUCH_AU.to_string()
    } else {
        fault.message()
    }
}

/// Replaces the message of a 404 fault with `message`. Other faults pass
/// through.
pub fn not_found_as(fault: BridgeFault, message: &str) -> BridgeFault {
    match fault {
        BridgeFault::Status { target, status, .. } if status == StatusCode::NOT_FOUND => BridgeFault::Status {
            target,
            status,
            body: message.to_string(),
        },
        other => other,
    }
}

/// Turns a 404 into `Ok(None)`.
pub fn absent_on_404<T>(result: Result<T, BridgeFault>) -> Result<Option<T>, BridgeFault> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuIdArgs {
    pub au_id: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuIdListArgs {
    pub au_ids: Option<Vec<String>>,
}

/// Decodes envelope arguments; `null` counts as an empty object.
pub(crate) fn parse_args<T: DeserializeOwned>(operation: &str, args: Value) -> Result<T, BridgeFault> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(args).map_err(|e| {
        BridgeFault::caller_argument(format!("Invalid arguments for '{operation}': {e}"))
    })
}

/// Checks a required list of identifiers. Every element must be non-blank.
pub(crate) fn require_ids(name: &str, ids: Option<Vec<String>>) -> Result<Vec<String>, BridgeFault> {
    let Some(ids) = ids else {
        return Err(BridgeFault::caller_argument(format!(
            "Missing required argument '{name}'"
        )));
    };
    if let Some(index) = ids.iter().position(|id| id.trim().is_empty()) {
        return Err(BridgeFault::caller_argument(format!(
            "Missing required argument '{name}[{index}]'"
        )));
    }
    Ok(ids)
}

pub(crate) fn reply<T: Serialize>(value: T) -> Result<Value, BridgeFault> {
    serde_json::to_value(value).map_err(|e| BridgeFault::MalformedBody {
        target: "envelope".to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn unknown_operation(service: &str, operation: &str) -> BridgeFault {
    BridgeFault::caller_argument(format!("Unknown operation '{operation}' on service '{service}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{TestBackend, TestResponse};
    use std::time::Duration;

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let backend = TestBackend::spawn(|_| TestResponse::empty(StatusCode::OK)).await;
        let client = BridgeClient::new(&Default::default()).unwrap();
        let context = ServiceContext::new(client, backend.backends(), "lockss".to_string(), 4);

        let ids: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let out = context
            .fan_out(ids.clone(), |id| async move {
                // Later items finish first.
                let delay = 80 - 10 * id.parse::<u64>().unwrap();
                tokio::time::sleep(Duration::from_millis(delay)).await;
                id
            })
            .await;

        assert_eq!(out, ids);
    }

    #[test]
    fn test_require_ids() {
        assert!(require_ids("auIds", None).is_err());
        assert_eq!(require_ids("auIds", Some(vec![])).unwrap(), Vec::<String>::new());
        let err = require_ids("auIds", Some(vec!["a".into(), " ".into()])).unwrap_err();
        assert_eq!(err.message(), "Missing required argument 'auIds[1]'");
    }

    #[test]
    fn test_parse_args_null_is_empty() {
        let args: AuIdArgs = parse_args("getAuStatus", Value::Null).unwrap();
        assert!(args.au_id.is_none());

        let err = parse_args::<AuIdArgs>("getAuStatus", serde_json::json!({"auId": 5})).unwrap_err();
        assert!(matches!(err, BridgeFault::CallerArgument(_)));
    }

    #[test]
    fn test_not_found_as() {
        let fault = BridgeFault::Status {
            target: "configuration".to_string(),
            status: StatusCode::NOT_FOUND,
            body: "".to_string(),
        };
        assert_eq!(not_found_as(fault, NO_SUCH_AU).message(), NO_SUCH_AU);

        let fault = BridgeFault::Status {
            target: "configuration".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        };
        assert_eq!(not_found_as(fault, NO_SUCH_AU).message(), "boom");
    }
}
