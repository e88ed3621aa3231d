use super::{Service, ServiceContext, reply, unknown_operation};
use crate::credentials::{self, InboundCall};
use crate::errors::BridgeFault;
use crate::request::OutboundRequest;
use async_trait::async_trait;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
struct ReadyStatus {
    ready: bool,
}

/// Identifier and display name of one archival unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IdNamePair {
    pub id: String,
    pub name: String,
}

/// Readiness of the archive daemon and the list of its AUs.
///
/// Both operations read the configuration backend:
/// `GET /status` answers `{"ready": true}` and `GET /aus` answers
/// `[{"id": "...", "name": "..."}]`.
pub struct DaemonStatusService {
    context: ServiceContext,
}

impl DaemonStatusService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Backend faults are reported as faults, never as `false`.
    pub async fn is_daemon_ready(&self, call: &InboundCall) -> Result<bool, BridgeFault> {
        let creds = credentials::extract(call)?;
        let request =
            OutboundRequest::builder(Method::GET, &self.context.configuration(), "/status")
                .credentials(&creds)
                .build()?;

        let status: ReadyStatus = self.context.client().execute_json(request).await?;
        Ok(status.ready)
    }

    pub async fn get_au_ids(&self, call: &InboundCall) -> Result<Vec<IdNamePair>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let request = OutboundRequest::builder(Method::GET, &self.context.configuration(), "/aus")
            .credentials(&creds)
            .build()?;

        self.context.client().execute_json(request).await
    }
}

#[async_trait]
impl Service for DaemonStatusService {
    fn name(&self) -> &'static str {
        "DaemonStatusService"
    }

    async fn invoke(&self, call: &InboundCall, _args: Value) -> Result<Value, BridgeFault> {
        match call.operation.as_str() {
            "isDaemonReady" => reply(self.is_daemon_ready(call).await?),
            "getAuIds" => reply(self.get_au_ids(call).await?),
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}
