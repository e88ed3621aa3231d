use super::{
    AuIdArgs, AuIdListArgs, Service, ServiceContext, item_message, parse_args, reply, require_ids,
    unknown_operation,
};
use crate::credentials::{self, ForwardedCredentials, InboundCall};
use crate::errors::BridgeFault;
use crate::request::OutboundRequest;
use async_trait::async_trait;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Adds, deletes, deactivates and reactivates archival units through the
/// configuration backend.
pub struct ContentConfigurationService {
    context: ServiceContext,
}

/// Outcome of a configuration change on one AU.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentConfigurationResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuConfiguration {
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Add,
    Delete,
    Deactivate,
    Reactivate,
}

impl Change {
    fn verb(self) -> &'static str {
        match self {
            Change::Add => "add",
            Change::Delete => "delete",
            Change::Deactivate => "deactivate",
            Change::Reactivate => "reactivate",
        }
    }
}

impl ContentConfigurationService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub async fn add_au_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<ContentConfigurationResult, BridgeFault> {
        self.apply_one(call, au_id, Change::Add).await
    }

    pub async fn add_aus_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
    ) -> Result<Vec<ContentConfigurationResult>, BridgeFault> {
        self.apply_list(call, au_ids, Change::Add).await
    }

    pub async fn delete_au_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<ContentConfigurationResult, BridgeFault> {
        self.apply_one(call, au_id, Change::Delete).await
    }

    pub async fn delete_aus_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
    ) -> Result<Vec<ContentConfigurationResult>, BridgeFault> {
        self.apply_list(call, au_ids, Change::Delete).await
    }

    pub async fn deactivate_au_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<ContentConfigurationResult, BridgeFault> {
        self.apply_one(call, au_id, Change::Deactivate).await
    }

    pub async fn deactivate_aus_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
    ) -> Result<Vec<ContentConfigurationResult>, BridgeFault> {
        self.apply_list(call, au_ids, Change::Deactivate).await
    }

    pub async fn reactivate_au_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<ContentConfigurationResult, BridgeFault> {
        self.apply_one(call, au_id, Change::Reactivate).await
    }

    pub async fn reactivate_aus_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
    ) -> Result<Vec<ContentConfigurationResult>, BridgeFault> {
        self.apply_list(call, au_ids, Change::Reactivate).await
    }

    async fn apply_one(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
        change: Change,
    ) -> Result<ContentConfigurationResult, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;
        Ok(self.apply(&creds, au_id.to_string(), change).await)
    }

    async fn apply_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
        change: Change,
    ) -> Result<Vec<ContentConfigurationResult>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_ids = require_ids("auIds", au_ids)?;
        Ok(self
            .context
            .fan_out(au_ids, |id| self.apply(&creds, id, change))
            .await)
    }

    async fn apply(
        &self,
        creds: &ForwardedCredentials,
        au_id: String,
        change: Change,
    ) -> ContentConfigurationResult {
        let endpoint = self.context.configuration();
        let result = async {
            let builder = match change {
                Change::Add => OutboundRequest::builder(Method::PUT, &endpoint, "/aus/{auid}"),
                Change::Delete => OutboundRequest::builder(Method::DELETE, &endpoint, "/aus/{auid}"),
                Change::Deactivate => {
                    OutboundRequest::builder(Method::PUT, &endpoint, "/aus/{auid}/state")
                        .json(&json!({"active": false}))
                }
                Change::Reactivate => {
                    OutboundRequest::builder(Method::PUT, &endpoint, "/aus/{auid}/state")
                        .json(&json!({"active": true}))
                }
            };
            let request = builder
                .path_var("auid", au_id.as_str())
                .credentials(creds)
                .build()?;

            let response = self.context.client().execute(request).await?;
            if change == Change::Add {
                Ok::<_, BridgeFault>(response.json::<AuConfiguration>()?.name)
            } else {
                Ok(None)
            }
        }
        .await;

        match result {
            Ok(name) => ContentConfigurationResult {
                id: au_id,
                name,
                success: true,
                message: None,
            },
            Err(fault) => {
                tracing::warn!(au_id = %au_id, error = %fault, "Failed to {} AU", change.verb());
                ContentConfigurationResult {
                    message: Some(item_message(&fault)),
                    id: au_id,
                    name: None,
                    success: false,
                }
            }
        }
    }
}

#[async_trait]
impl Service for ContentConfigurationService {
    fn name(&self) -> &'static str {
        "ContentConfigurationService"
    }

    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault> {
        let operation = call.operation.as_str();
        let change = match operation {
            "addAuById" | "addAusByIdList" => Change::Add,
            "deleteAuById" | "deleteAusByIdList" => Change::Delete,
            "deactivateAuById" | "deactivateAusByIdList" => Change::Deactivate,
            "reactivateAuById" | "reactivateAusByIdList" => Change::Reactivate,
            other => return Err(unknown_operation(self.name(), other)),
        };

        if operation.ends_with("ByIdList") {
            let args: AuIdListArgs = parse_args(operation, args)?;
            reply(self.apply_list(call, args.au_ids, change).await?)
        } else {
            let args: AuIdArgs = parse_args(operation, args)?;
            reply(self.apply_one(call, args.au_id.as_deref(), change).await?)
        }
    }
}
