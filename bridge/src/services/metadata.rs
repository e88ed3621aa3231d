use super::{
    NO_SUCH_AU, OperationResult, Service, ServiceContext, absent_on_404, not_found_as, parse_args,
    reply, require_ids, unknown_operation,
};
use crate::credentials::{self, ForwardedCredentials, InboundCall};
use crate::errors::BridgeFault;
use crate::request::OutboundRequest;
use async_trait::async_trait;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Article metadata of archival units.
///
/// Reindexing goes to the metadata extractor (`POST /mdupdates`), lookups to
/// the metadata query service (`GET /metadata/aus/{auid}`,
/// `GET /urls/doi?doi=...`).
pub struct MetadataService {
    context: ServiceContext,
}

#[derive(Serialize)]
struct MetadataUpdate<'a> {
    auid: &'a str,
    #[serde(rename = "updateType")]
    update_type: &'static str,
}

#[derive(Deserialize)]
struct DoiUrls {
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MetadataArgs {
    au_id: Option<String>,
    au_ids: Option<Vec<String>>,
    doi: Option<String>,
}

impl MetadataService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub async fn reindex_metadata_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<OperationResult, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;
        Ok(self.reindex(&creds, au_id.to_string()).await)
    }

    pub async fn reindex_metadata_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
    ) -> Result<Vec<OperationResult>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_ids = require_ids("auIds", au_ids)?;
        Ok(self
            .context
            .fan_out(au_ids, |id| self.reindex(&creds, id))
            .await)
    }

    async fn reindex(&self, creds: &ForwardedCredentials, au_id: String) -> OperationResult {
        let body = MetadataUpdate {
            auid: &au_id,
            update_type: "full_extraction",
        };
        let result = async {
            let request =
                OutboundRequest::builder(Method::POST, &self.context.metadata_extractor(), "/mdupdates")
                    .credentials(creds)
                    .json(&body)
                    .build()?;
            self.context.client().execute(request).await
        }
        .await;

        match result {
            Ok(_) => OperationResult::succeeded(au_id),
            Err(fault) => OperationResult::from_fault(au_id, &fault),
        }
    }

    /// A 404 is a fault.
    pub async fn get_au_metadata(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<Map<String, Value>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;

        let request = OutboundRequest::builder(
            Method::GET,
            &self.context.metadata_query(),
            "/metadata/aus/{auid}",
        )
        .path_var("auid", au_id)
        .credentials(&creds)
        .build()?;

        self.context
            .client()
            .execute_json(request)
            .await
            .map_err(|e| not_found_as(e, NO_SUCH_AU))
    }

    /// URLs of the articles with this DOI; empty when there is none.
    pub async fn get_urls_for_doi(
        &self,
        call: &InboundCall,
        doi: Option<&str>,
    ) -> Result<Vec<String>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let doi = BridgeFault::require("doi", doi)?;

        let request = OutboundRequest::builder(Method::GET, &self.context.metadata_query(), "/urls/doi")
            .query("doi", doi)
            .credentials(&creds)
            .build()?;

        let found = absent_on_404(self.context.client().execute_json::<DoiUrls>(request).await)?;
        Ok(found.map(|d| d.urls).unwrap_or_default())
    }
}

#[async_trait]
impl Service for MetadataService {
    fn name(&self) -> &'static str {
        "MetadataService"
    }

    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault> {
        let args: MetadataArgs = parse_args(&call.operation, args)?;
        let au_id = args.au_id.as_deref();

        match call.operation.as_str() {
            "reindexMetadataById" => reply(self.reindex_metadata_by_id(call, au_id).await?),
            "reindexMetadataByIdList" => {
                reply(self.reindex_metadata_by_id_list(call, args.au_ids).await?)
            }
            "getAuMetadata" => reply(self.get_au_metadata(call, au_id).await?),
            "getUrlsForDoi" => reply(self.get_urls_for_doi(call, args.doi.as_deref()).await?),
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}
