use super::{
    OperationResult, Service, ServiceContext, item_message, parse_args, reply, require_ids,
    unknown_operation,
};
use crate::credentials::{self, ForwardedCredentials, InboundCall};
use crate::errors::BridgeFault;
use crate::request::OutboundRequest;
use async_trait::async_trait;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Crawl, poll and substance checks on archival units.
///
/// Every operation comes in a single-id and an id-list flavor; the list
/// flavor issues one backend call per id and reports each outcome on its
/// own.
///
/// Backends:
/// - `POST {poller}/aus/{auid}/substance` → `{"substance": "Yes"}`
/// - `POST {crawler}/crawls` with `{"auId", "crawlKind", "priority",
///   "forceCrawl", "crawlDepth"}` → `{"accepted": true, "errorMessage": null}`
/// - `PUT {poller}/polls/{auid}`
pub struct AuControlService {
    context: ServiceContext,
}

/// Substance check outcome for one AU.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubstanceResult {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Crawl options shared by the crawl operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlOptions {
    pub priority: Option<i32>,
    pub force: bool,
    /// Set only for deep crawls.
    pub depth: Option<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlRequest<'a> {
    au_id: &'a str,
    crawl_kind: &'static str,
    priority: Option<i32>,
    force_crawl: bool,
    crawl_depth: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrawlResponse {
    accepted: bool,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct SubstanceResponse {
    substance: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ControlArgs {
    au_id: Option<String>,
    au_ids: Option<Vec<String>>,
    priority: Option<i32>,
    #[serde(default)]
    force: bool,
    depth: Option<i32>,
}

impl AuControlService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub async fn check_substance_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<SubstanceResult, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;
        Ok(self.check_substance(&creds, au_id.to_string()).await)
    }

    pub async fn check_substance_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
    ) -> Result<Vec<SubstanceResult>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_ids = require_ids("auIds", au_ids)?;
        Ok(self
            .context
            .fan_out(au_ids, |id| self.check_substance(&creds, id))
            .await)
    }

    async fn check_substance(&self, creds: &ForwardedCredentials, au_id: String) -> SubstanceResult {
        let result = async {
            let request = OutboundRequest::builder(
                Method::POST,
                &self.context.poller(),
                "/aus/{auid}/substance",
            )
            .path_var("auid", au_id.as_str())
            .credentials(creds)
            .build()?;
            self.context
                .client()
                .execute_json::<SubstanceResponse>(request)
                .await
        }
        .await;

        match result {
            Ok(response) => SubstanceResult {
                id: au_id,
                success: true,
                substance: response.substance,
                message: None,
            },
            Err(fault) => {
                tracing::warn!(au_id = %au_id, error = %fault, "Substance check failed");
                SubstanceResult {
                    message: Some(item_message(&fault)),
                    id: au_id,
                    success: false,
                    substance: None,
                }
            }
        }
    }

    pub async fn request_crawl_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
        options: CrawlOptions,
    ) -> Result<OperationResult, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;
        Ok(self.request_crawl(&creds, au_id.to_string(), options).await)
    }

    pub async fn request_crawl_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
        options: CrawlOptions,
    ) -> Result<Vec<OperationResult>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_ids = require_ids("auIds", au_ids)?;
        Ok(self
            .context
            .fan_out(au_ids, |id| self.request_crawl(&creds, id, options))
            .await)
    }

    /// Like [`request_crawl_by_id`](Self::request_crawl_by_id) with a crawl
    /// depth, which must be positive.
    pub async fn request_deep_crawl_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
        depth: Option<i32>,
        options: CrawlOptions,
    ) -> Result<OperationResult, BridgeFault> {
        let options = deep_crawl_options(depth, options)?;
        self.request_crawl_by_id(call, au_id, options).await
    }

    pub async fn request_deep_crawl_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
        depth: Option<i32>,
        options: CrawlOptions,
    ) -> Result<Vec<OperationResult>, BridgeFault> {
        let options = deep_crawl_options(depth, options)?;
        self.request_crawl_by_id_list(call, au_ids, options).await
    }

    async fn request_crawl(
        &self,
        creds: &ForwardedCredentials,
        au_id: String,
        options: CrawlOptions,
    ) -> OperationResult {
        let body = CrawlRequest {
            au_id: &au_id,
            crawl_kind: "newContent",
            priority: options.priority,
            force_crawl: options.force,
            crawl_depth: options.depth,
        };
        let result = async {
            let request = OutboundRequest::builder(Method::POST, &self.context.crawler(), "/crawls")
                .credentials(creds)
                .json(&body)
                .build()?;
            self.context
                .client()
                .execute_json::<CrawlResponse>(request)
                .await
        }
        .await;

        match result {
            Ok(CrawlResponse { accepted: true, .. }) => OperationResult::succeeded(au_id),
            Ok(CrawlResponse { error_message, .. }) => OperationResult::failed(
                au_id,
                error_message.unwrap_or_else(|| "Crawl request was not accepted".to_string()),
            ),
            Err(fault) => OperationResult::from_fault(au_id, &fault),
        }
    }

    pub async fn request_poll_by_id(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
    ) -> Result<OperationResult, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;
        Ok(self.request_poll(&creds, au_id.to_string()).await)
    }

    pub async fn request_poll_by_id_list(
        &self,
        call: &InboundCall,
        au_ids: Option<Vec<String>>,
    ) -> Result<Vec<OperationResult>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_ids = require_ids("auIds", au_ids)?;
        Ok(self
            .context
            .fan_out(au_ids, |id| self.request_poll(&creds, id))
            .await)
    }

    async fn request_poll(&self, creds: &ForwardedCredentials, au_id: String) -> OperationResult {
        let result = async {
            let request =
                OutboundRequest::builder(Method::PUT, &self.context.poller(), "/polls/{auid}")
                    .path_var("auid", au_id.as_str())
                    .credentials(creds)
                    .build()?;
            self.context.client().execute(request).await
        }
        .await;

        match result {
            Ok(_) => OperationResult::succeeded(au_id),
            Err(fault) => OperationResult::from_fault(au_id, &fault),
        }
    }
}

fn deep_crawl_options(depth: Option<i32>, options: CrawlOptions) -> Result<CrawlOptions, BridgeFault> {
    match depth {
        Some(depth) if depth > 0 => Ok(CrawlOptions {
            depth: Some(depth),
            ..options
        }),
        Some(depth) => Err(BridgeFault::caller_argument(format!(
            "Invalid crawl depth {depth}: must be greater than zero"
        ))),
        None => Err(BridgeFault::caller_argument("Missing required argument 'depth'")),
    }
}

#[async_trait]
impl Service for AuControlService {
    fn name(&self) -> &'static str {
        "AuControlService"
    }

    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault> {
        let args: ControlArgs = parse_args(&call.operation, args)?;
        let options = CrawlOptions {
            priority: args.priority,
            force: args.force,
            depth: None,
        };
        let au_id = args.au_id.as_deref();

        match call.operation.as_str() {
            "checkSubstanceById" => reply(self.check_substance_by_id(call, au_id).await?),
            "checkSubstanceByIdList" => {
                reply(self.check_substance_by_id_list(call, args.au_ids).await?)
            }
            "requestCrawlById" => reply(self.request_crawl_by_id(call, au_id, options).await?),
            "requestCrawlByIdList" => {
                reply(self.request_crawl_by_id_list(call, args.au_ids, options).await?)
            }
            "requestDeepCrawlById" => reply(
                self.request_deep_crawl_by_id(call, au_id, args.depth, options)
                    .await?,
            ),
            "requestDeepCrawlByIdList" => reply(
                self.request_deep_crawl_by_id_list(call, args.au_ids, args.depth, options)
                    .await?,
            ),
            "requestPollById" => reply(self.request_poll_by_id(call, au_id).await?),
            "requestPollByIdList" => reply(self.request_poll_by_id_list(call, args.au_ids).await?),
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}
