use super::{Service, ServiceContext, absent_on_404, not_found_as, parse_args, reply, unknown_operation};
use crate::credentials::{self, ForwardedCredentials, InboundCall};
use crate::errors::BridgeFault;
use crate::request::{OutboundRequest, OutboundRequestBuilder};
use async_trait::async_trait;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const NO_SUCH_HASH_REQUEST: &str = "No hashing request with provided identifier";

/// Content hashing on the poller.
///
/// `POST {poller}/hashes?asynchronous=false` runs the hash while the caller
/// waits and can take hours, so it gets the long read timeout. The
/// asynchronous flavor returns a request id to poll with
/// `GET /hashes/{requestid}` and release with `DELETE /hashes/{requestid}`.
pub struct HasherService {
    context: ServiceContext,
}

/// Result of removing an asynchronous hash request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemovedHashRequest {
    pub request_id: String,
    pub status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsynchronousHashAccepted {
    request_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HashRequestState {
    request_status: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct HasherArgs {
    params: Option<Map<String, Value>>,
    request_id: Option<String>,
}

impl HasherService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Hashes synchronously and returns the poller's result object.
    pub async fn hash(
        &self,
        call: &InboundCall,
        params: Option<&Map<String, Value>>,
    ) -> Result<Map<String, Value>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let params = require_params(params)?;

        let long_read = self.context.client().long_read_timeout();
        let request = hash_request(&self.context, &creds, params, false)
            .read_timeout(long_read)
            .deadline(long_read)
            .build()?;
        self.context.client().execute_json(request).await
    }

    /// Starts a hash in the background and returns its request id.
    pub async fn hash_asynchronously(
        &self,
        call: &InboundCall,
        params: Option<&Map<String, Value>>,
    ) -> Result<String, BridgeFault> {
        let creds = credentials::extract(call)?;
        let params = require_params(params)?;

        let request = hash_request(&self.context, &creds, params, true).build()?;
        let accepted: AsynchronousHashAccepted = self.context.client().execute_json(request).await?;
        tracing::debug!(request_id = %accepted.request_id, "Asynchronous hash started");
        Ok(accepted.request_id)
    }

    pub async fn get_asynchronous_hash_result(
        &self,
        call: &InboundCall,
        request_id: Option<&str>,
    ) -> Result<Map<String, Value>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let request_id = BridgeFault::require("requestId", request_id)?;

        let request = self.request_for(Method::GET, &creds, request_id)?;
        self.context
            .client()
            .execute_json(request)
            .await
            .map_err(|e| not_found_as(e, NO_SUCH_HASH_REQUEST))
    }

    /// Releases an asynchronous hash. An unknown id is reported with status
    /// `NotFound` rather than a fault.
    pub async fn remove_asynchronous_hash_request(
        &self,
        call: &InboundCall,
        request_id: Option<&str>,
    ) -> Result<RemovedHashRequest, BridgeFault> {
        let creds = credentials::extract(call)?;
        let request_id = BridgeFault::require("requestId", request_id)?;

        let request = self.request_for(Method::DELETE, &creds, request_id)?;
        let response = absent_on_404(self.context.client().execute(request).await)?;

        let status = match response {
            None => "NotFound".to_string(),
            Some(response) if response.body().is_empty() => "Deleted".to_string(),
            Some(response) => response
                .json::<HashRequestState>()?
                .request_status
                .unwrap_or_else(|| "Deleted".to_string()),
        };

        Ok(RemovedHashRequest {
            request_id: request_id.to_string(),
            status,
        })
    }

    fn request_for(
        &self,
        method: Method,
        creds: &ForwardedCredentials,
        request_id: &str,
    ) -> Result<OutboundRequest, BridgeFault> {
        OutboundRequest::builder(method, &self.context.poller(), "/hashes/{requestid}")
            .path_var("requestid", request_id)
            .credentials(creds)
            .build()
    }
}

fn require_params(params: Option<&Map<String, Value>>) -> Result<&Map<String, Value>, BridgeFault> {
    params.ok_or_else(|| BridgeFault::caller_argument("Missing required argument 'params'"))
}

fn hash_request(
    context: &ServiceContext,
    creds: &ForwardedCredentials,
    params: &Map<String, Value>,
    asynchronous: bool,
) -> OutboundRequestBuilder {
    OutboundRequest::builder(Method::POST, &context.poller(), "/hashes")
        .query("asynchronous", asynchronous.to_string())
        .credentials(creds)
        .json(params)
}

#[async_trait]
impl Service for HasherService {
    fn name(&self) -> &'static str {
        "HasherService"
    }

    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault> {
        let args: HasherArgs = parse_args(&call.operation, args)?;
        let request_id = args.request_id.as_deref();

        match call.operation.as_str() {
            "hash" => reply(self.hash(call, args.params.as_ref()).await?),
            "hashAsynchronously" => reply(self.hash_asynchronously(call, args.params.as_ref()).await?),
            "getAsynchronousHashResult" => {
                reply(self.get_asynchronous_hash_result(call, request_id).await?)
            }
            "removeAsynchronousHashRequest" => {
                reply(self.remove_asynchronous_hash_request(call, request_id).await?)
            }
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}
