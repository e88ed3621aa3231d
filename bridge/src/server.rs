//! JSON envelope front-end.
//!
//! `POST /ws/{service}/{operation}` with a JSON object of arguments. The
//! reply is `{"result": ...}` with status 200, or
//! `{"fault": {"code": ..., "message": ...}}` with status 500.

use crate::credentials::{CallContext, InboundCall};
use crate::errors::{BridgeError, BridgeFault};
use crate::metrics_defs::{CALL_DURATION, CALLS_INFLIGHT};
use crate::services::Service;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service as HyperService;
use serde_json::{Value, json};
use shared::http::{PeerAddr, make_error_response};
use shared::{gauge, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const ENVELOPE_PREFIX: &str = "/ws/";

/// Routes envelope calls to the registered services by name.
#[derive(Clone)]
pub struct EnvelopeService {
    services: Arc<HashMap<&'static str, Arc<dyn Service>>>,
    max_body_bytes: usize,
}

impl EnvelopeService {
    /// Bodies longer than `max_body_bytes` are refused with 413.
    pub fn new(services: Vec<Arc<dyn Service>>, max_body_bytes: usize) -> Self {
        let services = services.into_iter().map(|s| (s.name(), s)).collect();
        Self {
            services: Arc::new(services),
            max_body_bytes,
        }
    }

    /// Handles one HTTP request. Transport-level problems (wrong method,
    /// unknown path, unreadable body) are plain HTTP errors; everything after
    /// that is an envelope reply.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some((service, operation)) = parse_path(request.uri().path()) else {
            return make_error_response(StatusCode::NOT_FOUND);
        };
        if request.method() != Method::POST {
            return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }
        let (service, operation) = (service.to_string(), operation.to_string());

        let context = CallContext {
            authorization: request
                .headers()
                .get(AUTHORIZATION)
                .map(|v| v.as_bytes().to_vec()),
            origin_ip: request
                .extensions()
                .get::<PeerAddr>()
                .map(|peer| peer.0.ip().to_string()),
        };

        let body = match Limited::new(request.into_body(), self.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                tracing::debug!(limit = self.max_body_bytes, "Envelope body too large");
                return make_error_response(StatusCode::PAYLOAD_TOO_LARGE);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read envelope body");
                return make_error_response(StatusCode::BAD_REQUEST);
            }
        };

        let call = InboundCall::new(service, operation, context);
        let outcome = self.dispatch(&call, &body).await;
        envelope_response(&call, outcome)
    }

    async fn dispatch(&self, call: &InboundCall, body: &[u8]) -> Result<Value, BridgeFault> {
        let args = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(body).map_err(|e| {
                BridgeFault::caller_argument(format!("Envelope body is not valid JSON: {e}"))
            })?
        };

        let Some(service) = self.services.get(call.service.as_str()) else {
            return Err(BridgeFault::caller_argument(format!(
                "Unknown service '{}'",
                call.service
            )));
        };

        let _inflight = InflightGuard::new();
        let start = Instant::now();
        let outcome = service.invoke(call, args).await;

        let label = match &outcome {
            Ok(_) => "success",
            Err(fault) => fault.kind().as_str(),
        };
        histogram!(CALL_DURATION, "service" => service.name(), "outcome" => label)
            .record(start.elapsed().as_secs_f64());
        outcome
    }
}

fn parse_path(path: &str) -> Option<(&str, &str)> {
    let (service, operation) = path.strip_prefix(ENVELOPE_PREFIX)?.split_once('/')?;
    let operation = operation.trim_end_matches('/');
    if service.is_empty() || operation.is_empty() || operation.contains('/') {
        return None;
    }
    Some((service, operation))
}

fn envelope_response(call: &InboundCall, outcome: Result<Value, BridgeFault>) -> Response<Bytes> {
    let (status, body) = match outcome {
        Ok(result) => {
            tracing::debug!(service = %call.service, operation = %call.operation, "Call succeeded");
            (StatusCode::OK, json!({ "result": result }))
        }
        Err(fault) => {
            match &fault {
                BridgeFault::CallerArgument(_) => tracing::debug!(
                    service = %call.service,
                    operation = %call.operation,
                    error = %fault,
                    "Call rejected"
                ),
                _ => tracing::warn!(
                    service = %call.service,
                    operation = %call.operation,
                    error = %fault,
                    "Call failed"
                ),
            }
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "fault": { "code": fault.kind().as_str(), "message": fault.message() } }),
            )
        }
    };

    let mut response = Response::new(Bytes::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Counts a call as in flight until dropped.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(CALLS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(CALLS_INFLIGHT).decrement(1.0);
    }
}

impl HyperService<Request<Incoming>> for EnvelopeService {
    type Response = Response<BoxBody<Bytes, BridgeError>>;
    type Error = BridgeError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let response = service.handle(req).await;
            Ok(response.map(|body| Full::new(body).map_err(|e| match e {}).boxed()))
        })
    }
}
