//! Unary call executor over the shared HTTP client.

use crate::config::Timeouts;
use crate::errors::{BODY_SNIPPET_LIMIT, BridgeFault, snippet};
use crate::metrics_defs::{BACKEND_REQUEST_DURATION, BACKEND_REQUESTS};
use crate::request::{BackendRole, OutboundRequest, RequestBody};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use shared::{counter, histogram};
use std::error::Error as _;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Handle to the shared connection pool.
///
/// Constructed once at startup and cloned into every handler. Clones share the
/// pool. Nothing per-call is stored here: the read timeout of each request is
/// carried by the request itself.
#[derive(Clone, Debug)]
pub struct BridgeClient {
    http: reqwest::Client,
    read_timeout: Duration,
    long_read_timeout: Duration,
}

/// Body of an upload together with its progress marker.
pub(crate) struct Upload {
    pub form: reqwest::multipart::Form,
    pub progress: Progress,
}

/// Time of the last observed transfer activity of one exchange.
///
/// Clones share the marker. The wait for a response is measured from the
/// latest activity, so a slow but steady upload is not cut off.
#[derive(Clone, Debug)]
pub(crate) struct Progress {
    start: Instant,
    last_millis: Arc<AtomicU64>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn touch(&self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(now, Ordering::Relaxed);
    }

    fn quiet_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.start.elapsed().saturating_sub(last)
    }
}

impl BridgeClient {
    pub fn new(timeouts: &Timeouts) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .build()?;

        Ok(Self {
            http,
            read_timeout: timeouts.read(),
            long_read_timeout: timeouts.long_read(),
        })
    }

    /// Read timeout for long-running synchronous backend computations.
    pub fn long_read_timeout(&self) -> Duration {
        self.long_read_timeout
    }

    /// Idle bound that applies to `request`.
    pub(crate) fn read_timeout_of(&self, request: &OutboundRequest) -> Duration {
        request.read_timeout().unwrap_or(self.read_timeout)
    }

    /// Sends one request and returns the full response body.
    ///
    /// Non-2xx statuses come back as [`BridgeFault::Status`]; exactly one
    /// HTTP request is issued and nothing is retried.
    pub async fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, BridgeFault> {
        let role = request.role();
        let idle = self.read_timeout_of(&request);
        let response = self.send(request, None).await?;
        OutboundResponse::read(role, response, idle).await
    }

    /// Like [`execute`](Self::execute), decoding the 2xx body as JSON.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: OutboundRequest,
    ) -> Result<T, BridgeFault> {
        self.execute(request).await?.json()
    }

    /// Sends one request and hands back the body unread.
    pub async fn stream(&self, request: OutboundRequest) -> Result<StreamingResponse, BridgeFault> {
        let role = request.role();
        let idle = self.read_timeout_of(&request);
        let response = self.send(request, None).await?;
        Ok(StreamingResponse {
            role,
            idle,
            response,
        })
    }

    /// Issues the request and waits for the response head.
    ///
    /// The read timeout bounds the wait since the last upload activity. Body
    /// reads are bounded by the caller with [`idle_bounded`]. A request
    /// deadline additionally caps the whole exchange.
    pub(crate) async fn send(
        &self,
        request: OutboundRequest,
        upload: Option<Upload>,
    ) -> Result<reqwest::Response, BridgeFault> {
        let role = request.role();
        let idle = self.read_timeout_of(&request);
        let deadline = request.deadline();
        let (method, url, headers, body) = request.into_parts();

        tracing::debug!(backend = %role, method = %method, url = %url, "Sending backend request");

        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }

        let (builder, progress) = match (body, upload) {
            (RequestBody::Empty, None) => (builder, Progress::new()),
            (RequestBody::Json(bytes), None) => (builder.body(bytes), Progress::new()),
            (RequestBody::Empty, Some(upload)) => (builder.multipart(upload.form), upload.progress),
            (RequestBody::Json(_), Some(_)) => {
                return Err(BridgeFault::caller_argument(
                    "A multipart request cannot also carry a JSON body",
                ));
            }
        };

        let start = Instant::now();
        let result = match within_idle(builder.send(), idle, &progress).await {
            Some(result) => result.map_err(|e| classify(role, &e)),
            None => Err(idle_timeout(role, idle)),
        };
        let elapsed = start.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => response,
            Err(fault) => {
                record(role, fault_outcome(&fault), elapsed);
                tracing::warn!(backend = %role, error = %fault, "Backend request failed");
                return Err(fault);
            }
        };

        let status = response.status();
        if status.is_success() {
            record(role, "success", elapsed);
            return Ok(response);
        }

        let fault = status_fault(role, response, idle).await;
        record(role, "non-2xx-status", elapsed);
        tracing::warn!(backend = %role, status = %status, "Backend returned non-success status");
        Err(fault)
    }
}

/// Runs `fut` until it completes or `progress` has been quiet for `idle`.
async fn within_idle<F: Future>(fut: F, idle: Duration, progress: &Progress) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        let remaining = idle.saturating_sub(progress.quiet_for());
        if remaining.is_zero() {
            return None;
        }
        tokio::select! {
            output = &mut fut => return Some(output),
            _ = tokio::time::sleep(remaining) => {}
        }
    }
}

fn idle_timeout(role: BackendRole, idle: Duration) -> BridgeFault {
    BridgeFault::Timeout {
        target: role.to_string(),
        message: format!("no data received for {}ms", idle.as_millis()),
    }
}

/// Body chunks of `response`, failing with a timeout when the backend sends
/// nothing for `idle`.
pub(crate) fn idle_bounded(
    role: BackendRole,
    response: reqwest::Response,
    idle: Duration,
) -> impl Stream<Item = Result<Bytes, BridgeFault>> + Send + 'static {
    let chunks = Box::pin(response.bytes_stream());
    futures::stream::unfold(Some(chunks), move |state| async move {
        let mut chunks = state?;
        match tokio::time::timeout(idle, chunks.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(chunks))),
            Ok(Some(Err(e))) => Some((Err(classify(role, &e)), None)),
            Ok(None) => None,
            Err(_) => Some((Err(idle_timeout(role, idle)), None)),
        }
    })
}

fn fault_outcome(fault: &BridgeFault) -> &'static str {
    fault.kind().as_str()
}

fn record(role: BackendRole, outcome: &'static str, elapsed_secs: f64) {
    counter!(BACKEND_REQUESTS, "backend" => role.as_str(), "outcome" => outcome).increment(1);
    histogram!(BACKEND_REQUEST_DURATION, "backend" => role.as_str(), "outcome" => outcome)
        .record(elapsed_secs);
}

/// Maps a client error into the fault taxonomy.
pub(crate) fn classify(role: BackendRole, err: &reqwest::Error) -> BridgeFault {
    let target = role.to_string();
    let message = error_chain(err);

    if err.is_timeout() {
        BridgeFault::Timeout { target, message }
    } else if err.is_decode() {
        BridgeFault::MalformedBody { target, message }
    } else if err.is_builder() {
        BridgeFault::CallerArgument(format!("Invalid request for {target}: {message}"))
    } else {
        BridgeFault::Network { target, message }
    }
}

/// Renders an error with its sources, e.g. "error sending request: connection refused".
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Turns a non-2xx response into a status fault, reading no more of the
/// error body than fits in a diagnostic snippet.
async fn status_fault(role: BackendRole, response: reqwest::Response, idle: Duration) -> BridgeFault {
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // The status is what matters; an unreadable error body only loses detail.
    let mut head = BytesMut::new();
    let chunks = idle_bounded(role, response, idle);
    futures::pin_mut!(chunks);
    while head.len() <= BODY_SNIPPET_LIMIT {
        match chunks.next().await {
            Some(Ok(chunk)) => head.extend_from_slice(&chunk),
            _ => break,
        }
    }

    BridgeFault::Status {
        target: role.to_string(),
        status,
        body: diagnostic_text(content_type.as_deref(), &String::from_utf8_lossy(&head)),
    }
}

/// Extracts the human-readable part of a backend error body.
///
/// JSON error objects contribute their `message`, `errorMessage` or `error`
/// field; anything else is kept as a bounded snippet.
pub(crate) fn diagnostic_text(content_type: Option<&str>, body: &str) -> String {
    let is_json = content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON));

    if is_json && let Ok(serde_json::Value::Object(fields)) = serde_json::from_str(body) {
        for key in ["message", "errorMessage", "error"] {
            if let Some(serde_json::Value::String(text)) = fields.get(key) {
                return snippet(text);
            }
        }
    }

    snippet(body)
}

/// A fully read 2xx backend response.
#[derive(Debug)]
pub struct OutboundResponse {
    role: BackendRole,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl OutboundResponse {
    pub(crate) async fn read(
        role: BackendRole,
        response: reqwest::Response,
        idle: Duration,
    ) -> Result<Self, BridgeFault> {
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();

        let mut body = BytesMut::new();
        let chunks = idle_bounded(role, response, idle);
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk?);
        }

        Ok(Self {
            role,
            status,
            version,
            headers,
            body: body.freeze(),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (HeaderMap, Bytes) {
        (self.headers, self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BridgeFault> {
        serde_json::from_slice(&self.body).map_err(|e| BridgeFault::MalformedBody {
            target: self.role.to_string(),
            message: e.to_string(),
        })
    }
}

/// A 2xx backend response whose body has not been read yet.
///
/// Dropping it releases the connection.
#[derive(Debug)]
pub struct StreamingResponse {
    role: BackendRole,
    idle: Duration,
    response: reqwest::Response,
}

impl StreamingResponse {
    pub fn version(&self) -> Version {
        self.response.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Length announced by the backend, if any. Informational only.
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Body chunks; a gap longer than the read timeout ends it with a
    /// timeout fault.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, BridgeFault>> + Send + 'static {
        idle_bounded(self.role, self.response, self.idle)
    }
}
