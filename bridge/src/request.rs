//! Outbound request construction.
//!
//! An [`OutboundRequest`] is an immutable value produced in one pass by
//! [`OutboundRequestBuilder`]. Path placeholders are resolved and validated
//! before the value exists, so an unresolved template can never reach the
//! wire.

use crate::credentials::{ForwardedCredentials, X_FORWARDED_FOR};
use crate::errors::BridgeFault;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const APPLICATION_JSON: &str = "application/json";

/// Role of the backend a request is addressed to. Used for labels only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendRole {
    Repository,
    Configuration,
    Poller,
    Crawler,
    MetadataExtractor,
    MetadataQuery,
    /// A third-party source, e.g. the origin of a pulled import
    External,
}

impl BackendRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BackendRole::Repository => "repository",
            BackendRole::Configuration => "configuration",
            BackendRole::Poller => "poller",
            BackendRole::Crawler => "crawler",
            BackendRole::MetadataExtractor => "metadata_extractor",
            BackendRole::MetadataQuery => "metadata_query",
            BackendRole::External => "external",
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend base URL together with its role.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    role: BackendRole,
    base_url: Url,
}

impl Endpoint {
    pub fn new(role: BackendRole, base_url: Url) -> Self {
        Self { role, base_url }
    }

    pub fn external(url: Url) -> Self {
        Self::new(BackendRole::External, url)
    }

    pub fn role(&self) -> BackendRole {
        self.role
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Empty,
    /// Serialized JSON document
    Json(Bytes),
}

/// A fully resolved request, ready for one of the call executors.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    role: BackendRole,
    read_timeout: Option<Duration>,
    deadline: Option<Duration>,
}

impl OutboundRequest {
    pub fn builder(
        method: Method,
        endpoint: &Endpoint,
        path_template: &str,
    ) -> OutboundRequestBuilder {
        OutboundRequestBuilder::new(method, endpoint, path_template)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn role(&self) -> BackendRole {
        self.role
    }

    /// Per-request read timeout, if the handler overrode the default. It
    /// bounds the wait for the response and every gap between body reads.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Bound on the whole exchange, body included, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub(crate) fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the same request with `name` set to `value`, replacing any
    /// previous value including forwarded ones.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub(crate) fn into_parts(self) -> (Method, Url, HeaderMap, RequestBody) {
        (self.method, self.url, self.headers, self.body)
    }
}

#[derive(Debug, PartialEq)]
enum PathSegment {
    Static(String),
    Param(String),
}

/// Splits a path template such as `/aus/{auid}/state` into segments.
/// A placeholder must occupy a whole segment.
fn parse_template(template: &str) -> Vec<PathSegment> {
    let normalized = template.trim().trim_matches('/');
    if normalized.is_empty() {
        return vec![];
    }

    normalized
        .split('/')
        .map(|s| {
            if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                PathSegment::Param(name.to_string())
            } else {
                PathSegment::Static(s.to_string())
            }
        })
        .collect()
}

/// Resolves every placeholder of `template` from `vars`.
///
/// Every placeholder needs a non-empty value and every variable must name a
/// placeholder; anything else is a caller error.
fn expand_template(
    template: &str,
    vars: &[(String, String)],
) -> Result<Vec<String>, BridgeFault> {
    let segments = parse_template(template);

    let mut seen = HashSet::new();
    for (name, _) in vars {
        if !seen.insert(name.as_str()) {
            return Err(BridgeFault::caller_argument(format!(
                "Path variable '{name}' is set more than once"
            )));
        }
        let known = segments
            .iter()
            .any(|s| matches!(s, PathSegment::Param(p) if p == name));
        if !known {
            return Err(BridgeFault::caller_argument(format!(
                "Path variable '{name}' does not match any placeholder in '{template}'"
            )));
        }
    }

    segments
        .into_iter()
        .map(|segment| match segment {
            PathSegment::Static(s) => Ok(s),
            PathSegment::Param(name) => match vars.iter().find(|(n, _)| *n == name) {
                Some((_, value)) if !value.is_empty() => Ok(value.clone()),
                Some(_) => Err(BridgeFault::caller_argument(format!(
                    "Path variable '{name}' is empty"
                ))),
                None => Err(BridgeFault::caller_argument(format!(
                    "Unresolved path placeholder '{{{name}}}' in '{template}'"
                ))),
            },
        })
        .collect()
}

/// Builder for [`OutboundRequest`].
///
/// Invalid input (bad header value, unserializable body) is captured and
/// reported by [`build`](OutboundRequestBuilder::build), so call sites can
/// chain freely.
#[must_use = "OutboundRequestBuilder does nothing until .build() is called"]
pub struct OutboundRequestBuilder {
    method: Method,
    endpoint: Endpoint,
    template: String,
    path_vars: Vec<(String, String)>,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    credentials: ForwardedCredentials,
    body: RequestBody,
    read_timeout: Option<Duration>,
    deadline: Option<Duration>,
    error: Option<BridgeFault>,
}

impl OutboundRequestBuilder {
    fn new(method: Method, endpoint: &Endpoint, path_template: &str) -> Self {
        Self {
            method,
            endpoint: endpoint.clone(),
            template: path_template.to_string(),
            path_vars: Vec::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            credentials: ForwardedCredentials::none(),
            body: RequestBody::Empty,
            read_timeout: None,
            deadline: None,
            error: None,
        }
    }

    pub fn path_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.path_vars.push((name.to_string(), value.into()));
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    /// Adds the query parameter only when a value is present.
    pub fn query_opt<V: Into<String>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    /// Sets a header. Headers set here take precedence over forwarded ones.
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => {
                self.error = Some(BridgeFault::caller_argument(format!(
                    "Invalid value for header '{name}'"
                )));
            }
        }
        self
    }

    pub fn credentials(mut self, credentials: &ForwardedCredentials) -> Self {
        self.credentials = credentials.clone();
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => self.body = RequestBody::Json(Bytes::from(bytes)),
            Err(e) => {
                self.error = Some(BridgeFault::caller_argument(format!(
                    "Request body could not be serialized: {e}"
                )));
            }
        }
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Caps the whole exchange, however steadily data arrives.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Result<OutboundRequest, BridgeFault> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let segments = expand_template(&self.template, &self.path_vars)?;

        let mut url = self.endpoint.base_url().clone();
        if !segments.is_empty() {
            let mut path = url.path_segments_mut().map_err(|_| {
                BridgeFault::caller_argument(format!(
                    "{} URL cannot carry a path: {}",
                    self.endpoint.role(),
                    self.endpoint.base_url()
                ))
            })?;
            path.pop_if_empty();
            for segment in &segments {
                path.push(segment);
            }
        }

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, value);
            }
        }

        let mut headers = self.headers;
        if let Some(auth) = self.credentials.authorization
            && !headers.contains_key(AUTHORIZATION)
        {
            headers.insert(AUTHORIZATION, auth);
        }
        if let Some(origin) = self.credentials.forwarded_for {
            let name = HeaderName::from_static(X_FORWARDED_FOR);
            if !headers.contains_key(&name) {
                headers.insert(name, origin);
            }
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        }
        if matches!(self.body, RequestBody::Json(_)) && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        }

        Ok(OutboundRequest {
            method: self.method,
            url,
            headers,
            body: self.body,
            role: self.endpoint.role(),
            read_timeout: self.read_timeout,
            deadline: self.deadline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint(url: &str) -> Endpoint {
        Endpoint::new(BackendRole::Configuration, Url::parse(url).unwrap())
    }

    fn creds() -> ForwardedCredentials {
        ForwardedCredentials {
            authorization: Some(HeaderValue::from_static("Bearer abc")),
            forwarded_for: Some(HeaderValue::from_static("10.0.0.7")),
        }
    }

    #[test]
    fn test_template_parsing() {
        assert_eq!(parse_template(""), vec![]);
        assert_eq!(parse_template("/"), vec![]);
        assert_eq!(
            parse_template("/aus/{auid}/state/"),
            vec![
                PathSegment::Static("aus".to_string()),
                PathSegment::Param("auid".to_string()),
                PathSegment::Static("state".to_string()),
            ]
        );
    }

    #[test]
    fn test_path_vars_are_encoded_per_segment() {
        let request = OutboundRequest::builder(
            Method::GET,
            &endpoint("http://config.internal:24620/api/"),
            "/aus/{auid}",
        )
        .path_var("auid", "plugin&base_url~http%3A%2F%2Fexample.com/x?y#z")
        .build()
        .unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://config.internal:24620/api/aus/plugin&base_url~http%253A%252F%252Fexample.com%2Fx%3Fy%23z"
        );
        assert_eq!(request.role(), BackendRole::Configuration);
    }

    #[test]
    fn test_unresolved_placeholder_rejected() {
        let err = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/aus/{auid}")
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeFault::CallerArgument(ref m) if m.contains("{auid}")));
    }

    #[test]
    fn test_unknown_or_duplicate_path_var_rejected() {
        let err = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/aus/{auid}")
            .path_var("auid", "a")
            .path_var("other", "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeFault::CallerArgument(ref m) if m.contains("other")));

        let err = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/aus/{auid}")
            .path_var("auid", "a")
            .path_var("auid", "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeFault::CallerArgument(_)));

        let err = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/aus/{auid}")
            .path_var("auid", "")
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeFault::CallerArgument(_)));
    }

    #[test]
    fn test_query_values_encoded_individually() {
        let request = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/urls/doi")
            .query("doi", "10.1000/a&b=c")
            .query_opt("version", Some("3"))
            .query_opt::<String>("missing", None)
            .build()
            .unwrap();

        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("doi".to_string(), "10.1000/a&b=c".to_string()),
                ("version".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_forwarded_headers_merged() {
        let request = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/aus")
            .credentials(&creds())
            .build()
            .unwrap();

        assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
        assert_eq!(request.headers()[X_FORWARDED_FOR], "10.0.0.7");
        assert_eq!(request.headers()[ACCEPT], APPLICATION_JSON);
    }

    #[test]
    fn test_explicit_headers_win() {
        let request = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/aus")
            .header(ACCEPT, "multipart/form-data")
            .header(AUTHORIZATION, "Basic override")
            .credentials(&creds())
            .build()
            .unwrap();

        assert_eq!(request.headers()[ACCEPT], "multipart/form-data");
        assert_eq!(request.headers()[AUTHORIZATION], "Basic override");
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = OutboundRequest::builder(Method::POST, &endpoint("http://h/"), "/crawls")
            .json(&json!({"auId": "a"}))
            .read_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        assert_eq!(request.headers()[CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(
            request.body(),
            &RequestBody::Json(Bytes::from_static(br#"{"auId":"a"}"#))
        );
        assert_eq!(request.read_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_header_value_deferred_to_build() {
        let result = OutboundRequest::builder(Method::GET, &endpoint("http://h/"), "/aus")
            .header(ACCEPT, "bad\nvalue")
            .build();
        assert!(matches!(result, Err(BridgeFault::CallerArgument(_))));
    }

    #[test]
    fn test_empty_template_keeps_url() {
        let request = OutboundRequest::builder(
            Method::GET,
            &Endpoint::external(Url::parse("http://source.example/file.pdf?x=1").unwrap()),
            "",
        )
        .build()
        .unwrap();
        assert_eq!(request.url().as_str(), "http://source.example/file.pdf?x=1");
        assert_eq!(request.role(), BackendRole::External);
    }
}
