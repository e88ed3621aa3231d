use crate::client::{BridgeClient, OutboundResponse, Progress, Upload};
use crate::errors::BridgeFault;
use crate::request::{APPLICATION_JSON, OutboundRequest};
use bytes::Bytes;
use futures::{TryStream, TryStreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use http_body_util::BodyExt;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

/// A named non-binary field of an upload.
#[derive(Clone, Debug, PartialEq)]
pub enum FormField {
    Text { name: String, value: String },
    Json { name: String, value: serde_json::Value },
}

impl FormField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormField::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn json<T: Serialize + ?Sized>(name: impl Into<String>, value: &T) -> Result<Self, BridgeFault> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|e| {
            BridgeFault::caller_argument(format!("Field '{name}' cannot be encoded as JSON: {e}"))
        })?;
        Ok(FormField::Json { name, value })
    }

    fn append_to(self, form: Form) -> Result<Form, BridgeFault> {
        Ok(match self {
            FormField::Text { name, value } => form.text(name, value),
            FormField::Json { name, value } => {
                let part = Part::text(value.to_string())
                    .mime_str(APPLICATION_JSON)
                    .map_err(|e| BridgeFault::caller_argument(e.to_string()))?;
                form.part(name, part)
            }
        })
    }
}

/// The binary part of an upload.
///
/// The declared length is sent as is; the body is expected to produce exactly
/// that many bytes. While it is being sent the wait for the response does not
/// run out.
pub struct BinaryPart {
    name: String,
    file_name: Option<String>,
    content_type: String,
    content_length: u64,
    body: reqwest::Body,
}

impl std::fmt::Debug for BinaryPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryPart")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl BinaryPart {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content_length: u64,
        body: impl Into<reqwest::Body>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: content_type.into(),
            content_length,
            body: body.into(),
        }
    }

    pub fn from_bytes(name: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        let length = data.len() as u64;
        Self::new(name, content_type, length, data)
    }

    pub fn from_stream<S>(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content_length: u64,
        stream: S,
    ) -> Self
    where
        S: TryStream + Send + 'static,
        S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        Bytes: From<S::Ok>,
    {
        Self::new(name, content_type, content_length, reqwest::Body::wrap_stream(stream))
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Headers the part is sent with.
    pub fn headers(&self) -> Result<HeaderMap, BridgeFault> {
        let mut headers = HeaderMap::new();
        let content_type = HeaderValue::from_str(&self.content_type).map_err(|_| {
            BridgeFault::caller_argument(format!("Invalid content type '{}'", self.content_type))
        })?;
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.content_length));
        Ok(headers)
    }

    /// Every chunk taken from the body marks `progress`.
    fn into_part(self, progress: &Progress) -> Result<(String, Part), BridgeFault> {
        // The client writes Content-Type itself from the part's mime.
        let mut extra = self.headers()?;
        extra.remove(CONTENT_TYPE);

        let progress = progress.clone();
        let body = reqwest::Body::wrap_stream(
            self.body
                .into_data_stream()
                .inspect_ok(move |_| progress.touch()),
        );

        let mut part = Part::stream_with_length(body, self.content_length)
            .mime_str(&self.content_type)
            .map_err(|_| {
                BridgeFault::caller_argument(format!("Invalid content type '{}'", self.content_type))
            })?
            .headers(extra);
        if let Some(file_name) = self.file_name {
            part = part.file_name(file_name);
        }
        Ok((self.name, part))
    }
}

impl BridgeClient {
    /// Uploads the fields followed by the binary part as `multipart/form-data`.
    pub async fn send_multipart(
        &self,
        request: OutboundRequest,
        fields: Vec<FormField>,
        binary: BinaryPart,
    ) -> Result<OutboundResponse, BridgeFault> {
        let role = request.role();
        let idle = self.read_timeout_of(&request);
        let progress = Progress::new();
        let mut form = Form::new();
        for field in fields {
            form = field.append_to(form)?;
        }
        let (name, part) = binary.into_part(&progress)?;
        form = form.part(name, part);

        tracing::debug!(backend = %role, "Uploading multipart content");
        let response = self.send(request, Some(Upload { form, progress })).await?;
        OutboundResponse::read(role, response, idle).await
    }
}
