use super::{Service, ServiceContext, parse_args, reply, unknown_operation};
use crate::credentials::{self, ForwardedCredentials, InboundCall};
use crate::errors::BridgeFault;
use crate::multipart::{BinaryPart, DEFAULT_PART_CONTENT_TYPE, FormField, SpooledContent};
use crate::request::{Endpoint, OutboundRequest};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Imports files into an AU of the repository.
///
/// Uploads go to `POST {repository}/collections/{collection}/artifacts` as
/// `multipart/form-data` with the fields `auid`, `uri` and `properties` (a
/// JSON array) followed by the binary `content` part.
pub struct ImportService {
    context: ServiceContext,
}

/// Outcome of an import. Backend failures are reported here rather than as
/// faults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImportResult {
    fn from_outcome(target_url: &str, outcome: Result<(), BridgeFault>) -> Self {
        match outcome {
            Ok(()) => Self {
                success: true,
                message: None,
            },
            Err(fault) => {
                tracing::warn!(target_url, error = %fault, "Import failed");
                Self {
                    success: false,
                    message: Some(fault.message()),
                }
            }
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ImportArgs {
    source_url: Option<String>,
    target_id: Option<String>,
    target_url: Option<String>,
    #[serde(default)]
    properties: Vec<String>,
    content_type: Option<String>,
    data: Option<String>,
}

/// Destination of an import.
#[derive(Debug, Clone, Copy)]
pub struct ImportTarget<'a> {
    /// AU receiving the file
    pub target_id: Option<&'a str>,
    /// URL the file is archived under
    pub target_url: Option<&'a str>,
    pub properties: &'a [String],
}

impl ImportService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Fetches `source_url` and imports its content.
    ///
    /// The source is spooled to a temp file first so the upload carries an
    /// exact length without buffering the content in memory. Nothing is
    /// forwarded to the source, which is not one of the backends.
    pub async fn import_pulled_file(
        &self,
        call: &InboundCall,
        source_url: Option<&str>,
        target: ImportTarget<'_>,
    ) -> Result<ImportResult, BridgeFault> {
        let creds = credentials::extract(call)?;
        let source_url = BridgeFault::require("sourceUrl", source_url)?;
        let (target_id, target_url) = require_target(&target)?;
        let source = Url::parse(source_url).map_err(|e| {
            BridgeFault::caller_argument(format!("Invalid source URL '{source_url}': {e}"))
        })?;

        let outcome = async {
            let request = OutboundRequest::builder(Method::GET, &Endpoint::external(source), "")
                .header(http::header::ACCEPT, "*/*")
                .build()?;
            let response = self.context.client().stream(request).await?;
            let content_type = response
                .content_type()
                .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
                .to_string();

            let spooled = SpooledContent::spool(response.into_stream()).await?;
            let binary = spooled.into_binary_part("content", content_type);
            self.upload(&creds, target_id, target_url, target.properties, binary)
                .await
        }
        .await;

        Ok(ImportResult::from_outcome(target_url, outcome))
    }

    /// Imports content sent by the caller as base64.
    pub async fn import_pushed_file(
        &self,
        call: &InboundCall,
        target: ImportTarget<'_>,
        content_type: Option<&str>,
        data: Option<&str>,
    ) -> Result<ImportResult, BridgeFault> {
        let creds = credentials::extract(call)?;
        let (target_id, target_url) = require_target(&target)?;
        let data = data.ok_or_else(|| BridgeFault::caller_argument("Missing required argument 'data'"))?;
        let data = STANDARD
            .decode(data)
            .map_err(|e| BridgeFault::caller_argument(format!("Argument 'data' is not valid base64: {e}")))?;

        let binary = BinaryPart::from_bytes(
            "content",
            content_type.unwrap_or(DEFAULT_PART_CONTENT_TYPE),
            Bytes::from(data),
        );
        let outcome = self
            .upload(&creds, target_id, target_url, target.properties, binary)
            .await;

        Ok(ImportResult::from_outcome(target_url, outcome))
    }

    async fn upload(
        &self,
        creds: &ForwardedCredentials,
        target_id: &str,
        target_url: &str,
        properties: &[String],
        binary: BinaryPart,
    ) -> Result<(), BridgeFault> {
        let request = OutboundRequest::builder(
            Method::POST,
            &self.context.repository(),
            "/collections/{collection}/artifacts",
        )
        .path_var("collection", self.context.collection())
        .credentials(creds)
        .build()?;

        let fields = vec![
            FormField::text("auid", target_id),
            FormField::text("uri", target_url),
            FormField::json("properties", properties)?,
        ];

        tracing::debug!(
            target_id,
            target_url,
            length = binary.content_length(),
            "Importing file"
        );
        self.context
            .client()
            .send_multipart(request, fields, binary)
            .await?;
        Ok(())
    }
}

fn require_target<'a>(target: &ImportTarget<'a>) -> Result<(&'a str, &'a str), BridgeFault> {
    let target_id = BridgeFault::require("targetId", target.target_id)?;
    let target_url = BridgeFault::require("targetUrl", target.target_url)?;
    Ok((target_id, target_url))
}

#[async_trait]
impl Service for ImportService {
    fn name(&self) -> &'static str {
        "ImportService"
    }

    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault> {
        let args: ImportArgs = parse_args(&call.operation, args)?;
        let target = ImportTarget {
            target_id: args.target_id.as_deref(),
            target_url: args.target_url.as_deref(),
            properties: &args.properties,
        };

        match call.operation.as_str() {
            "importPulledFile" => reply(
                self.import_pulled_file(call, args.source_url.as_deref(), target)
                    .await?,
            ),
            "importPushedFile" => reply(
                self.import_pushed_file(
                    call,
                    target,
                    args.content_type.as_deref(),
                    args.data.as_deref(),
                )
                .await?,
            ),
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{RecordedRequest, TEST_AUTHORIZATION, TestBackend, TestResponse, test_call};
    use http::StatusCode;
    use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
    use serde_json::json;

    struct UploadedPart {
        name: String,
        content_type: Option<String>,
        content_length: Option<String>,
        data: Bytes,
    }

    async fn uploaded_parts(request: &RecordedRequest) -> Vec<UploadedPart> {
        let content_type = request.headers[CONTENT_TYPE].to_str().unwrap().to_string();
        let boundary = multer::parse_boundary(content_type).unwrap();
        let body = request.body.clone();
        let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        let mut parts = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let header = |name: http::HeaderName| {
                field
                    .headers()
                    .get(name)
                    .map(|v| v.to_str().unwrap().to_string())
            };
            let content_type = header(CONTENT_TYPE);
            let content_length = header(CONTENT_LENGTH);
            parts.push(UploadedPart {
                name: field.name().unwrap().to_string(),
                content_type,
                content_length,
                data: field.bytes().await.unwrap(),
            });
        }
        parts
    }

    fn target<'a>(properties: &'a [String]) -> ImportTarget<'a> {
        ImportTarget {
            target_id: Some("au-1"),
            target_url: Some("http://example.com/file.pdf"),
            properties,
        }
    }

    #[tokio::test]
    async fn test_import_pushed_file() {
        let backend =
            TestBackend::spawn(|_| TestResponse::json(StatusCode::CREATED, json!({"uuid": "x"}))).await;
        let service = ImportService::new(backend.service_context());

        let result = service
            .invoke(
                &test_call("ImportService", "importPushedFile"),
                json!({
                    "targetId": "au-1",
                    "targetUrl": "http://example.com/file.pdf",
                    "properties": ["Content-Type=application/pdf"],
                    "contentType": "application/pdf",
                    "data": STANDARD.encode(b"%PDF-1.7"),
                }),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"success": true}));

        let request = &backend.requests()[0];
        assert_eq!(request.path, "/collections/lockss/artifacts");
        assert_eq!(request.headers[AUTHORIZATION].as_bytes(), TEST_AUTHORIZATION);

        let parts = uploaded_parts(request).await;
        let names: Vec<_> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["auid", "uri", "properties", "content"]);
        assert_eq!(parts[0].data, "au-1");
        assert_eq!(parts[1].data, "http://example.com/file.pdf");
        assert_eq!(parts[2].data, r#"["Content-Type=application/pdf"]"#);
        assert_eq!(parts[3].content_type.as_deref(), Some("application/pdf"));
        assert_eq!(parts[3].content_length.as_deref(), Some("8"));
        assert_eq!(parts[3].data, "%PDF-1.7");
    }

    #[tokio::test]
    async fn test_import_pushed_rejects_bad_data() {
        let backend = TestBackend::spawn(|_| TestResponse::empty(StatusCode::OK)).await;
        let service = ImportService::new(backend.service_context());
        let call = test_call("ImportService", "importPushedFile");

        let err = service
            .import_pushed_file(&call, target(&[]), None, Some("not base64!"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeFault::CallerArgument(_)));

        let err = service
            .import_pushed_file(&call, ImportTarget { target_id: None, ..target(&[]) }, None, Some(""))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeFault::CallerArgument(_)));
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_captured() {
        let backend = TestBackend::spawn(|_| {
            TestResponse::json(StatusCode::CONFLICT, json!({"message": "Artifact already exists"}))
        })
        .await;
        let service = ImportService::new(backend.service_context());

        let result = service
            .import_pushed_file(
                &test_call("ImportService", "importPushedFile"),
                target(&[]),
                Some("text/plain"),
                Some(&STANDARD.encode(b"hello")),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            ImportResult {
                success: false,
                message: Some("Artifact already exists".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_import_pulled_file() {
        let source = TestBackend::spawn(|_| {
            TestResponse::new(StatusCode::OK, "image/png", &b"\x89PNG\r\n\x1a\n"[..])
        })
        .await;
        let repository = TestBackend::spawn(|_| TestResponse::empty(StatusCode::OK)).await;
        let service = ImportService::new(repository.service_context());
        let source_url = source.url.join("images/logo.png").unwrap();

        let result = service
            .import_pulled_file(
                &test_call("ImportService", "importPulledFile"),
                Some(source_url.as_str()),
                target(&["k=v".to_string()]),
            )
            .await
            .unwrap();
        assert!(result.success);

        let fetched = &source.requests()[0];
        assert_eq!(fetched.path, "/images/logo.png");
        assert!(fetched.headers.get(AUTHORIZATION).is_none());

        let parts = uploaded_parts(&repository.requests()[0]).await;
        assert_eq!(parts[3].content_type.as_deref(), Some("image/png"));
        assert_eq!(parts[3].content_length.as_deref(), Some("8"));
        assert_eq!(parts[3].data.as_ref(), b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn test_unreachable_source_is_captured() {
        let repository = TestBackend::spawn(|_| TestResponse::empty(StatusCode::OK)).await;
        let service = ImportService::new(repository.service_context());
        let source_url = crate::testutils::unused_url().await;

        let result = service
            .import_pulled_file(
                &test_call("ImportService", "importPulledFile"),
                Some(source_url.as_str()),
                target(&[]),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.message.is_some());
        assert_eq!(repository.request_count(), 0);
    }
}
