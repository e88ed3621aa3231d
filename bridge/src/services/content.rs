use super::{Service, ServiceContext, absent_on_404, parse_args, reply, unknown_operation};
use crate::credentials::{self, ForwardedCredentials, InboundCall};
use crate::errors::BridgeFault;
use crate::multipart::DEFAULT_PART_CONTENT_TYPE;
use crate::request::OutboundRequest;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::BytesMut;
use futures::TryStreamExt;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::http::filter_hop_by_hop;

/// Accept types for content export, most preferred first.
pub const EXPORT_ACCEPT: &[&str] = &["multipart/form-data", "multipart/related", "application/json"];

/// Reads archived content from the repository.
///
/// Content is addressed by collection, AU and URL:
/// `GET {repository}/collections/{collection}/aus/{auid}/content?url=...&version=...`
pub struct ContentService {
    context: ServiceContext,
}

/// A named metadata value of a fetched file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: String,
}

/// One archived file with its metadata. `data` is base64.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub content_type: String,
    pub size: u64,
    pub properties: Vec<Property>,
    pub data: String,
}

/// One stored version of a URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub url: String,
    pub version: u32,
    pub size: u64,
    pub collection_date: i64,
}

/// One file of an AU export. `data` is base64.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub data: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ContentArgs {
    url: Option<String>,
    au_id: Option<String>,
    version: Option<u32>,
    file_type: Option<String>,
    #[serde(default)]
    compress: bool,
}

impl ContentService {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    /// Returns `None` when the repository has no such file.
    pub async fn fetch_file(
        &self,
        call: &InboundCall,
        url: Option<&str>,
        au_id: Option<&str>,
        version: Option<u32>,
    ) -> Result<Option<FileResult>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let url = BridgeFault::require("url", url)?;
        let au_id = BridgeFault::require("auId", au_id)?;

        let request = self
            .repository_request(&creds, au_id, "content")
            .query("url", url)
            .query_opt("version", version.map(|v| v.to_string()))
            .build()?;

        let Some(response) = absent_on_404(self.context.client().stream(request).await)? else {
            tracing::debug!(url, au_id, "File not found in repository");
            return Ok(None);
        };

        let mut headers = response.headers().clone();
        filter_hop_by_hop(&mut headers, response.version());
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
            .to_string();

        let data = response
            .into_stream()
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;

        Ok(Some(FileResult {
            url: url.to_string(),
            version,
            content_type,
            size: data.len() as u64,
            properties: header_properties(&headers),
            data: STANDARD.encode(&data),
        }))
    }

    /// Every stored version of `url`; empty when there is none.
    pub async fn get_versions(
        &self,
        call: &InboundCall,
        url: Option<&str>,
        au_id: Option<&str>,
    ) -> Result<Vec<FileVersion>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let url = BridgeFault::require("url", url)?;
        let au_id = BridgeFault::require("auId", au_id)?;
        self.artifacts(&creds, au_id, url, "all").await
    }

    /// Whether the repository holds `url`, optionally at a given version.
    pub async fn is_url_cached(
        &self,
        call: &InboundCall,
        url: Option<&str>,
        au_id: Option<&str>,
        version: Option<u32>,
    ) -> Result<bool, BridgeFault> {
        let creds = credentials::extract(call)?;
        let url = BridgeFault::require("url", url)?;
        let au_id = BridgeFault::require("auId", au_id)?;

        let version = version.map_or_else(|| "latest".to_string(), |v| v.to_string());
        let versions = self.artifacts(&creds, au_id, url, &version).await?;
        Ok(!versions.is_empty())
    }

    async fn artifacts(
        &self,
        creds: &ForwardedCredentials,
        au_id: &str,
        url: &str,
        version: &str,
    ) -> Result<Vec<FileVersion>, BridgeFault> {
        let request = self
            .repository_request(creds, au_id, "artifacts")
            .query("url", url)
            .query("version", version)
            .build()?;

        let versions = absent_on_404(self.context.client().execute_json(request).await)?;
        Ok(versions.unwrap_or_default())
    }

    /// Exports the content of an AU as files.
    ///
    /// The repository answers with one part per file. A non-multipart answer
    /// is a malformed body.
    pub async fn export_content(
        &self,
        call: &InboundCall,
        au_id: Option<&str>,
        file_type: Option<&str>,
        compress: bool,
    ) -> Result<Vec<ExportedFile>, BridgeFault> {
        let creds = credentials::extract(call)?;
        let au_id = BridgeFault::require("auId", au_id)?;

        let request = self
            .repository_request(&creds, au_id, "archive")
            .query("fileType", file_type.unwrap_or("WARC"))
            .query("compress", compress.to_string())
            .build()?;

        let mut parts = self
            .context
            .client()
            .request_multipart(request, EXPORT_ACCEPT)
            .await?
            .into_parts()?;

        let mut files = Vec::new();
        while let Some(mut part) = parts.next_part().await? {
            let data = part.bytes().await?;
            tracing::debug!(
                au_id,
                part = part.name(),
                declared_length = ?part.content_length(),
                "Received exported file"
            );
            files.push(ExportedFile {
                name: part.file_name().unwrap_or(part.name()).to_string(),
                content_type: part.content_type().to_string(),
                size: data.len() as u64,
                data: STANDARD.encode(&data),
            });
        }
        Ok(files)
    }

    fn repository_request(
        &self,
        creds: &ForwardedCredentials,
        au_id: &str,
        resource: &str,
    ) -> crate::request::OutboundRequestBuilder {
        let template = format!("/collections/{{collection}}/aus/{{auid}}/{resource}");
        OutboundRequest::builder(Method::GET, &self.context.repository(), &template)
            .path_var("collection", self.context.collection())
            .path_var("auid", au_id)
            .credentials(creds)
    }
}

/// Turns response headers into properties, one per header name. Repeated
/// headers are joined with commas.
/// Backend headers carrying artifact metadata.
const METADATA_HEADER_PREFIX: &str = "x-lockss-";

/// Content type plus the artifact metadata headers. Transport headers
/// such as `date` or `content-length` are not file properties.
fn header_properties(headers: &HeaderMap) -> Vec<Property> {
    headers
        .keys()
        .filter(|name| **name == CONTENT_TYPE || name.as_str().starts_with(METADATA_HEADER_PREFIX))
        .map(|name| Property {
            name: name.to_string(),
            value: headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(","),
        })
        .collect()
}

#[async_trait]
impl Service for ContentService {
    fn name(&self) -> &'static str {
        "ContentService"
    }

    async fn invoke(&self, call: &InboundCall, args: Value) -> Result<Value, BridgeFault> {
        let args: ContentArgs = parse_args(&call.operation, args)?;
        let url = args.url.as_deref();
        let au_id = args.au_id.as_deref();

        match call.operation.as_str() {
            "fetchFile" => reply(self.fetch_file(call, url, au_id, args.version).await?),
            "getVersions" => reply(self.get_versions(call, url, au_id).await?),
            "isUrlCached" => reply(self.is_url_cached(call, url, au_id, args.version).await?),
            "exportContent" => reply(
                self.export_content(call, au_id, args.file_type.as_deref(), args.compress)
                    .await?,
            ),
            other => Err(unknown_operation(self.name(), other)),
        }
    }
}
