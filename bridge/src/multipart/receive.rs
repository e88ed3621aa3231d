use super::DEFAULT_PART_CONTENT_TYPE;
use crate::client::{BridgeClient, classify};
use crate::errors::BridgeFault;
use crate::request::{BackendRole, OutboundRequest};
use bytes::{Bytes, BytesMut};
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use indexmap::IndexMap;

/// Builds an `Accept` value preferring the types in the given order.
pub fn accept_header(types: &[&str]) -> Result<HeaderValue, BridgeFault> {
    let value = types
        .iter()
        .enumerate()
        .map(|(i, t)| match i {
            0 => t.to_string(),
            _ => format!("{t};q=0.{}", 9usize.saturating_sub(i - 1).max(1)),
        })
        .collect::<Vec<_>>()
        .join(", ");

    HeaderValue::from_str(&value)
        .map_err(|_| BridgeFault::caller_argument(format!("Invalid accept types: {value}")))
}

impl BridgeClient {
    /// Sends a request expecting a multipart answer.
    ///
    /// The body is not read here. A multipart response becomes a
    /// [`PartStream`]; anything else is read fully and handed back as a single
    /// body for the caller to judge. The read timeout bounds the whole
    /// exchange, parts included.
    pub async fn request_multipart(
        &self,
        request: OutboundRequest,
        accept: &[&str],
    ) -> Result<MultipartResponse, BridgeFault> {
        let role = request.role();
        let deadline = request
            .deadline()
            .unwrap_or_else(|| self.read_timeout_of(&request));
        let request = request
            .with_header(ACCEPT, accept_header(accept)?)
            .with_deadline(deadline);
        let response = self.send(request, None).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
            .to_string();

        let body = match multipart_boundary(&content_type) {
            Some(boundary) => {
                tracing::debug!(backend = %role, content_type = %content_type, "Reading multipart response");
                MultipartBody::Parts(PartStream {
                    role,
                    inner: multer::Multipart::new(response.bytes_stream(), boundary),
                    index: 0,
                })
            }
            None => {
                let body = response.bytes().await.map_err(|e| classify(role, &e))?;
                MultipartBody::Single { content_type, body }
            }
        };

        Ok(MultipartResponse {
            role,
            status,
            headers,
            body,
        })
    }
}

/// Boundary of any `multipart/*` content type.
fn multipart_boundary(content_type: &str) -> Option<String> {
    let mime: mime::Mime = content_type.parse().ok()?;
    if mime.type_() != mime::MULTIPART {
        return None;
    }
    mime.get_param(mime::BOUNDARY)
        .map(|boundary| boundary.as_str().to_string())
}

fn multer_fault(role: BackendRole, err: multer::Error) -> BridgeFault {
    if let multer::Error::StreamReadFailed(source) = &err
        && let Some(e) = source.downcast_ref::<reqwest::Error>()
    {
        return classify(role, e);
    }
    BridgeFault::MalformedBody {
        target: role.to_string(),
        message: err.to_string(),
    }
}

/// A 2xx answer to [`BridgeClient::request_multipart`].
#[derive(Debug)]
pub struct MultipartResponse {
    role: BackendRole,
    status: StatusCode,
    headers: HeaderMap,
    body: MultipartBody,
}

#[derive(Debug)]
pub enum MultipartBody {
    Parts(PartStream),
    /// A non-multipart body, read in full.
    Single { content_type: String, body: Bytes },
}

impl MultipartResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &MultipartBody {
        &self.body
    }

    pub fn into_body(self) -> MultipartBody {
        self.body
    }

    /// The part stream, or a malformed-body fault if the backend did not
    /// answer with multipart content.
    pub fn into_parts(self) -> Result<PartStream, BridgeFault> {
        match self.body {
            MultipartBody::Parts(parts) => Ok(parts),
            MultipartBody::Single { content_type, .. } => Err(BridgeFault::MalformedBody {
                target: self.role.to_string(),
                message: format!("expected a multipart response, got '{content_type}'"),
            }),
        }
    }
}

/// Parts of a multipart body in delivery order.
///
/// Only one part can be read at a time: a [`Part`] still holding unread
/// data must be dropped or read before the next one is requested.
pub struct PartStream {
    role: BackendRole,
    inner: multer::Multipart<'static>,
    index: usize,
}

impl std::fmt::Debug for PartStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartStream")
            .field("role", &self.role)
            .field("index", &self.index)
            .finish()
    }
}

impl PartStream {
    pub async fn next_part(&mut self) -> Result<Option<Part>, BridgeFault> {
        let field = match self.inner.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => return Err(multer_fault(self.role, e)),
        };

        let part = Part::new(self.role, self.index, field);
        self.index += 1;
        Ok(Some(part))
    }

    /// Reads every remaining part into memory, keyed by part name.
    pub async fn collect(mut self) -> Result<IndexMap<String, Part>, BridgeFault> {
        let mut parts = IndexMap::new();
        while let Some(mut part) = self.next_part().await? {
            part.bytes().await?;
            let name = part.name().to_string();
            if parts.contains_key(&name) {
                return Err(BridgeFault::MalformedBody {
                    target: self.role.to_string(),
                    message: format!("duplicate part '{name}'"),
                });
            }
            parts.insert(name, part);
        }
        Ok(parts)
    }
}

enum PartBody {
    Unread(multer::Field<'static>),
    Streaming(multer::Field<'static>),
    Buffered(Bytes),
    Streamed,
}

/// One section of a multipart body.
pub struct Part {
    role: BackendRole,
    name: String,
    file_name: Option<String>,
    content_type: String,
    content_length: Option<u64>,
    headers: HeaderMap,
    body: PartBody,
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl Part {
    fn new(role: BackendRole, index: usize, field: multer::Field<'static>) -> Self {
        let headers = field.headers().clone();
        let name = field
            .name()
            .map(str::to_string)
            .or_else(|| content_id(&headers))
            .unwrap_or_else(|| format!("part-{index}"));
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
            .to_string();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());

        Self {
            role,
            name,
            file_name: field.file_name().map(str::to_string),
            content_type,
            content_length,
            headers,
            body: PartBody::Unread(field),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Declared content type, `application/octet-stream` when absent.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Length from the part's own `Content-Length` header, if declared.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Reads the whole part. Later calls return the same bytes.
    ///
    /// Fails once the part has been consumed with [`chunk`](Self::chunk).
    pub async fn bytes(&mut self) -> Result<Bytes, BridgeFault> {
        match std::mem::replace(&mut self.body, PartBody::Streamed) {
            PartBody::Unread(field) => {
                let bytes = field.bytes().await.map_err(|e| multer_fault(self.role, e))?;
                self.body = PartBody::Buffered(bytes.clone());
                Ok(bytes)
            }
            PartBody::Buffered(bytes) => {
                self.body = PartBody::Buffered(bytes.clone());
                Ok(bytes)
            }
            PartBody::Streaming(mut field) => {
                // Drain what is left so the next part stays reachable.
                while let Ok(Some(_)) = field.chunk().await {}
                Err(self.already_streamed())
            }
            PartBody::Streamed => Err(self.already_streamed()),
        }
    }

    /// Next chunk of the part, `None` at its end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, BridgeFault> {
        match std::mem::replace(&mut self.body, PartBody::Streamed) {
            PartBody::Unread(mut field) | PartBody::Streaming(mut field) => {
                match field.chunk().await {
                    Ok(Some(chunk)) => {
                        self.body = PartBody::Streaming(field);
                        Ok(Some(chunk))
                    }
                    Ok(None) => Ok(None),
                    Err(e) => Err(multer_fault(self.role, e)),
                }
            }
            PartBody::Buffered(bytes) => {
                self.body = PartBody::Buffered(bytes);
                Err(BridgeFault::caller_argument(format!(
                    "Part '{}' was already read in full",
                    self.name
                )))
            }
            PartBody::Streamed => Ok(None),
        }
    }

    /// Reads the rest of the part chunk by chunk into one buffer.
    ///
    /// A part already read in full returns its bytes again. A part whose
    /// chunks were all taken fails instead of yielding an empty body.
    pub async fn read_to_end(&mut self) -> Result<Bytes, BridgeFault> {
        match &self.body {
            PartBody::Buffered(bytes) => return Ok(bytes.clone()),
            PartBody::Streamed => return Err(self.already_streamed()),
            PartBody::Unread(_) | PartBody::Streaming(_) => {}
        }
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    fn already_streamed(&self) -> BridgeFault {
        BridgeFault::caller_argument(format!(
            "Part '{}' was already consumed as a stream",
            self.name
        ))
    }
}

fn content_id(headers: &HeaderMap) -> Option<String> {
    let id = headers.get("content-id")?.to_str().ok()?.trim();
    let id = id.trim_start_matches('<').trim_end_matches('>');
    (!id.is_empty()).then(|| id.to_string())
}
