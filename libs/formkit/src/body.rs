//! Request body extraction.
//!
//! [`BodyParser`] turns a raw request body into a field map and a file map.
//! [`FormParser`] is the default and understands JSON, url-encoded forms and
//! `multipart/form-data`.

use std::error::Error as StdError;
use std::io;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http::{header, HeaderMap};
use http_body_util::LengthLimitError;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::envelope::messages;
use crate::error::{ApiError, ErrorKind};
use crate::validation::Encoding;

const TAG: &str = "formkit::body";

/// One uploaded file from a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub bytes: Bytes,
}

/// Uploaded files keyed by form field name. Always present after the body
/// pipeline ran, possibly empty.
#[derive(Debug, Clone, Default)]
pub struct UploadedFiles(IndexMap<String, Vec<UploadedFile>>);

impl UploadedFiles {
    pub fn get(&self, field: &str) -> Option<&[UploadedFile]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn first(&self, field: &str) -> Option<&UploadedFile> {
        self.0.get(field).and_then(|files| files.first())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[UploadedFile])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of fields that carried at least one file.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, field: String, file: UploadedFile) {
        self.0.entry(field).or_default().push(file);
    }
}

#[derive(Debug, Clone)]
pub struct ParsedBody {
    /// JSON value for JSON bodies, an object of text fields for forms.
    pub fields: Value,
    pub files: UploadedFiles,
    pub encoding: Encoding,
}

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("request has no body")]
    Missing,
    #[error("request body is blank")]
    Blank,
    #[error("unsupported content type `{0}`")]
    Unsupported(String),
    #[error("malformed {encoding} body: {reason}")]
    Malformed {
        encoding: &'static str,
        reason: String,
    },
    #[error("body exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("failed to read request body: {0}")]
    Read(String),
}

impl From<BodyError> for ApiError {
    #[track_caller]
    fn from(e: BodyError) -> Self {
        let (kind, message) = match &e {
            BodyError::Missing => (ErrorKind::BadRequest, messages::ERR_BODY_NOT_PROVIDED),
            BodyError::Blank => (ErrorKind::BadRequest, messages::ERR_BODY_EMPTY),
            BodyError::Unsupported(_) => (ErrorKind::BadRequest, messages::ERR_UNSUPPORTED_BODY),
            BodyError::Malformed { .. } | BodyError::Read(_) => {
                (ErrorKind::BadRequest, messages::ERR_INC_BODY)
            }
            BodyError::TooLarge { .. } => (ErrorKind::PayloadTooLarge, messages::ERR_INC_BODY),
        };
        ApiError::new(kind, message).with_tag(TAG)
    }
}

/// Pluggable body parser.
#[async_trait]
pub trait BodyParser: Send + Sync {
    async fn parse(&self, headers: &HeaderMap, body: Body) -> Result<ParsedBody, BodyError>;
}

/// Default parser for JSON, url-encoded and multipart bodies.
#[derive(Debug, Clone)]
pub struct FormParser {
    limit: usize,
}

impl FormParser {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for FormParser {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Json,
    UrlEncoded,
    Multipart,
}

fn classify(headers: &HeaderMap) -> Result<(Kind, String), BodyError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let essence = raw
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let kind = match essence.as_str() {
        "application/json" => Kind::Json,
        e if e.starts_with("application/") && e.ends_with("+json") => Kind::Json,
        "application/x-www-form-urlencoded" => Kind::UrlEncoded,
        "multipart/form-data" => Kind::Multipart,
        "" => return Err(BodyError::Unsupported("none".into())),
        _ => return Err(BodyError::Unsupported(essence)),
    };
    Ok((kind, raw))
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Repeated keys collapse into an array, in arrival order.
fn insert_field(fields: &mut Map<String, Value>, name: String, value: String) {
    match fields.get_mut(&name) {
        None => {
            fields.insert(name, Value::String(value));
        }
        Some(Value::Array(items)) => items.push(Value::String(value)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(value)]);
        }
    }
}

#[async_trait]
impl BodyParser for FormParser {
    async fn parse(&self, headers: &HeaderMap, body: Body) -> Result<ParsedBody, BodyError> {
        let bytes = axum::body::to_bytes(body, self.limit)
            .await
            .map_err(|e| {
                if is_length_limit(&e) {
                    BodyError::TooLarge { limit: self.limit }
                } else {
                    BodyError::Read(e.to_string())
                }
            })?;

        if bytes.is_empty() {
            return Err(BodyError::Missing);
        }

        let (kind, content_type) = classify(headers)?;

        match kind {
            Kind::Json => parse_json(&bytes),
            Kind::UrlEncoded => parse_urlencoded(&bytes),
            Kind::Multipart => parse_multipart(&content_type, bytes).await,
        }
    }
}

fn parse_json(bytes: &[u8]) -> Result<ParsedBody, BodyError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(BodyError::Blank);
    }
    let fields = serde_json::from_slice::<Value>(bytes).map_err(|e| BodyError::Malformed {
        encoding: "json",
        reason: e.to_string(),
    })?;
    Ok(ParsedBody {
        fields,
        files: UploadedFiles::default(),
        encoding: Encoding::Json,
    })
}

fn parse_urlencoded(bytes: &[u8]) -> Result<ParsedBody, BodyError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(bytes).map_err(|e| BodyError::Malformed {
            encoding: "url-encoded",
            reason: e.to_string(),
        })?;

    let mut fields = Map::new();
    for (name, value) in pairs {
        insert_field(&mut fields, name, value);
    }
    Ok(ParsedBody {
        fields: Value::Object(fields),
        files: UploadedFiles::default(),
        encoding: Encoding::Form,
    })
}

async fn parse_multipart(content_type: &str, bytes: Bytes) -> Result<ParsedBody, BodyError> {
    let malformed = |reason: String| BodyError::Malformed {
        encoding: "multipart",
        reason,
    };

    let boundary = multer::parse_boundary(content_type).map_err(|e| malformed(e.to_string()))?;
    let stream = futures_util::stream::once(async move { Ok::<_, io::Error>(bytes) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Map::new();
    let mut files = UploadedFiles::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| malformed(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(|m| m.to_string());
                let data = field.bytes().await.map_err(|e| malformed(e.to_string()))?;
                files.push(
                    name,
                    UploadedFile {
                        file_name: Some(file_name),
                        content_type,
                        size: data.len(),
                        bytes: data,
                    },
                );
            }
            None => {
                let text = field.text().await.map_err(|e| malformed(e.to_string()))?;
                insert_field(&mut fields, name, text);
            }
        }
    }

    Ok(ParsedBody {
        fields: Value::Object(fields),
        files,
        encoding: Encoding::Form,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    fn headers(ct: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        h
    }

    #[tokio::test]
    async fn parses_json() {
        let parsed = FormParser::default()
            .parse(&headers("application/json"), Body::from(r#"{"a":1}"#))
            .await
            .unwrap();
        assert_eq!(parsed.fields, json!({"a": 1}));
        assert_eq!(parsed.encoding, Encoding::Json);
        assert!(parsed.files.is_empty());
    }

    #[tokio::test]
    async fn empty_body_is_missing() {
        let err = FormParser::default()
            .parse(&headers("application/json"), Body::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::Missing));
    }

    #[tokio::test]
    async fn blank_json_body() {
        let err = FormParser::default()
            .parse(&headers("application/json"), Body::from("  \n"))
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::Blank));
    }

    #[tokio::test]
    async fn malformed_json() {
        let err = FormParser::default()
            .parse(&headers("application/json"), Body::from("{nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::Malformed { encoding: "json", .. }));
        assert_eq!(ApiError::from(err).message, messages::ERR_INC_BODY);
    }

    #[tokio::test]
    async fn unsupported_content_type() {
        let err = FormParser::default()
            .parse(&headers("text/plain"), Body::from("hello"))
            .await
            .unwrap_err();
        assert!(matches!(&err, BodyError::Unsupported(ct) if ct == "text/plain"));
        let api = ApiError::from(err);
        assert_eq!(api.kind, ErrorKind::BadRequest);
        assert_eq!(api.message, messages::ERR_UNSUPPORTED_BODY);
    }

    #[tokio::test]
    async fn over_limit_is_too_large() {
        let err = FormParser::new(4)
            .parse(&headers("application/json"), Body::from(r#"{"abc": 1}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { limit: 4 }));
        assert_eq!(ApiError::from(err).kind, ErrorKind::PayloadTooLarge);
    }

    #[tokio::test]
    async fn urlencoded_repeated_keys_become_arrays() {
        let parsed = FormParser::default()
            .parse(
                &headers("application/x-www-form-urlencoded"),
                Body::from("name=bob&tag=a&tag=b&tag=c"),
            )
            .await
            .unwrap();
        assert_eq!(parsed.fields, json!({"name": "bob", "tag": ["a", "b", "c"]}));
        assert_eq!(parsed.encoding, Encoding::Form);
    }

    #[tokio::test]
    async fn multipart_splits_fields_and_files() {
        let body = concat!(
            "--XBOUND\r\n",
            "Content-Disposition: form-data; name=\"username\"\r\n",
            "\r\n",
            "bob\r\n",
            "--XBOUND\r\n",
            "Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n",
            "Content-Type: image/png\r\n",
            "\r\n",
            "PNGDATA\r\n",
            "--XBOUND--\r\n",
        );

        let parsed = FormParser::default()
            .parse(&headers("multipart/form-data; boundary=XBOUND"), Body::from(body))
            .await
            .unwrap();

        assert_eq!(parsed.fields, json!({"username": "bob"}));
        let avatar = parsed.files.first("avatar").unwrap();
        assert_eq!(avatar.file_name.as_deref(), Some("me.png"));
        assert_eq!(avatar.content_type.as_deref(), Some("image/png"));
        assert_eq!(avatar.size, 7);
        assert_eq!(&avatar.bytes[..], b"PNGDATA");
    }

    #[tokio::test]
    async fn multipart_without_boundary_is_malformed() {
        let err = FormParser::default()
            .parse(&headers("multipart/form-data"), Body::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::Malformed { encoding: "multipart", .. }));
    }
}
