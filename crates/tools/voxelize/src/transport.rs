//! Transport layer for the packing and meshing services
//!
//! [`ServiceRequest`] describes a call in service-neutral terms; a
//! [`Transport`] carries it and hands back a [`RawResponse`]. Turning that
//! response into a typed payload (and classifying protocol and decode
//! failures) happens in one place, [`RawResponse::into_payload`], so every
//! transport implementation reports errors the same way.
//!
//! Nothing in this module retries. A failed geometry job is reported to the
//! caller, who decides whether running it again is safe.

use crate::artifact::ArtifactPayload;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// The two remote services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Packing,
    Meshing,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Packing => write!(f, "packing"),
            Service::Meshing => write!(f, "meshing"),
        }
    }
}

/// Expected kind of a successful response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Json,
    Binary,
}

impl Accept {
    pub fn mime(&self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::Binary => "application/octet-stream",
        }
    }
}

/// A binary part of a multipart form
#[derive(Debug, Clone)]
pub struct FilePart {
    pub name: String,
    pub file_name: String,
    pub payload: ArtifactPayload,
}

/// Multipart form: scalar parameters plus binary parts
///
/// Field values are JSON values. Strings go on the wire as-is; everything else
/// (numbers, vectors, booleans, null) as compact JSON text, so a vector is
/// always an ordered numeric array and an explicit `null` stays distinguishable
/// from an omitted field.
#[derive(Debug, Clone, Default)]
pub struct Form {
    pub fields: Vec<(String, Value)>,
    pub parts: Vec<FilePart>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn part(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        payload: ArtifactPayload,
    ) -> Self {
        self.parts.push(FilePart {
            name: name.into(),
            file_name: file_name.into(),
            payload,
        });
        self
    }

    /// Wire text of a named field, if present
    pub fn field_text(&self, name: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| field_text(v))
    }

    /// Binary part by name
    pub fn part_named(&self, name: &str) -> Option<&FilePart> {
        self.parts.iter().find(|p| p.name == name)
    }
}

/// Encode a form field value as wire text
pub fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Request body variants
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Form),
}

/// A call to one endpoint of one service
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub service: Service,
    pub method: Method,
    pub endpoint: String,
    pub body: RequestBody,
    pub accept: Accept,
}

impl ServiceRequest {
    pub fn new(service: Service, method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            service,
            method,
            endpoint: endpoint.into(),
            body: RequestBody::Empty,
            accept: Accept::Json,
        }
    }

    pub fn get(service: Service, endpoint: impl Into<String>) -> Self {
        Self::new(service, Method::GET, endpoint)
    }

    pub fn post(service: Service, endpoint: impl Into<String>) -> Self {
        Self::new(service, Method::POST, endpoint)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, form: Form) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn accept(mut self, accept: Accept) -> Self {
        self.accept = accept;
        self
    }

    /// The multipart form, if this request carries one
    pub fn multipart(&self) -> Option<&Form> {
        match &self.body {
            RequestBody::Multipart(form) => Some(form),
            _ => None,
        }
    }
}

/// Decoded body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

/// A response as received, before classification
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub service: Service,
    pub status: u16,
    pub content_type: Option<String>,
    /// Response headers, names lowercased
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(service: Service, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            service,
            status,
            content_type: None,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
    }

    fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/html"))
    }

    /// Failure reported through the `error` / `success` response headers
    ///
    /// The `error` header text is the message. A falsy `success` header without
    /// one falls back to the body text.
    fn header_failure(&self) -> Option<String> {
        if let Some(error) = self.header("error") {
            return Some(error.to_string());
        }
        let flag = self.header("success")?;
        if !matches!(
            flag.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no"
        ) {
            return None;
        }
        let text = String::from_utf8_lossy(&self.body).trim().to_string();
        Some(if text.is_empty() {
            "unknown error occurred".to_string()
        } else {
            text
        })
    }

    fn remote_error(&self, message: String) -> Error {
        warn!(
            service = %self.service,
            status = self.status,
            "remote service returned an error"
        );
        Error::RemoteService {
            service: self.service,
            status: self.status,
            message,
        }
    }

    /// Classify the response against the expected body kind
    pub fn into_payload(self, accept: Accept) -> Result<Payload> {
        if !self.is_success() {
            let message = String::from_utf8_lossy(&self.body).into_owned();
            return Err(self.remote_error(message));
        }
        if let Some(message) = self.header_failure() {
            return Err(self.remote_error(message));
        }

        match accept {
            Accept::Json => {
                let value: Value = serde_json::from_slice(&self.body).map_err(|e| {
                    Error::decode(format!(
                        "{} service returned invalid JSON: {}",
                        self.service, e
                    ))
                })?;
                unwrap_envelope(self.service, self.status, value).map(Payload::Json)
            }
            Accept::Binary => {
                if self.is_json() || self.content_type.is_none() {
                    // Binary endpoints report handled failures as a JSON envelope
                    if let Ok(value) = serde_json::from_slice::<Value>(&self.body) {
                        if value.get("success").and_then(Value::as_bool) == Some(false)
                            || value.get("error").is_some()
                        {
                            let text = String::from_utf8_lossy(&self.body).into_owned();
                            return Err(self.remote_error(text));
                        }
                    }
                }
                if self.is_json() {
                    return Err(Error::decode(format!(
                        "{} service returned JSON where binary data was expected",
                        self.service
                    )));
                }
                if self.is_html() {
                    return Err(Error::decode(format!(
                        "{} service returned HTML where binary data was expected",
                        self.service
                    )));
                }
                if self.body.is_empty() {
                    return Err(Error::decode(format!(
                        "{} service returned an empty binary body",
                        self.service
                    )));
                }
                Ok(Payload::Binary(self.body))
            }
        }
    }

    pub fn into_json(self) -> Result<Value> {
        match self.into_payload(Accept::Json)? {
            Payload::Json(value) => Ok(value),
            Payload::Binary(_) => Err(Error::decode("expected JSON payload")),
        }
    }

    pub fn into_binary(self) -> Result<Vec<u8>> {
        match self.into_payload(Accept::Binary)? {
            Payload::Binary(bytes) => Ok(bytes),
            Payload::Json(_) => Err(Error::decode("expected binary payload")),
        }
    }
}

/// Strip the `{ success, result, error }` envelope some endpoints use
fn unwrap_envelope(service: Service, status: u16, value: Value) -> Result<Value> {
    let Some(object) = value.as_object() else {
        return Ok(value);
    };

    match object.get("success").and_then(Value::as_bool) {
        Some(false) => {
            let message = object
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            Err(Error::RemoteService {
                service,
                status,
                message,
            })
        }
        Some(true) if object.contains_key("result") => {
            let mut object = object.clone();
            Ok(object.remove("result").unwrap_or(Value::Null))
        }
        _ => Ok(value),
    }
}

/// Carries service requests to the remote APIs
///
/// Implementations must be safe to share between concurrent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the response without interpreting it
    async fn send(&self, request: ServiceRequest) -> Result<RawResponse>;

    /// Send a request expecting binary data and write the body to a file
    ///
    /// Returns the number of bytes written.
    async fn download(&self, request: ServiceRequest, destination: &Path) -> Result<u64> {
        let bytes = self.send(request).await?.into_binary()?;
        write_file(destination, &bytes).await
    }
}

/// Write a downloaded body, creating parent directories as needed
async fn write_file(destination: &Path, bytes: &[u8]) -> Result<u64> {
    create_parent(destination).await?;
    tokio::fs::write(destination, bytes).await?;
    Ok(bytes.len() as u64)
}

async fn create_parent(destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: ServiceRequest) -> Result<RawResponse> {
        (**self).send(request).await
    }

    async fn download(&self, request: ServiceRequest, destination: &Path) -> Result<u64> {
        (**self).download(request, destination).await
    }
}

/// HTTP transport backed by a pooled `reqwest` client
///
/// Every request carries the API key both as a bearer token and as
/// `X-API-Key`. No timeout is set beyond reqwest's defaults; pass a
/// configured client through [`HttpTransport::with_client`] to add one.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl HttpTransport {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: Arc<ClientConfig>, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the HTTP request for a service call without sending it
    pub async fn build_request(&self, request: ServiceRequest) -> Result<reqwest::RequestBuilder> {
        let service = request.service;
        let url = self.config.endpoint_url(service, &request.endpoint);
        let api_key = self.config.api_key();

        let builder = self
            .client
            .request(request.method, url)
            .bearer_auth(api_key)
            .header("X-API-Key", api_key)
            .header(ACCEPT, request.accept.mime());

        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(form) => {
                let mut multipart = reqwest::multipart::Form::new();
                for (name, value) in &form.fields {
                    multipart = multipart.text(name.clone(), field_text(value));
                }
                for part in form.parts {
                    let len = part.payload.len();
                    let body = part.payload.into_body().await?;
                    let file_part = reqwest::multipart::Part::stream_with_length(body, len)
                        .file_name(part.file_name)
                        .mime_str(Accept::Binary.mime())
                        .map_err(|e| transport_error(service, e))?;
                    multipart = multipart.part(part.name, file_part);
                }
                builder.multipart(multipart)
            }
        };

        Ok(builder)
    }

    async fn dispatch(&self, request: ServiceRequest) -> Result<reqwest::Response> {
        let service = request.service;
        debug!(
            service = %service,
            method = %request.method,
            endpoint = %request.endpoint,
            "dispatching request"
        );
        self.build_request(request)
            .await?
            .send()
            .await
            .map_err(|e| transport_error(service, e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ServiceRequest) -> Result<RawResponse> {
        let service = request.service;
        let response = self.dispatch(request).await?;

        let head = response_head(service, &response);
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(service, e))?;

        debug!(service = %service, status = head.status, bytes = body.len(), "received response");

        Ok(RawResponse {
            body: body.to_vec(),
            ..head
        })
    }

    async fn download(&self, request: ServiceRequest, destination: &Path) -> Result<u64> {
        let service = request.service;
        let mut response = self.dispatch(request).await?;
        let head = response_head(service, &response);

        // Only a declared binary body with no failure signal is streamed to disk;
        // anything else is buffered and classified like a regular response
        let streamable = head.is_success()
            && head.header_failure().is_none()
            && head.content_type.is_some()
            && !head.is_json()
            && !head.is_html();
        if !streamable {
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(service, e))?;
            let bytes = RawResponse {
                body: body.to_vec(),
                ..head
            }
            .into_binary()?;
            return write_file(destination, &bytes).await;
        }

        create_parent(destination).await?;
        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;

        let outcome: Result<()> = async {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| transport_error(service, e))?
            {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if outcome.is_err() || written == 0 {
            drop(file);
            let _ = tokio::fs::remove_file(destination).await;
            outcome?;
            return Err(Error::decode(format!(
                "{} service returned an empty binary body",
                service
            )));
        }

        debug!(service = %service, bytes = written, path = %destination.display(), "download complete");
        Ok(written)
    }
}

/// Status and headers of a response, with an empty body
fn response_head(service: Service, response: &reqwest::Response) -> RawResponse {
    let headers = response.headers();
    RawResponse {
        service,
        status: response.status().as_u16(),
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: Vec::new(),
    }
}

fn transport_error(service: Service, error: reqwest::Error) -> Error {
    let message = if error.is_timeout() {
        format!("request timed out: {}", error)
    } else if error.is_connect() {
        format!("failed to connect: {}", error)
    } else {
        error.to_string()
    };
    Error::Transport { service, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Arc<ClientConfig> {
        Arc::new(
            ClientConfig::new("test-key", "http://packing.test/", "http://meshing.test/api")
                .unwrap(),
        )
    }

    #[test]
    fn test_field_text_encoding() {
        assert_eq!(field_text(&json!("fcc")), "fcc");
        assert_eq!(field_text(&json!(2.5)), "2.5");
        assert_eq!(field_text(&json!([0.0, 0.0, 1.0])), "[0.0,0.0,1.0]");
        assert_eq!(field_text(&json!(true)), "true");
        assert_eq!(field_text(&Value::Null), "null");
        assert_eq!(field_text(&json!(-1)), "-1");
    }

    #[test]
    fn test_form_lookup() {
        let form = Form::new()
            .field("cell_type", "bcc")
            .field("clear_direction", Value::Null)
            .part(
                "artifact",
                "artifact.vox",
                ArtifactPayload::Memory(vec![1u8, 2].into()),
            );
        assert_eq!(form.field_text("cell_type").as_deref(), Some("bcc"));
        assert_eq!(form.field_text("clear_direction").as_deref(), Some("null"));
        assert_eq!(form.field_text("missing"), None);
        assert_eq!(form.part_named("artifact").unwrap().payload.len(), 2);
    }

    #[test]
    fn test_remote_error_verbatim() {
        let raw = RawResponse::new(Service::Packing, 500, r#"{"error":"overloaded"}"#);
        let err = raw.into_payload(Accept::Binary).unwrap_err();
        match err {
            Error::RemoteService {
                service,
                status,
                message,
            } => {
                assert_eq!(service, Service::Packing);
                assert_eq!(status, 500);
                assert_eq!(message, r#"{"error":"overloaded"}"#);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let raw = RawResponse::new(Service::Meshing, 200, "<html>oops</html>");
        assert!(matches!(
            raw.into_payload(Accept::Json),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_binary_mismatch_is_decode_error() {
        let empty = RawResponse::new(Service::Meshing, 200, Vec::<u8>::new());
        assert!(matches!(empty.into_binary(), Err(Error::Decode(_))));

        let html = RawResponse::new(Service::Meshing, 200, "<html></html>")
            .with_content_type("text/html; charset=utf-8");
        assert!(matches!(html.into_binary(), Err(Error::Decode(_))));

        let json = RawResponse::new(Service::Meshing, 200, r#"{"vertices":[]}"#)
            .with_content_type("application/json");
        assert!(matches!(json.into_binary(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_binary_error_envelope() {
        let raw = RawResponse::new(
            Service::Packing,
            200,
            r#"{"success":false,"error":"mesh is not watertight"}"#,
        )
        .with_content_type("application/json");
        let err = raw.into_binary().unwrap_err();
        assert!(matches!(err, Error::RemoteService { status: 200, .. }));
        assert!(err.to_string().contains("watertight"));
    }

    #[test]
    fn test_binary_error_body_without_content_type() {
        let raw = RawResponse::new(
            Service::Packing,
            200,
            r#"{"success":false,"error":"mesh is not watertight"}"#,
        );
        match raw.into_binary().unwrap_err() {
            Error::RemoteService {
                status, message, ..
            } => {
                assert_eq!(status, 200);
                assert_eq!(
                    message,
                    r#"{"success":false,"error":"mesh is not watertight"}"#
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Undeclared bodies that are not failure-shaped are still accepted
        let opaque = RawResponse::new(Service::Packing, 200, vec![7u8, 0, 7]);
        assert_eq!(opaque.into_binary().unwrap(), vec![7u8, 0, 7]);
    }

    #[test]
    fn test_error_header_is_remote_error() {
        for accept in [Accept::Binary, Accept::Json] {
            let raw = RawResponse::new(Service::Meshing, 200, r#"{"volume":1.0}"#)
                .with_content_type("application/octet-stream")
                .with_header("Error", "beam diameter too small for cell size");
            match raw.into_payload(accept).unwrap_err() {
                Error::RemoteService {
                    service, message, ..
                } => {
                    assert_eq!(service, Service::Meshing);
                    assert_eq!(message, "beam diameter too small for cell size");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_success_header() {
        let failed = RawResponse::new(Service::Meshing, 200, "meshing job failed")
            .with_content_type("application/octet-stream")
            .with_header("success", "False");
        match failed.into_binary().unwrap_err() {
            Error::RemoteService { message, .. } => assert_eq!(message, "meshing job failed"),
            other => panic!("unexpected error: {other:?}"),
        }

        let bare = RawResponse::new(Service::Meshing, 200, Vec::<u8>::new())
            .with_header("success", "");
        assert!(matches!(
            bare.into_binary(),
            Err(Error::RemoteService { .. })
        ));

        let ok = RawResponse::new(Service::Meshing, 200, b"solid x".to_vec())
            .with_content_type("model/stl")
            .with_header("SUCCESS", "True");
        assert_eq!(ok.header("success"), Some("True"));
        assert_eq!(ok.into_binary().unwrap(), b"solid x".to_vec());
    }

    #[test]
    fn test_binary_passthrough() {
        let raw = RawResponse::new(Service::Packing, 200, vec![0u8, 159, 146, 150])
            .with_content_type("application/octet-stream");
        assert_eq!(raw.into_binary().unwrap(), vec![0u8, 159, 146, 150]);
    }

    #[test]
    fn test_json_envelope() {
        let ok = RawResponse::new(
            Service::Meshing,
            200,
            r#"{"success":true,"result":{"volume":12.5}}"#,
        );
        assert_eq!(ok.into_json().unwrap(), json!({"volume": 12.5}));

        let plain = RawResponse::new(Service::Meshing, 200, r#"{"volume":3.0}"#);
        assert_eq!(plain.into_json().unwrap(), json!({"volume": 3.0}));

        let failed = RawResponse::new(
            Service::Meshing,
            200,
            r#"{"success":false,"error":"unsupported cell"}"#,
        );
        let err = failed.into_json().unwrap_err();
        match err {
            Error::RemoteService { message, .. } => assert_eq!(message, "unsupported cell"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_carries_credentials() {
        let transport = HttpTransport::new(config());
        let request = ServiceRequest::get(Service::Meshing, "/status");
        let built = transport
            .build_request(request)
            .await
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(built.method(), &Method::GET);
        assert_eq!(built.url().as_str(), "http://meshing.test/api/status");
        assert_eq!(
            built.headers().get("authorization").unwrap(),
            "Bearer test-key"
        );
        assert_eq!(built.headers().get("x-api-key").unwrap(), "test-key");
        assert_eq!(built.headers().get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_multipart_request_builds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"voxels").unwrap();
        let payload = crate::artifact::ArtifactSource::from(file.path())
            .normalize()
            .await
            .unwrap();

        let transport = HttpTransport::new(config());
        let request = ServiceRequest::post(Service::Packing, "visualize")
            .accept(Accept::Binary)
            .form(Form::new().field("cell_type", "fcc").part(
                "artifact",
                "artifact.vox",
                payload,
            ));
        let built = transport
            .build_request(request)
            .await
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(built.url().as_str(), "http://packing.test/visualize");
        let content_type = built
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
        assert_eq!(
            built.headers().get("accept").unwrap(),
            "application/octet-stream"
        );
    }

    /// Serve one canned HTTP response on a local port and return its base URL
    async fn serve_once(response: String) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    fn http_response(headers: &[(&str, &str)], body: &str) -> String {
        let mut text = String::from("HTTP/1.1 200 OK\r\nconnection: close\r\n");
        for (name, value) in headers {
            text.push_str(&format!("{name}: {value}\r\n"));
        }
        text.push_str(&format!("content-length: {}\r\n\r\n{}", body.len(), body));
        text
    }

    fn local_transport(url: &str) -> HttpTransport {
        HttpTransport::new(Arc::new(ClientConfig::new("key", url, url).unwrap()))
    }

    #[tokio::test]
    async fn test_download_without_content_type_is_buffered() {
        let url = serve_once(http_response(&[], "voxels")).await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested").join("part.vox");

        let written = local_transport(&url)
            .download(
                ServiceRequest::post(Service::Packing, "pack").accept(Accept::Binary),
                &destination,
            )
            .await
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&destination).unwrap(), b"voxels");
    }

    #[tokio::test]
    async fn test_download_failure_signals_write_nothing() {
        let dir = tempfile::tempdir().unwrap();

        let url = serve_once(http_response(
            &[
                ("content-type", "application/octet-stream"),
                ("error", "mesh is not watertight"),
            ],
            "",
        ))
        .await;
        let destination = dir.path().join("header.vox");
        let err = local_transport(&url)
            .download(
                ServiceRequest::post(Service::Packing, "pack").accept(Accept::Binary),
                &destination,
            )
            .await
            .unwrap_err();
        match err {
            Error::RemoteService { message, .. } => assert_eq!(message, "mesh is not watertight"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!destination.exists());

        let url = serve_once(http_response(&[], r#"{"success":false,"error":"no cells fit"}"#)).await;
        let destination = dir.path().join("body.vox");
        let err = local_transport(&url)
            .download(
                ServiceRequest::post(Service::Packing, "pack").accept(Accept::Binary),
                &destination,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteService { status: 200, .. }));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let config = Arc::new(
            ClientConfig::new("key", "http://127.0.0.1:9", "http://127.0.0.1:9").unwrap(),
        );
        let transport = HttpTransport::new(config);
        let err = transport
            .send(ServiceRequest::get(Service::Packing, "status"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                service: Service::Packing,
                ..
            }
        ));
        assert!(err.is_retryable());
    }
}
