//! Transport client for the contract-analysis service.
//!
//! Wraps every outbound call with input validation, a per-call wall-clock
//! timeout, and uniform error classification. Nothing above this module
//! touches a raw `reqwest` error or response.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::models::{
    AnalysisResult, ExplainRequest, ExplainResponse, ExtractResponse, NegotiateRequest,
};

/// Upload size cap. A file of exactly this size is accepted; one byte more
/// is rejected before any network call.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Contract source for analysis submission.
#[derive(Debug, Clone)]
pub enum AnalysisSource {
    Text(String),
    File { name: String, bytes: Vec<u8> },
}

pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<ApiClient, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|err| ApiError::NetworkUnreachable(err.to_string()))?;
        Ok(ApiClient { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    /// Submit a contract for analysis. Plain text must be non-empty after
    /// trimming; a file must be non-empty and at most [`MAX_UPLOAD_BYTES`].
    pub async fn submit_for_analysis(
        &self,
        source: AnalysisSource,
        jurisdiction: &str,
    ) -> Result<AnalysisResult, ApiError> {
        let form = match source {
            AnalysisSource::Text(text) => {
                if text.trim().is_empty() {
                    return Err(ApiError::InvalidInput(
                        "contract text is empty".to_string(),
                    ));
                }
                Form::new().text("text", text)
            }
            AnalysisSource::File { name, bytes } => {
                validate_upload(&name, &bytes)?;
                Form::new().part("file", Part::bytes(bytes).file_name(name))
            }
        }
        .text("jurisdiction", jurisdiction.to_string());

        let budget = self.config.analyze_timeout();
        debug!(endpoint = "/analyze_contract/", "submitting contract for analysis");
        let response = self
            .http
            .post(self.url("/analyze_contract/"))
            .multipart(form)
            .timeout(budget)
            .send()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        let response = error_for_status(response).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        decode_analysis(value)
    }

    /// Ask the service to explain one flagged risk in context.
    pub async fn explain_risk(
        &self,
        risk_text: &str,
        contract_context: &str,
    ) -> Result<String, ApiError> {
        if risk_text.trim().is_empty() {
            return Err(ApiError::InvalidInput("risk text is empty".to_string()));
        }
        let budget = self.config.explain_timeout();
        let body = ExplainRequest {
            risk_text: risk_text.to_string(),
            contract_context: contract_context.to_string(),
        };
        let response = self
            .http
            .post(self.url("/explain_risk/"))
            .json(&body)
            .timeout(budget)
            .send()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        let response = error_for_status(response).await?;
        let decoded: ExplainResponse = response
            .json()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        Ok(decoded.explanation)
    }

    /// Extract plain text from an uploaded document.
    pub async fn extract_text(&self, name: &str, bytes: Vec<u8>) -> Result<String, ApiError> {
        validate_upload(name, &bytes)?;
        let budget = self.config.extract_timeout();
        let form = Form::new().part("file", Part::bytes(bytes).file_name(name.to_string()));
        let response = self
            .http
            .post(self.url("/extract_text/"))
            .multipart(form)
            .timeout(budget)
            .send()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        let response = error_for_status(response).await?;
        let decoded: ExtractResponse = response
            .json()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        if decoded.text.trim().is_empty() {
            return Err(ApiError::EmptyExtraction);
        }
        Ok(decoded.text)
    }

    /// Request a redlined copy of the uploaded document. Only word-processor
    /// files are applicable.
    pub async fn request_redline(
        &self,
        name: &str,
        bytes: Vec<u8>,
        original_text: &str,
        jurisdiction: &str,
        risk_context: &str,
    ) -> Result<Vec<u8>, ApiError> {
        if !is_docx(name) {
            return Err(ApiError::InvalidInput(format!(
                "redlining requires a .docx file, got '{name}'"
            )));
        }
        validate_upload(name, &bytes)?;
        let budget = self.config.redline_timeout();
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(name.to_string()))
            .text("original_text", original_text.to_string())
            .text("jurisdiction", jurisdiction.to_string())
            .text("risk_context", risk_context.to_string());
        let response = self
            .http
            .post(self.url("/redline_clause/"))
            .multipart(form)
            .timeout(budget)
            .send()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        let response = error_for_status(response).await?;
        let document = response
            .bytes()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        Ok(document.to_vec())
    }

    // -----------------------------------------------------------------------
    // Negotiation stream
    // -----------------------------------------------------------------------

    /// Open the long-lived negotiation stream. The returned handle yields
    /// raw byte chunks; line decoding and event parsing belong to the
    /// reconciler. No read timeout is applied — the stream lives until the
    /// server closes it or the caller cancels.
    pub async fn open_negotiation_stream(
        &self,
        request: &NegotiateRequest,
    ) -> Result<NegotiationStream, ApiError> {
        let budget = self.config.connect_timeout();
        debug!(endpoint = "/negotiate/chat/", "opening negotiation stream");
        let response = self
            .http
            .post(self.url("/negotiate/chat/"))
            .json(request)
            .send()
            .await
            .map_err(|err| ApiError::from_transport(err, budget))?;
        let response = error_for_status(response).await?;
        Ok(NegotiationStream::from_response(response, budget))
    }
}

/// Byte-chunk source for one negotiation turn.
pub struct NegotiationStream {
    inner: Pin<Box<dyn Stream<Item = Result<Vec<u8>, ApiError>> + Send>>,
}

impl NegotiationStream {
    fn from_response(response: Response, budget: Duration) -> NegotiationStream {
        let inner = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(move |err| ApiError::from_transport(err, budget))
        });
        NegotiationStream { inner: Box::pin(inner) }
    }

    /// Build a stream from in-memory chunks. Lets the reconciler be driven
    /// without a live server.
    pub fn from_chunks(chunks: Vec<Result<Vec<u8>, ApiError>>) -> NegotiationStream {
        NegotiationStream {
            inner: Box::pin(tokio_stream::iter(chunks)),
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, ApiError>> {
        self.inner.next().await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_upload(name: &str, bytes: &[u8]) -> Result<(), ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::InvalidInput(format!("file '{name}' is empty")));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::InvalidInput(format!(
            "file '{name}' exceeds the 10 MiB upload limit"
        )));
    }
    Ok(())
}

pub(crate) fn is_docx(name: &str) -> bool {
    name.rsplit('.')
        .next()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"))
        && name.len() > ".docx".len()
}

async fn error_for_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::ServerError {
        status: status.as_u16(),
        message: server_message(status, &body),
    })
}

/// Pull a human-readable message out of an error body when one exists, else
/// fall back to a generic message by status class.
fn server_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                if !text.trim().is_empty() {
                    return text.to_string();
                }
            }
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() <= 200 {
        return trimmed.to_string();
    }
    if status.is_client_error() {
        "the service rejected the request".to_string()
    } else {
        "the service failed internally".to_string()
    }
}

/// Decode the `{analysis: ...}` envelope. The field may hold the analysis
/// object directly or a JSON-encoded string of it; both decode to the same
/// result, and an undecodable inner string is a malformed response, never a
/// crash.
pub fn decode_analysis(value: serde_json::Value) -> Result<AnalysisResult, ApiError> {
    let inner = value
        .get("analysis")
        .cloned()
        .ok_or_else(|| ApiError::MalformedResponse("missing 'analysis' field".to_string()))?;
    let inner = match inner {
        serde_json::Value::String(encoded) => serde_json::from_str(&encoded).map_err(|err| {
            ApiError::MalformedResponse(format!("inner analysis JSON: {err}"))
        })?,
        other => other,
    };
    serde_json::from_value(inner)
        .map_err(|err| ApiError::MalformedResponse(format!("analysis shape: {err}")))
}
