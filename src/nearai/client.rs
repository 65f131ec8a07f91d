use crate::nearai::config::NearAiConfig;
use crate::nearai::error::NearAiError;
use crate::nearai::models::{ChatCompletion, ChatSignature, RawAttestationReport};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

/// Remote side of a verification: the confidential cloud plus the NVIDIA
/// attestation service.
#[async_trait]
pub trait ConfidentialCloud: Send + Sync {
    async fn fetch_attestation_report(&self, model: &str)
        -> Result<RawAttestationReport, NearAiError>;

    /// Submits one raw GPU evidence payload to NRAS and returns its JSON reply.
    async fn fetch_gpu_attestation(&self, payload: &str) -> Result<Value, NearAiError>;

    /// Sends `request_body` verbatim and returns the full streamed reply.
    async fn fetch_chat_completion(&self, request_body: &str)
        -> Result<ChatCompletion, NearAiError>;

    async fn fetch_signature(&self, chat_id: &str, model: &str)
        -> Result<ChatSignature, NearAiError>;
}

pub struct NearAiClient {
    config: NearAiConfig,
    http: reqwest::Client,
}

impl NearAiClient {
    pub fn new(config: NearAiConfig) -> Result<Self, NearAiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("nearai-verify/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &NearAiConfig {
        &self.config
    }

    fn api_key(&self) -> Result<&str, NearAiError> {
        match self.config.api_key.as_deref() {
            Some(k) if !k.trim().is_empty() => Ok(k),
            _ => Err(NearAiError::Unconfigured),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// `{base}/v1/signature/{chat_id}` with the id percent-encoded as a single
    /// path segment.
    fn signature_url(&self, chat_id: &str) -> Result<reqwest::Url, NearAiError> {
        let base = &self.config.base_url;
        let mut url = reqwest::Url::parse(base)
            .map_err(|e| NearAiError::InvalidFormat(format!("invalid base URL {}: {}", base, e)))?;

        url.path_segments_mut()
            .map_err(|_| NearAiError::InvalidFormat(format!("base URL {} cannot carry a path", base)))?
            .pop_if_empty()
            .extend(["v1", "signature", chat_id]);

        Ok(url)
    }

    /// Sends `req`, maps transport failures and non-2xx statuses, and returns
    /// the body text.
    async fn send_text(url: &str, req: reqwest::RequestBuilder) -> Result<String, NearAiError> {
        let res = req
            .send()
            .await
            .map_err(|e| NearAiError::from_transport(url, e))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| NearAiError::from_transport(url, e))?;

        if !status.is_success() {
            return Err(NearAiError::HttpStatus {
                url: url.to_string(),
                status,
                body: text,
            });
        }

        trace!("{} returned {} bytes", url, text.len());
        Ok(text)
    }

    async fn send_json<T: DeserializeOwned>(
        url: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T, NearAiError> {
        let text = Self::send_text(url, req).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ConfidentialCloud for NearAiClient {
    async fn fetch_attestation_report(
        &self,
        model: &str,
    ) -> Result<RawAttestationReport, NearAiError> {
        let url = self.url("/v1/attestation/report");
        debug!("Fetching attestation report for model={}", model);

        let mut req = self.http.get(&url).query(&[("model", model)]);

        // The report may be public, but include auth when present.
        if let Ok(api_key) = self.api_key() {
            req = req.bearer_auth(api_key);
        }

        Self::send_json(&url, req).await
    }

    async fn fetch_gpu_attestation(&self, payload: &str) -> Result<Value, NearAiError> {
        let url = self.config.nras_url.as_str();
        debug!("Submitting GPU evidence to {}", url);

        let req = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string());

        Self::send_json(url, req).await
    }

    async fn fetch_chat_completion(
        &self,
        request_body: &str,
    ) -> Result<ChatCompletion, NearAiError> {
        let api_key = self.api_key()?;
        let url = self.url("/v1/chat/completions");

        // Pre-serialized body: the hashed bytes must be the bytes sent.
        let req = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .bearer_auth(api_key)
            .body(request_body.to_string());

        let raw_stream_text = Self::send_text(&url, req).await?;
        let chat_id = extract_chat_completion_id(&raw_stream_text);

        Ok(ChatCompletion {
            raw_stream_text,
            chat_id,
        })
    }

    async fn fetch_signature(
        &self,
        chat_id: &str,
        model: &str,
    ) -> Result<ChatSignature, NearAiError> {
        let api_key = self.api_key()?;
        let url = self.signature_url(chat_id)?;

        let req = self
            .http
            .get(url.clone())
            .query(&[("model", model), ("signing_algo", "ecdsa")])
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(api_key);

        Self::send_json(url.as_str(), req).await
    }
}

/// Chat id of a streamed completion, taken from the `id` field of the first
/// `data: {` line. `None` when there is no such line, it is not JSON, or the id
/// is missing or empty.
pub fn extract_chat_completion_id(raw_stream_text: &str) -> Option<String> {
    let line = raw_stream_text
        .split('\n')
        .find(|line| line.starts_with("data: {"))?;

    let event: Value = serde_json::from_str(&line["data: ".len()..]).ok()?;
    event
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
