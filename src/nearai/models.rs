use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Attestation report as returned by `/v1/attestation/report`.
///
/// `intel_quote` and `nvidia_payload` are kept as raw JSON values: the quote
/// decoder rejects non-string quotes itself, and the GPU payload may arrive
/// either JSON-encoded in a string or already structured. A non-string
/// `signing_address` reads as absent and a non-array `all_attestations` as
/// empty, so one odd field never rejects the whole report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAttestationReport {
    #[serde(default, deserialize_with = "lenient_string")]
    pub signing_address: Option<String>,

    #[serde(default)]
    pub intel_quote: Option<Value>,

    #[serde(default)]
    pub nvidia_payload: Option<Value>,

    #[serde(default, deserialize_with = "lenient_siblings")]
    pub all_attestations: Vec<RawSiblingAttestation>,
}

/// Entry of a report's `all_attestations`. Its own nested list is not
/// interpreted and stays raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSiblingAttestation {
    #[serde(default, deserialize_with = "lenient_string")]
    pub signing_address: Option<String>,

    #[serde(default)]
    pub intel_quote: Option<Value>,

    #[serde(default)]
    pub nvidia_payload: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_attestations: Option<Value>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_siblings<'de, D>(deserializer: D) -> Result<Vec<RawSiblingAttestation>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Array(entries)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value(entry).unwrap_or_else(|e| {
                warn!("Attestation {} is not an object: {}", index, e);
                RawSiblingAttestation::default()
            })
        })
        .collect())
}

/// Either a single value or a list of them, as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

impl From<String> for OneOrMany<String> {
    fn from(v: String) -> Self {
        OneOrMany::One(v)
    }
}

impl From<&str> for OneOrMany<String> {
    fn from(v: &str) -> Self {
        OneOrMany::One(v.to_string())
    }
}

impl From<Vec<String>> for OneOrMany<String> {
    fn from(v: Vec<String>) -> Self {
        OneOrMany::Many(v)
    }
}

impl From<&[String]> for OneOrMany<String> {
    fn from(v: &[String]) -> Self {
        OneOrMany::Many(v.to_vec())
    }
}

impl From<Vec<&str>> for OneOrMany<String> {
    fn from(v: Vec<&str>) -> Self {
        OneOrMany::Many(v.into_iter().map(str::to_string).collect())
    }
}

/// Chat completion request body. Field order is the wire order.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub content: String,
    pub role: String,
}

impl ChatRequest {
    pub fn user_stream(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage {
                content: content.into(),
                role: "user".to_string(),
            }],
            stream: true,
            model: model.into(),
        }
    }

    /// Serializes the body once; these exact bytes are both sent and hashed.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Raw streamed chat completion.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub raw_stream_text: String,
    pub chat_id: Option<String>,
}

/// Response of `/v1/signature/{chat_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSignature {
    pub text: String,
    pub signature: String,

    #[serde(default)]
    pub signing_address: Option<String>,

    #[serde(default)]
    pub signing_algo: Option<String>,
}
