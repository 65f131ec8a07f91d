use thiserror::Error;

#[derive(Debug, Error)]
pub enum NearAiError {
    #[error("Near.AI is not configured (missing API key)")]
    Unconfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Signature recovery error: {0}")]
    Signature(String),

    #[error("chat completion stream did not carry a chat id")]
    MissingChatId,
}

impl NearAiError {
    /// Classifies a reqwest failure for `url`, keeping timeouts distinct from
    /// other transport errors.
    pub fn from_transport(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Http(e)
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout { .. } | Self::HttpStatus { .. }
        )
    }
}

impl From<secp256k1::Error> for NearAiError {
    fn from(e: secp256k1::Error) -> Self {
        Self::Signature(e.to_string())
    }
}
