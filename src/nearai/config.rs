use std::fmt;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://cloud-api.near.ai";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for [`crate::nearai::client::NearAiClient`].
///
/// Built by the caller; nothing in the library reads the process environment.
#[derive(Clone)]
pub struct NearAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub nras_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for NearAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            nras_url: crate::nearai::nras::NRAS_GPU_VERIFIER_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl NearAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.base_url = normalize_base_url(base_url.as_ref());
        self
    }

    pub fn with_nras_url(mut self, nras_url: impl Into<String>) -> Self {
        self.nras_url = nras_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.trim().is_empty())
    }
}

impl fmt::Debug for NearAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NearAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("nras_url", &self.nras_url)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn normalize_base_url(input: &str) -> String {
    let trimmed = input.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
    trimmed.to_string()
}
