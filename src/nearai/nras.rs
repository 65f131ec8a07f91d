use crate::nearai::error::NearAiError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

pub const NRAS_GPU_VERIFIER_URL: &str = "https://nras.attestation.nvidia.com/v3/attest/gpu";

/// Key of the platform-level token in an NRAS response.
pub const PLATFORM_TOKEN_KEY: &str = "JWT";

/// Claim carrying NRAS's overall pass/fail verdict.
pub const OVERALL_RESULT_CLAIM: &str = "x-nvidia-overall-att-result";

/// Decoded claims of one token, or why that token could not be decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClaimEntry {
    Claims(Map<String, Value>),
    Error { error: String },
}

impl ClaimEntry {
    pub fn claims(&self) -> Option<&Map<String, Value>> {
        match self {
            ClaimEntry::Claims(c) => Some(c),
            ClaimEntry::Error { .. } => None,
        }
    }
}

/// Claim source key (`JWT`, `GPU-0`, ...) to decoded claims.
pub type DecodedClaimSet = BTreeMap<String, ClaimEntry>;

/// Decodes an NRAS `/attest/gpu` response.
///
/// The response is a list whose entries are either `["JWT", "<token>"]` pairs
/// or single-level objects such as `{"GPU-0": "<token>"}`. Only string values
/// containing a `.` are treated as tokens. A token that fails to decode is
/// recorded as [`ClaimEntry::Error`] under its key and does not affect the
/// other keys.
pub fn decode_gpu_attestation(response: &Value) -> Result<DecodedClaimSet, NearAiError> {
    let entries = response.as_array().ok_or_else(|| {
        NearAiError::InvalidFormat(
            "expected array response from NVIDIA attestation service".to_string(),
        )
    })?;

    let mut decoded = DecodedClaimSet::new();
    for item in entries {
        match item {
            Value::Array(pair) if pair.len() == 2 => {
                let key = match &pair[0] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                decode_into(&mut decoded, key, &pair[1]);
            }
            Value::Object(map) => {
                for (key, token) in map {
                    decode_into(&mut decoded, key.clone(), token);
                }
            }
            _ => {}
        }
    }

    Ok(decoded)
}

fn decode_into(decoded: &mut DecodedClaimSet, key: String, token: &Value) {
    let Some(token) = token.as_str().filter(|t| t.contains('.')) else {
        return;
    };

    let entry = match decode_claim_token(token) {
        Ok(claims) => ClaimEntry::Claims(claims),
        Err(e) => {
            warn!("Failed to decode {} token: {}", key, e);
            ClaimEntry::Error {
                error: e.to_string(),
            }
        }
    };
    decoded.insert(key, entry);
}

/// Decodes the claims of a compact JWS without verifying its signature.
pub fn decode_claim_token(token: &str) -> Result<Map<String, Value>, NearAiError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(NearAiError::InvalidFormat(format!(
            "expected 3 token segments, got {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|e| NearAiError::InvalidFormat(format!("token payload is not base64url: {e}")))?;

    match serde_json::from_slice::<Value>(&payload)? {
        Value::Object(claims) => Ok(claims),
        _ => Err(NearAiError::InvalidFormat(
            "token claims must be a top-level JSON object".to_string(),
        )),
    }
}

/// The platform token's overall verdict, if the claim is present and boolean.
pub fn overall_attestation_result(claims: &DecodedClaimSet) -> Option<bool> {
    claims
        .get(PLATFORM_TOKEN_KEY)?
        .claims()?
        .get(OVERALL_RESULT_CLAIM)?
        .as_bool()
}
