use crate::nearai::models::{RawAttestationReport, RawSiblingAttestation};
use crate::nearai::quote::{decode_intel_quote, IntelQuote};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

/// Decoded form of a [`RawAttestationReport`].
///
/// Only the top-level report carries decoded siblings in `all_attestations`.
/// A sibling never recurses: if the service nested a further list inside a
/// sibling, it is kept verbatim, whatever its shape, in
/// `undecoded_attestations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedAttestationReport {
    pub signing_address: Option<String>,
    pub intel_quote: IntelQuote,
    pub nvidia_payload: Option<Value>,
    pub all_attestations: Vec<DecodedAttestationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undecoded_attestations: Option<Value>,
}

/// GPU evidence to forward to NRAS, tagged with the attestation it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuPayload {
    pub signing_address: Option<String>,
    pub payload: String,
}

pub fn decode_attestation_report(report: &RawAttestationReport) -> DecodedAttestationReport {
    let all_attestations = report
        .all_attestations
        .iter()
        .enumerate()
        .map(|(index, attestation)| decode_sibling(index, attestation))
        .collect();

    DecodedAttestationReport {
        signing_address: report.signing_address.clone(),
        intel_quote: decode_intel_quote(report.intel_quote.as_ref()).into(),
        nvidia_payload: decode_nvidia_payload(report.nvidia_payload.as_ref(), None),
        all_attestations,
        undecoded_attestations: None,
    }
}

fn decode_sibling(index: usize, attestation: &RawSiblingAttestation) -> DecodedAttestationReport {
    DecodedAttestationReport {
        signing_address: attestation.signing_address.clone(),
        intel_quote: decode_intel_quote(attestation.intel_quote.as_ref()).into(),
        nvidia_payload: decode_nvidia_payload(attestation.nvidia_payload.as_ref(), Some(index)),
        all_attestations: Vec::new(),
        undecoded_attestations: attestation.all_attestations.clone(),
    }
}

fn decode_nvidia_payload(payload: Option<&Value>, index: Option<usize>) -> Option<Value> {
    match payload? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                match index {
                    Some(i) => warn!("Failed to parse nvidia_payload for attestation {}: {}", i, e),
                    None => warn!("Failed to parse nvidia_payload: {}", e),
                }
                Some(json!({ "error": e.to_string(), "raw": s }))
            }
        },
        other => Some(other.clone()),
    }
}

impl DecodedAttestationReport {
    /// Signing addresses of this report and its siblings, first occurrence
    /// kept, compared without regard to case.
    pub fn signing_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::new();
        let candidates = std::iter::once(self)
            .chain(self.all_attestations.iter())
            .filter_map(|a| a.signing_address.as_deref())
            .filter(|a| !a.trim().is_empty());

        for address in candidates {
            if !addresses.iter().any(|seen| seen.eq_ignore_ascii_case(address)) {
                addresses.push(address.to_string());
            }
        }
        addresses
    }

    pub fn has_nvidia_payload(&self) -> bool {
        self.nvidia_payload.is_some()
            || self
                .all_attestations
                .iter()
                .any(|a| a.nvidia_payload.is_some())
    }
}

/// Raw GPU payloads of a report and its siblings, in report order.
///
/// NRAS expects the payload exactly as the service produced it, so string
/// payloads are forwarded untouched and structured ones are re-serialized.
pub fn gpu_payloads(report: &RawAttestationReport) -> Vec<GpuPayload> {
    let siblings = report
        .all_attestations
        .iter()
        .map(|a| (&a.signing_address, &a.nvidia_payload));

    std::iter::once((&report.signing_address, &report.nvidia_payload))
        .chain(siblings)
        .filter_map(|(signing_address, nvidia_payload)| {
            let payload = match nvidia_payload.as_ref()? {
                Value::Null => return None,
                Value::String(s) if s.is_empty() => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(GpuPayload {
                signing_address: signing_address.clone(),
                payload,
            })
        })
        .collect()
}
