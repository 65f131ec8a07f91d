use crate::nearai::attestation::{
    decode_attestation_report, gpu_payloads, DecodedAttestationReport, GpuPayload,
};
use crate::nearai::client::ConfidentialCloud;
use crate::nearai::error::NearAiError;
use crate::nearai::hashing::{compare_hashes, ContentHashPair, HashReconciliation};
use crate::nearai::models::{ChatRequest, ChatSignature};
use crate::nearai::nras::{decode_gpu_attestation, overall_attestation_result, DecodedClaimSet};
use crate::nearai::signature::{verify_signature, SignatureVerdict};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Steps of a verification run, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Init,
    ReportFetched,
    ReportDecoded,
    CoprocessorVerified,
    CoprocessorSkipped,
    ChatSent,
    HashesComputed,
    SignatureFetched,
    HashesReconciled,
    SignatureVerified,
    Done,
}

/// NRAS outcome for one GPU evidence payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuPayloadVerdict {
    pub signing_address: Option<String>,
    pub claims: Option<DecodedClaimSet>,
    pub overall_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GpuPayloadVerdict {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.overall_result == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CoprocessorCheck {
    Skipped {
        reason: String,
    },
    Checked {
        payloads: Vec<GpuPayloadVerdict>,
        passed: bool,
    },
}

impl CoprocessorCheck {
    /// A skipped check does not count against the verdict.
    pub fn is_acceptable(&self) -> bool {
        match self {
            CoprocessorCheck::Skipped { .. } => true,
            CoprocessorCheck::Checked { passed, .. } => *passed,
        }
    }
}

/// Hash reconciliation and signature verdict for one signed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeVerdict {
    pub hash_reconciliation: HashReconciliation,
    pub signature: SignatureVerdict,
}

impl ExchangeVerdict {
    pub fn is_valid(&self) -> bool {
        self.hash_reconciliation.is_valid() && self.signature.valid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub model: String,
    pub chat_id: String,
    pub hashes: ContentHashPair,
    pub signing_addresses: Vec<String>,
    pub attestation: DecodedAttestationReport,
    pub coprocessor: CoprocessorCheck,
    pub hash_reconciliation: HashReconciliation,
    pub signature: SignatureVerdict,
    pub stages: Vec<VerificationStage>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.coprocessor.is_acceptable()
            && self.hash_reconciliation.is_valid()
            && self.signature.valid
    }
}

/// Checks an already fetched exchange against the locally computed hashes and
/// the signing addresses of the attestation report.
///
/// Both checks always run so a hash mismatch never hides the signature result
/// and the reverse.
pub fn reconcile_exchange(
    hashes: &ContentHashPair,
    signature: &ChatSignature,
    signing_addresses: &[String],
) -> ExchangeVerdict {
    let hash_reconciliation =
        compare_hashes(&signature.text, &hashes.request_hash, &hashes.response_hash);
    let signature = verify_signature(&signature.text, &signature.signature, signing_addresses);

    ExchangeVerdict {
        hash_reconciliation,
        signature,
    }
}

/// Runs the full attestation and chat verification flow against a
/// [`ConfidentialCloud`].
pub struct ChatVerifier<C> {
    cloud: C,
}

impl<C: ConfidentialCloud> ChatVerifier<C> {
    pub fn new(cloud: C) -> Self {
        Self { cloud }
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Fetches and decodes the attestation report of `model`.
    pub async fn attestation_report(
        &self,
        model: &str,
    ) -> Result<DecodedAttestationReport, NearAiError> {
        let raw = self.cloud.fetch_attestation_report(model).await?;
        Ok(decode_attestation_report(&raw))
    }

    pub async fn verify_chat(
        &self,
        model: &str,
        content: &str,
    ) -> Result<VerificationReport, NearAiError> {
        let mut stages = vec![VerificationStage::Init];
        info!("Verifying chat exchange for model={}", model);

        let raw = self.cloud.fetch_attestation_report(model).await.map_err(|e| {
            error!("Failed to fetch attestation report for {}: {}", model, e);
            e
        })?;
        stages.push(VerificationStage::ReportFetched);

        let attestation = decode_attestation_report(&raw);
        let signing_addresses = attestation.signing_addresses();
        debug!(
            "Decoded attestation report: {} signing address(es), {} sibling attestation(s)",
            signing_addresses.len(),
            attestation.all_attestations.len()
        );
        if signing_addresses.is_empty() {
            warn!("Attestation report for {} carries no signing address", model);
        }
        stages.push(VerificationStage::ReportDecoded);

        let coprocessor = self.check_coprocessor(&gpu_payloads(&raw)).await;
        stages.push(match coprocessor {
            CoprocessorCheck::Skipped { .. } => VerificationStage::CoprocessorSkipped,
            CoprocessorCheck::Checked { .. } => VerificationStage::CoprocessorVerified,
        });

        let request_body = ChatRequest::user_stream(model, content).to_body()?;
        let completion = self.cloud.fetch_chat_completion(&request_body).await?;
        stages.push(VerificationStage::ChatSent);

        let chat_id = completion.chat_id.clone().ok_or_else(|| {
            error!("Chat completion for {} did not carry a chat id", model);
            NearAiError::MissingChatId
        })?;
        debug!("Chat completion id={}", chat_id);

        let hashes = ContentHashPair::compute(&request_body, &completion.raw_stream_text);
        debug!(
            "Computed request_hash={} response_hash={}",
            hashes.request_hash, hashes.response_hash
        );
        stages.push(VerificationStage::HashesComputed);

        let signature = self.cloud.fetch_signature(&chat_id, model).await?;
        stages.push(VerificationStage::SignatureFetched);

        let exchange = reconcile_exchange(&hashes, &signature, &signing_addresses);
        stages.push(VerificationStage::HashesReconciled);
        stages.push(VerificationStage::SignatureVerified);

        if exchange.hash_reconciliation.is_valid() {
            info!("Signed hashes match the exchange for chat {}", chat_id);
        } else {
            warn!("Signed hashes do not match the exchange for chat {}", chat_id);
        }
        if exchange.signature.valid {
            info!(
                "Signature for chat {} recovered to {}",
                chat_id,
                exchange.signature.recovered_address.as_deref().unwrap_or_default()
            );
        } else {
            warn!(
                "Signature for chat {} did not match any attested address (recovered={:?}, error={:?})",
                chat_id, exchange.signature.recovered_address, exchange.signature.error
            );
        }

        stages.push(VerificationStage::Done);

        Ok(VerificationReport {
            model: model.to_string(),
            chat_id,
            hashes,
            signing_addresses,
            attestation,
            coprocessor,
            hash_reconciliation: exchange.hash_reconciliation,
            signature: exchange.signature,
            stages,
        })
    }

    async fn check_coprocessor(&self, payloads: &[GpuPayload]) -> CoprocessorCheck {
        if payloads.is_empty() {
            warn!("No nvidia_payload in attestation report; skipping GPU attestation");
            return CoprocessorCheck::Skipped {
                reason: "no nvidia_payload in attestation report".to_string(),
            };
        }

        info!("Verifying {} GPU evidence payload(s) with NRAS", payloads.len());
        let verdicts: Vec<GpuPayloadVerdict> =
            join_all(payloads.iter().map(|p| self.verify_gpu_payload(p))).await;
        let passed = verdicts.iter().all(GpuPayloadVerdict::passed);

        if passed {
            info!("GPU attestation passed");
        } else {
            warn!("GPU attestation failed for at least one payload");
        }

        CoprocessorCheck::Checked {
            payloads: verdicts,
            passed,
        }
    }

    async fn verify_gpu_payload(&self, payload: &GpuPayload) -> GpuPayloadVerdict {
        let outcome = match self.cloud.fetch_gpu_attestation(&payload.payload).await {
            Ok(response) => decode_gpu_attestation(&response),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(claims) => {
                let overall_result = overall_attestation_result(&claims);
                debug!(
                    "NRAS result for {:?}: {:?}",
                    payload.signing_address, overall_result
                );
                GpuPayloadVerdict {
                    signing_address: payload.signing_address.clone(),
                    claims: Some(claims),
                    overall_result,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    "GPU attestation for {:?} failed: {}",
                    payload.signing_address, e
                );
                GpuPayloadVerdict {
                    signing_address: payload.signing_address.clone(),
                    claims: None,
                    overall_result: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
