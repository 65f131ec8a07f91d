//! Verifier for NEAR AI Confidential Cloud.
//!
//! Fetches a model's attestation report, decodes its Intel TDX quote and
//! NVIDIA GPU evidence, has the GPU evidence checked by NRAS, then sends a
//! chat request and checks that the enclave signed the exact request and
//! response bytes with an attested key.

pub mod nearai;

pub use nearai::{
    ChatVerifier, ConfidentialCloud, NearAiClient, NearAiConfig, NearAiError,
    VerificationReport,
};
