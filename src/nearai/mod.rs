pub mod attestation;
pub mod client;
pub mod config;
pub mod error;
pub mod hashing;
pub mod models;
pub mod nras;
pub mod quote;
pub mod signature;
pub mod verifier;

pub use client::{ConfidentialCloud, NearAiClient};
pub use config::NearAiConfig;
pub use error::NearAiError;
pub use verifier::{ChatVerifier, VerificationReport};
