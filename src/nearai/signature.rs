use crate::nearai::error::NearAiError;
use crate::nearai::models::OneOrMany;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use serde::Serialize;
use sha3::{Digest, Keccak256};

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureVerdict {
    pub valid: bool,
    pub recovered_address: Option<String>,
    pub expected_addresses: Vec<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Recovers the signer of `message` and checks it against the expected
/// address(es).
///
/// The signature is valid when the recovered address equals any of the
/// candidates, ignoring case. A signature that cannot be recovered yields
/// `valid: false` with the reason in `error`.
pub fn verify_signature(
    message: &str,
    signature: &str,
    expected_addresses: impl Into<OneOrMany<String>>,
) -> SignatureVerdict {
    let expected_addresses = expected_addresses.into().into_vec();

    match recover_address(message, signature) {
        Ok(recovered) => {
            let valid = expected_addresses
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(&recovered));
            SignatureVerdict {
                valid,
                recovered_address: Some(recovered),
                expected_addresses,
                message: message.to_string(),
                error: None,
            }
        }
        Err(e) => SignatureVerdict {
            valid: false,
            recovered_address: None,
            expected_addresses,
            message: message.to_string(),
            error: Some(e.to_string()),
        },
    }
}

/// Recovers the `0x`-prefixed lowercase address that produced a 65-byte
/// `r || s || v` personal-message signature over `message`.
pub fn recover_address(message: &str, signature: &str) -> Result<String, NearAiError> {
    let sig_bytes = hex::decode(signature.trim_start_matches("0x"))?;
    if sig_bytes.len() != 65 {
        return Err(NearAiError::Signature(format!(
            "expected 65-byte signature, got {} bytes",
            sig_bytes.len()
        )));
    }

    let v = match sig_bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => {
            return Err(NearAiError::Signature(format!(
                "invalid recovery id: {other}"
            )))
        }
    };

    let recovery_id = RecoveryId::from_i32(i32::from(v))?;
    let recoverable = RecoverableSignature::from_compact(&sig_bytes[..64], recovery_id)?;
    let digest = Message::from_digest(personal_message_hash(message));

    let secp = Secp256k1::verification_only();
    let public_key = secp.recover_ecdsa(&digest, &recoverable)?;

    Ok(address_from_uncompressed_pubkey(
        &public_key.serialize_uncompressed()[1..],
    ))
}

/// Keccak-256 of the message wrapped in the personal-message envelope.
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

fn address_from_uncompressed_pubkey(pubkey_64: &[u8]) -> String {
    // Ethereum address is keccak256(uncompressed_pubkey_without_prefix)[12..].
    let hash = Keccak256::digest(pubkey_64);
    format!("0x{}", hex::encode(&hash[12..32]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{PublicKey, SecretKey};

    // Signature captured from a live exchange.
    const LIVE_TEXT: &str = "65b0adb47d0450971803dfb18d0ce4af4a64d27420a43d5aad4066ebf10b81b5:e508d818744d175a62aae1a9fb3f373c075460cbe50bf962a88ac008c843dff1";
    const LIVE_SIGNATURE: &str = "0xf28f537325c337fd96ae6e156783c904ca708dcd38fb8a476d1280dfc72dc88e4fcb5c3941bdd4f8fe5238a2253b975c6b02ea6a0a450b5b0f9296ab54cf24181b";
    const LIVE_ADDRESS: &str = "0xc51268C9b46140619CBC066A34441a6ca51F85f9";

    fn sign_personal(sk: &SecretKey, message: &str) -> String {
        let secp = Secp256k1::new();
        let msg = Message::from_digest(personal_message_hash(message));
        let (recid, compact) = secp
            .sign_ecdsa_recoverable(&msg, sk)
            .serialize_compact();
        let mut bytes = compact.to_vec();
        bytes.push(27 + recid.to_i32() as u8);
        format!("0x{}", hex::encode(bytes))
    }

    fn test_key() -> (SecretKey, String) {
        let mut sk_bytes = [0u8; 32];
        sk_bytes[31] = 1;
        let sk = SecretKey::from_slice(&sk_bytes).unwrap();
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), &sk);
        let addr = address_from_uncompressed_pubkey(&pk.serialize_uncompressed()[1..]);
        (sk, addr)
    }

    #[test]
    fn test_address_of_private_key_one() {
        let (_, addr) = test_key();
        assert_eq!(addr, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }

    #[test]
    fn test_recover_live_signature() {
        let recovered = recover_address(LIVE_TEXT, LIVE_SIGNATURE).unwrap();
        assert_eq!(recovered, LIVE_ADDRESS.to_lowercase());

        let verdict = verify_signature(LIVE_TEXT, LIVE_SIGNATURE, LIVE_ADDRESS);
        assert!(verdict.valid);
        assert!(verdict.error.is_none());
    }

    #[test]
    fn test_recovery_is_deterministic() {
        let (sk, addr) = test_key();
        let sig = sign_personal(&sk, "a:b");
        let r1 = recover_address("a:b", &sig).unwrap();
        let r2 = recover_address("a:b", &sig).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(r1, addr);
    }

    #[test]
    fn test_raw_recovery_id_is_accepted() {
        let (sk, addr) = test_key();
        let mut bytes = hex::decode(sign_personal(&sk, "msg").trim_start_matches("0x")).unwrap();
        bytes[64] -= 27;
        assert_eq!(recover_address("msg", &hex::encode(bytes)).unwrap(), addr);
    }

    #[test]
    fn test_any_candidate_matches_in_any_casing() {
        let (sk, addr) = test_key();
        let sig = sign_personal(&sk, "hello");
        let other_a = "0x0000000000000000000000000000000000000001".to_string();
        let other_b = "0x00000000000000000000000000000000000000ff".to_string();

        let verdict = verify_signature(
            "hello",
            &sig,
            vec![other_a.clone(), addr.to_uppercase().replace("0X", "0x"), other_b.clone()],
        );
        assert!(verdict.valid);
        assert_eq!(verdict.expected_addresses.len(), 3);

        let verdict = verify_signature("hello", &sig, vec![other_a, other_b]);
        assert!(!verdict.valid);
        assert_eq!(verdict.recovered_address.as_deref(), Some(addr.as_str()));
        assert!(verdict.error.is_none());
    }

    #[test]
    fn test_altered_message_recovers_different_address() {
        let (sk, addr) = test_key();
        let sig = sign_personal(&sk, "a:b");
        let verdict = verify_signature("a:c", &sig, addr.as_str());
        assert!(!verdict.valid);
        assert!(verdict.recovered_address.is_some());
    }

    #[test]
    fn test_malformed_signature_is_reported_not_raised() {
        let zero = format!("0x{}", "00".repeat(65));
        for bad in ["0x1234", "not hex", zero.as_str()] {
            let verdict = verify_signature("a:b", bad, LIVE_ADDRESS);
            assert!(!verdict.valid, "signature {bad:?} should be invalid");
            assert!(verdict.recovered_address.is_none());
            assert!(verdict.error.is_some());
            assert_eq!(verdict.expected_addresses, vec![LIVE_ADDRESS.to_string()]);
        }
    }
}
