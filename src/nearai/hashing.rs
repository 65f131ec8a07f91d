//! Content hashing of a chat exchange and reconciliation against the hashes
//! the enclave signed.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentHashPair {
    pub request_hash: String,
    pub response_hash: String,
}

impl ContentHashPair {
    /// Hashes the exact request bytes sent and the exact response text received.
    pub fn compute(request_body: &str, response_text: &str) -> Self {
        Self {
            request_hash: sha256_hex(request_body),
            response_hash: sha256_hex(response_text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HashReconciliation {
    Compared {
        valid: bool,
        request_match: bool,
        response_match: bool,
        signed_request_hash: String,
        signed_response_hash: String,
        expected_request_hash: String,
        expected_response_hash: String,
    },
    Malformed {
        error: String,
        parts: usize,
        signature_text: String,
        expected_request_hash: String,
        expected_response_hash: String,
    },
}

impl HashReconciliation {
    pub fn is_valid(&self) -> bool {
        matches!(self, HashReconciliation::Compared { valid: true, .. })
    }
}

/// Compares the `<request_hash>:<response_hash>` text signed by the enclave
/// with locally computed hashes.
///
/// Comparison is exact; both sides are lowercase hex produced by
/// [`sha256_hex`] on our side, so no case folding is applied.
pub fn compare_hashes(
    signature_text: &str,
    expected_request_hash: &str,
    expected_response_hash: &str,
) -> HashReconciliation {
    let parts: Vec<&str> = signature_text.split(':').collect();

    let [signed_request_hash, signed_response_hash] = parts.as_slice() else {
        return HashReconciliation::Malformed {
            error: format!(
                "Expected 2 hash parts separated by ':', got {}",
                parts.len()
            ),
            parts: parts.len(),
            signature_text: signature_text.to_string(),
            expected_request_hash: expected_request_hash.to_string(),
            expected_response_hash: expected_response_hash.to_string(),
        };
    };

    let request_match = *signed_request_hash == expected_request_hash;
    let response_match = *signed_response_hash == expected_response_hash;

    HashReconciliation::Compared {
        valid: request_match && response_match,
        request_match,
        response_match,
        signed_request_hash: signed_request_hash.to_string(),
        signed_response_hash: signed_response_hash.to_string(),
        expected_request_hash: expected_request_hash.to_string(),
        expected_response_hash: expected_response_hash.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HI_REQUEST: &str =
        r#"{"messages":[{"content":"hi","role":"user"}],"stream":true,"model":"m"}"#;

    #[test]
    fn test_sha256_hex_known_values() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_request_body_digest_is_stable() {
        let d1 = sha256_hex(HI_REQUEST);
        let d2 = sha256_hex(HI_REQUEST.as_bytes());
        assert_eq!(
            d1,
            "e6f1ac39b09025a41630d7725432cc96834fe39a81abedea57e8c4448238a598"
        );
        assert_eq!(d1, d2);
        assert_ne!(d1, sha256_hex(HI_REQUEST.replace("hi", "ho")));
    }

    #[test]
    fn test_content_hash_pair() {
        let pair = ContentHashPair::compute(HI_REQUEST, "data: [DONE]\n\n");
        assert_eq!(pair.request_hash, sha256_hex(HI_REQUEST));
        assert_eq!(pair.response_hash.len(), 64);
        assert!(pair
            .response_hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_compare_hashes_match() {
        let r = compare_hashes("a:b", "a", "b");
        assert!(r.is_valid());
    }

    #[test]
    fn test_compare_hashes_response_mismatch() {
        match compare_hashes("a:c", "a", "b") {
            HashReconciliation::Compared {
                valid,
                request_match,
                response_match,
                signed_response_hash,
                ..
            } => {
                assert!(!valid);
                assert!(request_match);
                assert!(!response_match);
                assert_eq!(signed_response_hash, "c");
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_compare_hashes_swapped_order() {
        let d1 = sha256_hex("request");
        let d2 = sha256_hex("response");

        assert!(compare_hashes(&format!("{d1}:{d2}"), &d1, &d2).is_valid());

        match compare_hashes(&format!("{d2}:{d1}"), &d1, &d2) {
            HashReconciliation::Compared {
                valid,
                request_match,
                response_match,
                ..
            } => {
                assert!(!valid);
                assert!(!request_match);
                assert!(!response_match);
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_compare_hashes_is_case_sensitive() {
        assert!(!compare_hashes("AB:cd", "ab", "cd").is_valid());
    }

    #[test]
    fn test_compare_hashes_malformed() {
        for text in ["a:b:c", "ab", ""] {
            match compare_hashes(text, "a", "b") {
                HashReconciliation::Malformed { parts, error, .. } => {
                    assert_ne!(parts, 2);
                    assert!(error.contains("Expected 2 hash parts"));
                }
                other => panic!("expected malformed for {text:?}, got {other:?}"),
            }
        }
    }
}
