//! Intel quote decoding.
//!
//! The quote is parsed as evidence only: nothing here checks the quote
//! signature or certification data. The response signature established by
//! [`crate::nearai::signature`] is what ties an exchange to the enclave.
//!
//! ## Layout (little-endian)
//! ```text
//! header (48 bytes)
//!   u16  version          @0
//!   u16  sign_type        @2
//!   [4]  epid_group_id    @4
//!   u16  qe_svn           @8
//!   u16  pce_svn          @10
//!   [16] xeid             @12
//!   [32] basename         @28   (overlaps the report body)
//! report body [48, 432), offsets relative to 48
//!   [16] cpu_svn          @0
//!   [4]  misc_select      @16
//!   [16] attributes       @32
//!   [32] mr_enclave       @64
//!   [32] mr_signer        @128
//!   [64] config_id        @160
//!   u16  isv_prod_id      @256
//!   u16  isv_svn          @258
//!   u16  config_svn       @260
//!   [16] isv_family_id    @304
//!   [64] report_data      @320
//! ```

use serde::Serialize;
use serde_json::Value;
use std::fmt;

pub const QUOTE_HEADER_LEN: usize = 48;
pub const REPORT_BODY_END: usize = 432;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteErrorKind {
    InvalidFormat,
    InvalidHex,
    TooShort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteDecodeError {
    pub kind: QuoteErrorKind,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_hex: Option<String>,
}

impl QuoteDecodeError {
    fn new(kind: QuoteErrorKind, error: impl Into<String>, raw_hex: Option<&str>) -> Self {
        Self {
            kind,
            error: error.into(),
            raw_hex: raw_hex.map(str::to_string),
        }
    }
}

impl fmt::Display for QuoteDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for QuoteDecodeError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedQuote {
    pub version: u16,
    pub sign_type: u16,
    pub epid_group_id: String,
    pub qe_svn: u16,
    pub pce_svn: u16,
    pub xeid: String,
    pub basename: String,
    pub raw_hex: String,
    pub size_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_body: Option<ReportBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportBody {
    pub cpu_svn: String,
    pub misc_select: String,
    pub attributes: String,
    pub mr_enclave: String,
    pub mr_signer: String,
    pub config_id: String,
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub config_svn: u16,
    pub isv_family_id: String,
    pub report_data: String,
}

/// Decoded quote or the reason it could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IntelQuote {
    Decoded(Box<DecodedQuote>),
    Invalid(QuoteDecodeError),
}

impl IntelQuote {
    pub fn decoded(&self) -> Option<&DecodedQuote> {
        match self {
            IntelQuote::Decoded(q) => Some(q),
            IntelQuote::Invalid(_) => None,
        }
    }

    pub fn error(&self) -> Option<&QuoteDecodeError> {
        match self {
            IntelQuote::Decoded(_) => None,
            IntelQuote::Invalid(e) => Some(e),
        }
    }
}

impl From<Result<DecodedQuote, QuoteDecodeError>> for IntelQuote {
    fn from(r: Result<DecodedQuote, QuoteDecodeError>) -> Self {
        match r {
            Ok(q) => IntelQuote::Decoded(Box::new(q)),
            Err(e) => IntelQuote::Invalid(e),
        }
    }
}

/// Decodes the `intel_quote` field of a report, which must be a hex string.
pub fn decode_intel_quote(value: Option<&Value>) -> Result<DecodedQuote, QuoteDecodeError> {
    match value {
        Some(Value::String(s)) => decode_intel_quote_hex(s),
        _ => Err(QuoteDecodeError::new(
            QuoteErrorKind::InvalidFormat,
            "Invalid hex quote format",
            None,
        )),
    }
}

pub fn decode_intel_quote_hex(hex_quote: &str) -> Result<DecodedQuote, QuoteDecodeError> {
    let digits = hex_quote.trim_start_matches("0x");
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(QuoteDecodeError::new(
            QuoteErrorKind::InvalidFormat,
            "Invalid hex quote format",
            Some(hex_quote),
        ));
    }

    let bytes = hex::decode(digits).map_err(|e| {
        QuoteDecodeError::new(
            QuoteErrorKind::InvalidHex,
            format!("Failed to decode Intel quote: {e}"),
            Some(hex_quote),
        )
    })?;

    if bytes.len() < QUOTE_HEADER_LEN {
        return Err(QuoteDecodeError::new(
            QuoteErrorKind::TooShort,
            "Quote too short to be valid",
            Some(hex_quote),
        ));
    }

    let report_body = (bytes.len() >= REPORT_BODY_END)
        .then(|| parse_report_body(&bytes[QUOTE_HEADER_LEN..REPORT_BODY_END]));

    Ok(DecodedQuote {
        version: le_u16(&bytes, 0),
        sign_type: le_u16(&bytes, 2),
        epid_group_id: hex_range(&bytes, 4, 8),
        qe_svn: le_u16(&bytes, 8),
        pce_svn: le_u16(&bytes, 10),
        xeid: hex_range(&bytes, 12, 28),
        basename: hex_range(&bytes, 28, 60),
        raw_hex: hex_quote.to_string(),
        size_bytes: bytes.len(),
        report_body,
    })
}

fn parse_report_body(body: &[u8]) -> ReportBody {
    ReportBody {
        cpu_svn: hex_range(body, 0, 16),
        misc_select: hex_range(body, 16, 20),
        attributes: hex_range(body, 32, 48),
        mr_enclave: hex_range(body, 64, 96),
        mr_signer: hex_range(body, 128, 160),
        config_id: hex_range(body, 160, 224),
        isv_prod_id: le_u16(body, 256),
        isv_svn: le_u16(body, 258),
        config_svn: le_u16(body, 260),
        isv_family_id: hex_range(body, 304, 320),
        report_data: hex_range(body, 320, 384),
    }
}

// Out-of-range reads are clamped to the available bytes.
fn hex_range(bytes: &[u8], start: usize, end: usize) -> String {
    let end = end.min(bytes.len());
    let start = start.min(end);
    hex::encode(&bytes[start..end])
}

fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    let lo = bytes.get(offset).copied().unwrap_or(0);
    let hi = bytes.get(offset + 1).copied().unwrap_or(0);
    u16::from_le_bytes([lo, hi])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn quote_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_decode_header_fields() {
        let mut bytes = vec![0u8; 64];
        bytes[0] = 3;
        bytes[2] = 2;
        bytes[4..8].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        bytes[8] = 0x05;
        bytes[9] = 0x01;
        bytes[10] = 0x0d;
        bytes[12] = 0xaa;
        bytes[28] = 0xbb;

        let quote = decode_intel_quote_hex(&hex::encode(&bytes)).unwrap();
        assert_eq!(quote.version, 3);
        assert_eq!(quote.sign_type, 2);
        assert_eq!(quote.epid_group_id, "deadbeef");
        assert_eq!(quote.qe_svn, 0x0105);
        assert_eq!(quote.pce_svn, 0x0d);
        assert_eq!(quote.xeid.len(), 32);
        assert!(quote.xeid.starts_with("aa"));
        assert_eq!(quote.basename.len(), 64);
        assert!(quote.basename.starts_with("bb"));
        assert_eq!(quote.size_bytes, 64);
        assert!(quote.report_body.is_none());
    }

    #[test]
    fn test_decode_minimal_header_clamps_basename() {
        let quote = decode_intel_quote_hex(&"00".repeat(48)).unwrap();
        // 28..48 is all that is available
        assert_eq!(quote.basename.len(), 40);
        assert!(quote.report_body.is_none());
    }

    #[test]
    fn test_decode_report_body() {
        let mut bytes = quote_bytes(REPORT_BODY_END);
        let body = QUOTE_HEADER_LEN;
        bytes[body + 64..body + 96].copy_from_slice(&[0x11; 32]);
        bytes[body + 128..body + 160].copy_from_slice(&[0x22; 32]);
        bytes[body + 256] = 0x34;
        bytes[body + 257] = 0x12;
        bytes[body + 258] = 0x07;
        bytes[body + 259] = 0x00;
        bytes[body + 260] = 0x01;
        bytes[body + 261] = 0x01;
        bytes[body + 320..body + 384].copy_from_slice(&[0x33; 64]);

        let quote = decode_intel_quote_hex(&hex::encode(&bytes)).unwrap();
        let report = quote.report_body.expect("report body should be present");
        assert_eq!(report.mr_enclave, "11".repeat(32));
        assert_eq!(report.mr_signer, "22".repeat(32));
        assert_eq!(report.isv_prod_id, 0x1234);
        assert_eq!(report.isv_svn, 7);
        assert_eq!(report.config_svn, 0x0101);
        assert_eq!(report.report_data, "33".repeat(64));
        assert_eq!(report.cpu_svn.len(), 32);
        assert_eq!(report.misc_select.len(), 8);
        assert_eq!(report.attributes.len(), 32);
        assert_eq!(report.config_id.len(), 128);
        assert_eq!(report.isv_family_id.len(), 32);
    }

    #[test]
    fn test_report_body_absent_just_below_boundary() {
        let quote = decode_intel_quote_hex(&hex::encode(quote_bytes(REPORT_BODY_END - 1))).unwrap();
        assert!(quote.report_body.is_none());
    }

    #[test]
    fn test_accepts_0x_prefix() {
        let quote = decode_intel_quote_hex(&format!("0x{}", "00".repeat(48))).unwrap();
        assert_eq!(quote.size_bytes, 48);
    }

    #[test]
    fn test_invalid_inputs() {
        let err = decode_intel_quote(None).unwrap_err();
        assert_eq!(err.kind, QuoteErrorKind::InvalidFormat);

        let err = decode_intel_quote(Some(&json!(1234))).unwrap_err();
        assert_eq!(err.kind, QuoteErrorKind::InvalidFormat);

        let err = decode_intel_quote_hex("abc").unwrap_err();
        assert_eq!(err.kind, QuoteErrorKind::InvalidFormat);
        assert_eq!(err.raw_hex.as_deref(), Some("abc"));

        let err = decode_intel_quote_hex(&"zz".repeat(48)).unwrap_err();
        assert_eq!(err.kind, QuoteErrorKind::InvalidHex);
        assert!(err.raw_hex.is_some());

        let err = decode_intel_quote_hex(&"00".repeat(47)).unwrap_err();
        assert_eq!(err.kind, QuoteErrorKind::TooShort);
    }

    #[test]
    fn test_intel_quote_serializes_error_marker() {
        let quote: IntelQuote = decode_intel_quote_hex("00").into();
        let v = serde_json::to_value(&quote).unwrap();
        assert_eq!(v["kind"], "too_short");
        assert_eq!(v["raw_hex"], "00");
        assert!(quote.decoded().is_none());
    }

    proptest! {
        #[test]
        fn prop_header_decodes_for_any_long_quote(bytes in proptest::collection::vec(any::<u8>(), 48..600)) {
            let quote = decode_intel_quote_hex(&hex::encode(&bytes)).unwrap();
            prop_assert_eq!(quote.version, u16::from(bytes[0]) | (u16::from(bytes[1]) << 8));
            prop_assert_eq!(quote.sign_type, u16::from(bytes[2]) | (u16::from(bytes[3]) << 8));
            prop_assert_eq!(quote.report_body.is_some(), bytes.len() >= REPORT_BODY_END);
        }

        #[test]
        fn prop_short_quotes_are_rejected(bytes in proptest::collection::vec(any::<u8>(), 1..48)) {
            let err = decode_intel_quote_hex(&hex::encode(&bytes)).unwrap_err();
            prop_assert_eq!(err.kind, QuoteErrorKind::TooShort);
        }
    }
}
