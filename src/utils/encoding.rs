// src/utils/encoding.rs
//! Byte/string conversions shared by the verifier and the channel.
//!
//! - Base64 (standard and URL-safe) to bytes
//! - Bytes to `0x`-prefixed lowercase hex and back

use ethers_core::utils::hex;

/// Encodes bytes as lowercase hex with a `0x` prefix.
pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes hex with or without a `0x` prefix.
///
/// # Errors
/// Returns a description when the input has odd length or non-hex digits.
pub fn from_hex(input: &str) -> Result<Vec<u8>, String> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(body).map_err(|e| format!("Hex decoding failed: {}", e))
}

/// Converts base64url into standard padded base64.
///
/// Already normalized input is returned unchanged.
pub fn base64url_to_base64(input: &str) -> String {
    let mut out: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let unpadded = out.trim_end_matches('=').len();
    out.truncate(unpadded);
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

/// Decodes base64 content as found in XML text nodes.
///
/// Whitespace and line breaks are ignored and URL-safe alphabets are accepted.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, String> {
    let normalized = base64url_to_base64(input);
    base64::decode(&normalized).map_err(|e| format!("Base64 decoding failed: {}", e))
}

/// Encodes bytes as standard padded base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let encoded = to_hex_prefixed(&bytes);
        assert!(encoded.starts_with("0x00010203"));
        assert_eq!(from_hex(&encoded).unwrap(), bytes);
        assert_eq!(from_hex("abCD").unwrap(), vec![0xab, 0xcd]);
        assert!(from_hex("0xabc").is_err());
    }

    #[test]
    fn test_base64url_normalization_is_idempotent() {
        let url = "_-8_-w";
        let once = base64url_to_base64(url);
        assert_eq!(once, "/+8/+w==");
        assert_eq!(base64url_to_base64(&once), once);
        assert_eq!(decode_base64(url).unwrap(), vec![0xff, 0xef, 0x3f, 0xfb]);
    }

    #[test]
    fn test_decode_base64_ignores_whitespace() {
        let encoded = "aGVs\n  bG8g\r\nd29y bGQ=";
        assert_eq!(decode_base64(encoded).unwrap(), b"hello world".to_vec());
    }
}
