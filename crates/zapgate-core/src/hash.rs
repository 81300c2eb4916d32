use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt::Display, str::FromStr};

use crate::ValidationError;

/// Returns the sha256 digest of the given bytes
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Parses a hex encoded preimage, which has to be exactly 32 bytes long
pub fn parse_preimage(preimage_hex: &str) -> Result<[u8; 32], ValidationError> {
    let decoded = hex::decode(preimage_hex).map_err(|_| ValidationError::InvalidPreimage)?;
    decoded
        .try_into()
        .map_err(|_| ValidationError::InvalidPreimage)
}

/// The 32 byte hash binding one invoice to one settlement watch.
/// Serialized as lowercase hex.
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize, PartialEq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentHash([u8; 32]);

impl PaymentHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a payment hash from raw bytes, which have to be exactly 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ValidationError::InvalidPaymentHash)?;
        Ok(Self(arr))
    }

    /// The payment hash committed to by the given preimage
    pub fn from_preimage(preimage: &[u8]) -> Self {
        Self(sha256(preimage))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for PaymentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for PaymentHash {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s).map_err(|_| ValidationError::InvalidPaymentHash)?;
        Self::from_slice(&decoded)
    }
}

impl TryFrom<String> for PaymentHash {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PaymentHash> for String {
    fn from(value: PaymentHash) -> Self {
        value.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_hash_from_preimage() {
        let preimage = [7u8; 32];
        let hash = PaymentHash::from_preimage(&preimage);
        assert_eq!(hash.as_bytes(), &sha256(&preimage));
        assert_ne!(hash.as_bytes(), &preimage);
    }

    #[test]
    fn test_payment_hash_hex_parsing() {
        let hash = PaymentHash::new([0xab; 32]);
        let parsed = PaymentHash::from_str(&hash.to_hex()).expect("valid hex");
        assert_eq!(parsed, hash);
        assert_eq!(
            PaymentHash::from_str("abcd"),
            Err(ValidationError::InvalidPaymentHash)
        );
        assert_eq!(
            PaymentHash::from_str("not hex"),
            Err(ValidationError::InvalidPaymentHash)
        );
    }

    #[test]
    fn test_parse_preimage() {
        assert_eq!(parse_preimage(&"07".repeat(32)), Ok([7u8; 32]));
        assert_eq!(parse_preimage("zz"), Err(ValidationError::InvalidPreimage));
        assert_eq!(parse_preimage("0707"), Err(ValidationError::InvalidPreimage));
    }

    #[test]
    fn test_payment_hash_serializes_as_hex() {
        let hash = PaymentHash::new([1u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: PaymentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
