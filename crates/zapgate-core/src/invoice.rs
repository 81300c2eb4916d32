use bitcoin::hashes::Hash;
use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{PaymentHash, ValidationError};

/// Invoice states as reported by the ledger. We only ever observe them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceState {
    Open,
    Settled,
    Canceled,
    Accepted,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvoiceState::Open => "OPEN",
            InvoiceState::Settled => "SETTLED",
            InvoiceState::Canceled => "CANCELED",
            InvoiceState::Accepted => "ACCEPTED",
            InvoiceState::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// One entry of the ledger's settlement stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementUpdate {
    pub payment_hash: PaymentHash,
    pub state: InvoiceState,
    pub settled_amount_msat: u64,
    pub preimage: Option<Vec<u8>>,
    /// The encoded bolt11 invoice this entry refers to
    pub payment_request: String,
}

impl SettlementUpdate {
    pub fn is_settled(&self) -> bool {
        self.state == InvoiceState::Settled
    }

    pub fn preimage_hex(&self) -> Option<String> {
        self.preimage.as_ref().map(hex::encode)
    }
}

/// The parts of a bolt11 invoice that receipts are cross-checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceCommitments {
    pub payment_hash: PaymentHash,
    pub description_hash: Option<[u8; 32]>,
}

/// Decodes the given bolt11 invoice and extracts its payment hash and, if the invoice commits to
/// a description hash instead of a plain description, that hash.
pub fn decode_bolt11(invoice: &str) -> Result<InvoiceCommitments, ValidationError> {
    let decoded = Bolt11Invoice::from_str(invoice.trim())
        .map_err(|e| ValidationError::InvalidInvoice(e.to_string()))?;
    let payment_hash = PaymentHash::new(decoded.payment_hash().to_byte_array());
    let description_hash = match decoded.description() {
        Bolt11InvoiceDescription::Hash(hash) => Some(hash.0.to_byte_array()),
        Bolt11InvoiceDescription::Direct(_) => None,
    };
    Ok(InvoiceCommitments {
        payment_hash,
        description_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;
    use crate::test_utils::{create_test_invoice, create_test_invoice_with_description};

    #[test]
    fn test_decode_bolt11_with_description_hash() {
        let payment_hash = PaymentHash::new([3u8; 32]);
        let description_hash = sha256(b"zap request");
        let invoice = create_test_invoice(&payment_hash, Some(description_hash), 21_000);

        let decoded = decode_bolt11(&invoice).expect("can decode invoice");
        assert_eq!(decoded.payment_hash, payment_hash);
        assert_eq!(decoded.description_hash, Some(description_hash));
    }

    #[test]
    fn test_decode_bolt11_with_plain_description() {
        let payment_hash = PaymentHash::new([4u8; 32]);
        let invoice = create_test_invoice_with_description(&payment_hash, "coffee", 1000);

        let decoded = decode_bolt11(&invoice).expect("can decode invoice");
        assert_eq!(decoded.payment_hash, payment_hash);
        assert_eq!(decoded.description_hash, None);
    }

    #[test]
    fn test_decode_bolt11_invalid() {
        assert!(matches!(
            decode_bolt11("lnbc1notaninvoice"),
            Err(ValidationError::InvalidInvoice(_))
        ));
    }

    #[test]
    fn test_invoice_state_deserialize() {
        let state: InvoiceState = serde_json::from_str("\"SETTLED\"").unwrap();
        assert_eq!(state, InvoiceState::Settled);
        let state: InvoiceState = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(state, InvoiceState::Unknown);
    }
}
