//! Fixtures shared by the tests of all zapgate crates

use bitcoin::{
    hashes::{Hash, sha256},
    secp256k1::{Secp256k1, SecretKey},
};
use lightning_invoice::{Currency, InvoiceBuilder};
use lightning_types::payment::PaymentSecret;
use nostr::{Event, EventBuilder, JsonUtil, Keys, Kind, PublicKey, Tag};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{PaymentHash, invoice::InvoiceState, invoice::SettlementUpdate};

const NODE_SECRET: [u8; 32] = [
    0xe1, 0x26, 0xf6, 0x8f, 0x7e, 0xaf, 0xcc, 0x8b, 0x74, 0xf5, 0x4d, 0x26, 0x9f, 0xe2, 0x06,
    0xbe, 0x71, 0x50, 0x00, 0xf9, 0x4d, 0xac, 0x06, 0x7d, 0x1c, 0x04, 0xa8, 0xca, 0x3b, 0x2d,
    0xb7, 0x34,
];

/// Creates a signed mainnet invoice committing to the given description hash, or to an empty
/// plain description if none is given
pub fn create_test_invoice(
    payment_hash: &PaymentHash,
    description_hash: Option<[u8; 32]>,
    amount_msat: u64,
) -> String {
    build_invoice(payment_hash, description_hash, "", amount_msat)
}

/// Creates a signed mainnet invoice with a plain description
pub fn create_test_invoice_with_description(
    payment_hash: &PaymentHash,
    description: &str,
    amount_msat: u64,
) -> String {
    build_invoice(payment_hash, None, description, amount_msat)
}

fn build_invoice(
    payment_hash: &PaymentHash,
    description_hash: Option<[u8; 32]>,
    description: &str,
    amount_msat: u64,
) -> String {
    let builder = InvoiceBuilder::new(Currency::Bitcoin);
    let builder = match description_hash {
        Some(hash) => builder.description_hash(sha256::Hash::from_byte_array(hash)),
        None => builder.description(description.to_owned()),
    };
    let secp = Secp256k1::new();
    let key = SecretKey::from_slice(&NODE_SECRET).expect("valid test key");
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock is after the epoch");
    builder
        .payment_hash(sha256::Hash::from_byte_array(*payment_hash.as_bytes()))
        .payment_secret(PaymentSecret([42u8; 32]))
        .duration_since_epoch(now)
        .min_final_cltv_expiry_delta(144)
        .amount_milli_satoshis(amount_msat)
        .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &key))
        .expect("test invoice can be signed")
        .to_string()
}

/// Creates a signed zap request addressed to the given recipient, returning the event and the
/// exact json it was serialized to
pub fn create_zap_request(sender: &Keys, recipient: &PublicKey) -> (Event, String) {
    create_zap_request_with_tags(
        sender,
        vec![
            Tag::parse(["p", &recipient.to_hex()]).expect("valid tag"),
            Tag::parse(["relays", "wss://relay.example.com"]).expect("valid tag"),
        ],
    )
}

/// Creates a signed zap request with exactly the given tags
pub fn create_zap_request_with_tags(sender: &Keys, tags: Vec<Tag>) -> (Event, String) {
    let event = EventBuilder::new(Kind::ZapRequest, "zap!")
        .tags(tags)
        .sign_with_keys(sender)
        .expect("zap request can be signed");
    let raw = event.as_json();
    (event, raw)
}

pub fn settled_update(preimage: [u8; 32], amount_msat: u64) -> SettlementUpdate {
    SettlementUpdate {
        payment_hash: PaymentHash::from_preimage(&preimage),
        state: InvoiceState::Settled,
        settled_amount_msat: amount_msat,
        preimage: Some(preimage.to_vec()),
        payment_request: String::new(),
    }
}

pub fn open_update(payment_hash: PaymentHash) -> SettlementUpdate {
    SettlementUpdate {
        payment_hash,
        state: InvoiceState::Open,
        settled_amount_msat: 0,
        preimage: None,
        payment_request: String::new(),
    }
}
