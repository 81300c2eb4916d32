//! NIP-57 zap request / zap receipt handling.
//!
//! A [`ZapRequest`] can only be obtained by validating a raw nostr event against the recipient's
//! public key and a [`ZapReceipt`] only by building one (which self-validates) or by converting an
//! event that passes receipt validation. The two share the nostr event shape, but there is no way
//! to relabel one as the other.

use nostr::{Event, PublicKey, Tag};
use thiserror::Error;

mod receipt;
mod request;

pub use receipt::{ZapReceipt, build_zap_receipt, validate_zap_receipt};
pub use request::{ZapRequest, check_zap_amount, derive_description_hash, validate_zap_request};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid kind, expected {expected}, got {got}")]
    InvalidKind { expected: u16, got: u16 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("missing p tag")]
    MissingRecipientTag,

    #[error("more than one p tag")]
    MultipleRecipientTags,

    #[error("p tag pubkey {got} does not match recipient pubkey {expected}")]
    RecipientMismatch { expected: String, got: String },

    #[error("missing required tags: {}", .0.join(", "))]
    MissingTags(Vec<String>),

    #[error("invalid preimage format")]
    InvalidPreimage,

    #[error("preimage hash does not match invoice payment hash")]
    PreimageMismatch,

    #[error("invalid bolt11 invoice: {0}")]
    InvalidInvoice(String),

    #[error("description hash does not match invoice description hash")]
    DescriptionHashMismatch,

    #[error("amount tag {tagged} does not match requested amount {requested} msat")]
    AmountMismatch { requested: u64, tagged: String },

    #[error("zap receipt construction failed: {0}")]
    ReceiptConstructionFailed(String),

    #[error("invalid zap request json: {0}")]
    Json(String),
}

impl From<crate::ValidationError> for Error {
    fn from(e: crate::ValidationError) -> Self {
        match e {
            crate::ValidationError::InvalidInvoice(msg) => Error::InvalidInvoice(msg),
            crate::ValidationError::InvalidPreimage => Error::InvalidPreimage,
            other => Error::InvalidInvoice(other.to_string()),
        }
    }
}

fn tag_name(tag: &Tag) -> Option<&str> {
    tag.as_slice().first().map(String::as_str)
}

fn tag_value(tag: &Tag) -> Option<&str> {
    tag.as_slice().get(1).map(String::as_str)
}

fn tags_named<'a>(event: &'a Event, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
    event
        .tags
        .iter()
        .filter(move |tag| tag_name(tag) == Some(name))
}

fn first_tag_value<'a>(event: &'a Event, name: &'a str) -> Option<&'a str> {
    tags_named(event, name).find_map(tag_value)
}

fn same_key(hex_key: &str, key: &PublicKey) -> bool {
    hex_key.eq_ignore_ascii_case(&key.to_hex())
}
