pub mod lnurl_service;
pub mod receipt_publisher;
pub mod settlement_monitor;

use crate::external;
use thiserror::Error;

/// Generic result type
pub type Result<T> = std::result::Result<T, Error>;

/// Generic error type
#[derive(Debug, Error)]
pub enum Error {
    /// errors that stem from validating zap requests
    #[error("Invalid zap request: {0}")]
    Zap(#[from] zapgate_core::zap::Error),

    /// all errors originating from the invoice ledger
    #[error("Failed to create invoice: {0}")]
    Ledger(#[from] external::ledger::Error),

    /// a zap was requested, but we have no nostr keys
    #[error("Nostr functionality is disabled")]
    NostrDisabled,

    /// the requested amount is outside of what we accept
    #[error("Amount {amount} msat is not between {min} and {max} msat")]
    InvalidAmount { amount: u64, min: u64, max: u64 },

    /// the payer comment is longer than what we accept
    #[error("Comment is longer than {0} characters")]
    CommentTooLong(u64),
}
