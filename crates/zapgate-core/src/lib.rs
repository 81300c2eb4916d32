use thiserror::Error;

pub mod constants;
pub mod hash;
pub mod invoice;
pub mod lnurl;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tunnel;
pub mod zap;

pub use hash::PaymentHash;
pub use invoice::{InvoiceState, SettlementUpdate};

/// Services are shared between the HTTP layer, the tunnel client and detached monitor tasks, so
/// every service trait object has to be usable across threads.
pub trait ServiceTraitBounds: Send + Sync {}

/// Generic validation error type for values parsed at the edges of the system
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// error returned if a payment hash is not 32 bytes of hex
    #[error("invalid payment hash")]
    InvalidPaymentHash,

    /// error returned if a preimage is not 32 bytes of hex
    #[error("invalid preimage")]
    InvalidPreimage,

    /// error returned if a bolt11 invoice can't be decoded
    #[error("invalid bolt11 invoice: {0}")]
    InvalidInvoice(String),
}
