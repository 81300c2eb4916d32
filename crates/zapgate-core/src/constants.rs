use std::time::Duration;

// Nostr event kinds (NIP-57)
pub const ZAP_REQUEST_KIND: u16 = 9734;
pub const ZAP_RECEIPT_KIND: u16 = 9735;

// Tag names used on zap requests and receipts
pub const TAG_RECIPIENT: &str = "p";
pub const TAG_SENDER: &str = "P";
pub const TAG_BOLT11: &str = "bolt11";
pub const TAG_DESCRIPTION: &str = "description";
pub const TAG_PREIMAGE: &str = "preimage";
pub const TAG_EVENT: &str = "e";
pub const TAG_ADDRESS: &str = "a";
pub const TAG_RELAYS: &str = "relays";
pub const TAG_AMOUNT: &str = "amount";

/// Invoices carrying a zap request expire quickly, the receipt is only meaningful while the
/// social context is fresh.
pub const ZAP_INVOICE_EXPIRY_SECONDS: u64 = 300;

/// How long a settlement monitor waits for its invoice to be paid.
pub const SETTLEMENT_MONITOR_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Per relay bound on connecting and publishing a receipt.
pub const RECEIPT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(15);

// Tunnel session timings
pub const TUNNEL_RECONNECT_DELAY: Duration = Duration::from_secs(10);
pub const TUNNEL_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const TUNNEL_HANDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const TUNNEL_SEND_TIMEOUT: Duration = Duration::from_secs(10);

// LNURL-pay
pub const LNURL_PAY_TAG: &str = "payRequest";
pub const LNURL_STATUS_OK: &str = "OK";
pub const LNURL_STATUS_ERROR: &str = "ERROR";
pub const DEFAULT_MIN_SENDABLE_MSAT: u64 = 1_000;
pub const DEFAULT_MAX_SENDABLE_MSAT: u64 = 1_000_000_000;
pub const DEFAULT_COMMENT_ALLOWED: u64 = 255;
