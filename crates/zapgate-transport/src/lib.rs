//! Outbound network surfaces: publishing zap receipts to nostr relays and serving lightning
//! address requests through a websocket tunnel.

pub mod nostr_relay;
pub mod tunnel;

pub use nostr_relay::NostrRelayTransport;
pub use tunnel::TunnelClient;
