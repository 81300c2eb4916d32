use anyhow::{Result, anyhow};
use nostr::{Keys, PublicKey};
use std::{path::PathBuf, time::Duration};
use zapgate_core::constants::{
    DEFAULT_COMMENT_ALLOWED, DEFAULT_MAX_SENDABLE_MSAT, DEFAULT_MIN_SENDABLE_MSAT,
    TUNNEL_AUTH_TIMEOUT, TUNNEL_HANDLE_TIMEOUT, TUNNEL_RECONNECT_DELAY, TUNNEL_SEND_TIMEOUT,
};

pub mod external;
pub mod service;
pub mod util;

pub use util::shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};

/// The complete service configuration. Built once at startup and handed to the constructors of
/// the services that need it.
#[derive(Debug, Clone)]
pub struct Config {
    pub lnurl: LnurlConfig,
    pub nostr: NostrConfig,
    pub ledger: LedgerConfig,
    /// Serve through the tunnel instead of the http server
    pub tunnel: Option<TunnelConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.lnurl.validate()?;
        if let Some(ref tunnel) = self.tunnel {
            tunnel.validate()?;
        }
        Ok(())
    }
}

/// Lightning address specific configuration
#[derive(Debug, Clone)]
pub struct LnurlConfig {
    /// The user part of the lightning address
    pub username: String,
    /// The domain part of the lightning address, also used for the callback url
    pub domain: String,
    pub min_sendable_msat: u64,
    pub max_sendable_msat: u64,
    /// Max length of the payer comment
    pub comment_allowed: u64,
    /// If set, a zap request's amount tag has to equal the requested amount
    pub enforce_zap_amount: bool,
}

impl LnurlConfig {
    pub fn new(username: String, domain: String) -> Self {
        Self {
            username,
            domain,
            min_sendable_msat: DEFAULT_MIN_SENDABLE_MSAT,
            max_sendable_msat: DEFAULT_MAX_SENDABLE_MSAT,
            comment_allowed: DEFAULT_COMMENT_ALLOWED,
            enforce_zap_amount: false,
        }
    }

    pub fn lightning_address(&self) -> String {
        format!("{}@{}", self.username, self.domain)
    }

    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.domain.trim().is_empty() {
            return Err(anyhow!("Username and domain must not be empty"));
        }
        if self.min_sendable_msat > self.max_sendable_msat {
            return Err(anyhow!(
                "Min sendable {} msat is larger than max sendable {} msat",
                self.min_sendable_msat,
                self.max_sendable_msat
            ));
        }
        Ok(())
    }
}

/// Nostr specific configuration
#[derive(Debug, Clone, Default)]
pub struct NostrConfig {
    /// The keys zap receipts are signed with. Zaps are disabled without them.
    pub keys: Option<Keys>,
    /// All relays we publish zap receipts to
    pub relays: Vec<url::Url>,
}

impl NostrConfig {
    pub fn zaps_enabled(&self) -> bool {
        self.keys.is_some()
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.keys.as_ref().map(|k| k.public_key())
    }
}

/// LND REST connection
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub host: url::Url,
    pub macaroon_hex: String,
    /// The node's TLS certificate. Without it, the certificate is not verified.
    pub tls_cert_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub url: url::Url,
    pub token: String,
    pub reconnect_delay: Duration,
    pub auth_timeout: Duration,
    pub handle_timeout: Duration,
    pub send_timeout: Duration,
}

impl TunnelConfig {
    pub fn new(url: url::Url, token: String) -> Self {
        Self {
            url,
            token,
            reconnect_delay: TUNNEL_RECONNECT_DELAY,
            auth_timeout: TUNNEL_AUTH_TIMEOUT,
            handle_timeout: TUNNEL_HANDLE_TIMEOUT,
            send_timeout: TUNNEL_SEND_TIMEOUT,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(anyhow!("Tunnel mode needs a tunnel token"));
        }
        Ok(())
    }
}
