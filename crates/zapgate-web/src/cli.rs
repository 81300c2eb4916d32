use anyhow::{Context, Result, anyhow};
use clap::Parser;
use nostr::Keys;
use std::{net::IpAddr, path::PathBuf};
use zapgate_api::{Config, LedgerConfig, LnurlConfig, NostrConfig, TunnelConfig};
use zapgate_core::constants::{
    DEFAULT_COMMENT_ALLOWED, DEFAULT_MAX_SENDABLE_MSAT, DEFAULT_MIN_SENDABLE_MSAT,
};

/// Lightning address server with nostr zap receipts
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Cli {
    /// The user part of the lightning address
    #[arg(long, env = "USERNAME")]
    pub username: String,

    /// The domain part of the lightning address
    #[arg(long, env = "DOMAIN")]
    pub domain: String,

    #[arg(long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    pub server_host: IpAddr,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub server_port: u16,

    /// LND REST endpoint
    #[arg(long, env = "LND_HOST", default_value = "https://localhost:8080")]
    pub lnd_host: url::Url,

    #[arg(
        long,
        env = "LND_MACAROON_PATH",
        default_value = "~/.lnd/data/chain/bitcoin/mainnet/admin.macaroon"
    )]
    pub lnd_macaroon_path: String,

    /// Without it, the node's certificate is not verified
    #[arg(long, env = "LND_TLS_CERT_PATH")]
    pub lnd_tls_cert_path: Option<PathBuf>,

    /// nsec or hex. Zaps are disabled without it.
    #[arg(long, env = "NOSTR_PRIVATE_KEY", hide_env_values = true)]
    pub nostr_private_key: Option<String>,

    /// Relays zap receipts are published to, comma separated
    #[arg(long, env = "NOSTR_RELAYS", value_delimiter = ',')]
    pub nostr_relays: Vec<url::Url>,

    #[arg(long, env = "MIN_SENDABLE_MSAT", default_value_t = DEFAULT_MIN_SENDABLE_MSAT)]
    pub min_sendable_msat: u64,

    #[arg(long, env = "MAX_SENDABLE_MSAT", default_value_t = DEFAULT_MAX_SENDABLE_MSAT)]
    pub max_sendable_msat: u64,

    #[arg(long, env = "COMMENT_ALLOWED", default_value_t = DEFAULT_COMMENT_ALLOWED)]
    pub comment_allowed: u64,

    /// Require a zap request's amount tag to match the invoice amount
    #[arg(long, env = "ENFORCE_ZAP_AMOUNT")]
    pub enforce_zap_amount: bool,

    /// Serve through the tunnel instead of the local http server
    #[arg(long, env = "TUNNEL_ENABLED")]
    pub tunnel_enabled: bool,

    #[arg(long, env = "TUNNEL_URL")]
    pub tunnel_url: Option<url::Url>,

    #[arg(long, env = "TUNNEL_TOKEN", default_value = "", hide_env_values = true)]
    pub tunnel_token: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn to_config(&self) -> Result<Config> {
        let keys = self
            .nostr_private_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(Keys::parse)
            .transpose()
            .context("Invalid nostr private key")?;

        let macaroon_path = expand_home(&self.lnd_macaroon_path);
        let macaroon = std::fs::read(&macaroon_path)
            .with_context(|| format!("Could not read macaroon at {}", macaroon_path.display()))?;

        let tunnel = match (self.tunnel_enabled, &self.tunnel_url) {
            (false, _) => None,
            (true, Some(url)) => Some(TunnelConfig::new(url.clone(), self.tunnel_token.clone())),
            (true, None) => return Err(anyhow!("Tunnel mode needs a tunnel url")),
        };

        let config = Config {
            lnurl: LnurlConfig {
                min_sendable_msat: self.min_sendable_msat,
                max_sendable_msat: self.max_sendable_msat,
                comment_allowed: self.comment_allowed,
                enforce_zap_amount: self.enforce_zap_amount,
                ..LnurlConfig::new(self.username.clone(), self.domain.clone())
            },
            nostr: NostrConfig {
                keys,
                relays: self.nostr_relays.clone(),
            },
            ledger: LedgerConfig {
                host: self.lnd_host.clone(),
                macaroon_hex: hex::encode(macaroon),
                tls_cert_path: self.lnd_tls_cert_path.clone(),
            },
            tunnel,
        };
        config.validate()?;
        Ok(config)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_macaroon(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("zapgate-{}-{name}.macaroon", std::process::id()));
        std::fs::write(&path, [0xde, 0xad, 0xbe, 0xef]).unwrap();
        path
    }

    fn parse(macaroon: &Path, extra: &[&str]) -> Cli {
        let mut args = vec![
            "zapgate",
            "--username",
            "alice",
            "--domain",
            "example.com",
            "--lnd-macaroon-path",
            macaroon.to_str().unwrap(),
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_minimal_config() {
        let macaroon = write_macaroon("minimal");
        let config = parse(&macaroon, &[]).to_config().unwrap();

        assert_eq!(config.lnurl.lightning_address(), "alice@example.com");
        assert_eq!(config.lnurl.min_sendable_msat, DEFAULT_MIN_SENDABLE_MSAT);
        assert!(!config.lnurl.enforce_zap_amount);
        assert_eq!(config.ledger.macaroon_hex, "deadbeef");
        assert!(!config.nostr.zaps_enabled());
        assert!(config.tunnel.is_none());
    }

    #[test]
    fn test_full_config() {
        let macaroon = write_macaroon("full");
        let keys = Keys::generate();
        let secret = keys.secret_key().to_secret_hex();
        let cli = parse(
            &macaroon,
            &[
                "--nostr-private-key",
                &secret,
                "--nostr-relays",
                "wss://relay.one.com,wss://relay.two.com",
                "--max-sendable-msat",
                "50000",
                "--enforce-zap-amount",
                "--tunnel-enabled",
                "--tunnel-url",
                "wss://tunnel.example.com/ws",
                "--tunnel-token",
                "secret",
            ],
        );
        let config = cli.to_config().unwrap();

        assert_eq!(config.nostr.public_key(), Some(keys.public_key()));
        assert_eq!(config.nostr.relays.len(), 2);
        assert_eq!(config.lnurl.max_sendable_msat, 50000);
        assert!(config.lnurl.enforce_zap_amount);
        let tunnel = config.tunnel.unwrap();
        assert_eq!(tunnel.url.as_str(), "wss://tunnel.example.com/ws");
        assert_eq!(tunnel.token, "secret");
    }

    #[test]
    fn test_invalid_configs() {
        let macaroon = write_macaroon("invalid");
        assert!(
            parse(&macaroon, &["--tunnel-enabled"])
                .to_config()
                .is_err()
        );
        assert!(
            parse(
                &macaroon,
                &["--tunnel-enabled", "--tunnel-url", "wss://tunnel.example.com"]
            )
            .to_config()
            .is_err()
        );
        assert!(
            parse(&macaroon, &["--nostr-private-key", "not a key"])
                .to_config()
                .is_err()
        );

        let missing = PathBuf::from("/nonexistent/admin.macaroon");
        assert!(parse(&missing, &[]).to_config().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/lnd/admin.macaroon"), PathBuf::from("/etc/lnd/admin.macaroon"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home("~/.lnd/admin.macaroon"),
                PathBuf::from(home).join(".lnd/admin.macaroon")
            );
        }
    }
}
