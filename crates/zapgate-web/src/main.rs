use anyhow::{Result, anyhow};
use clap::Parser;
use cli::Cli;
use handlers::{AppState, Nip05};
use log::{error, info, warn};
use std::{net::IpAddr, sync::Arc};
use zapgate_api::{
    Config, ShutdownSignal,
    external::ledger::LndRestClient,
    service::{
        lnurl_service::{LnurlService, LnurlServiceApi},
        receipt_publisher::ReceiptPublisher,
        settlement_monitor::{DisabledSettlementMonitor, SettlementMonitor, SettlementMonitorApi},
    },
    shutdown_channel,
};
use zapgate_transport::{NostrRelayTransport, TunnelClient};

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str()))
        .init();
    let config = cli.to_config()?;
    info!(
        "Starting lightning address {}",
        config.lnurl.lightning_address()
    );

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                trigger.shutdown();
            }
            Err(e) => error!("Could not listen for Ctrl-C: {e}"),
        }
    });

    let ledger = Arc::new(LndRestClient::new(&config.ledger)?);
    tokio::spawn({
        let ledger = ledger.clone();
        let shutdown = shutdown.clone();
        async move { ledger.run_settlement_feed(shutdown).await }
    });

    let monitor: Arc<dyn SettlementMonitorApi> = match config.nostr.keys.clone() {
        Some(keys) => {
            if config.nostr.relays.is_empty() {
                warn!("No nostr relays configured, receipts only go to relays named by the zap");
            }
            let publisher = ReceiptPublisher::new(Arc::new(NostrRelayTransport::new()));
            Arc::new(SettlementMonitor::new(
                ledger.clone(),
                Arc::new(publisher),
                keys,
                config.nostr.relays.clone(),
                shutdown.clone(),
            ))
        }
        None => {
            warn!("No nostr private key configured, zaps are disabled");
            Arc::new(DisabledSettlementMonitor)
        }
    };
    let service: Arc<dyn LnurlServiceApi> = Arc::new(LnurlService::new(
        config.lnurl.clone(),
        config.nostr.keys.clone(),
        ledger,
        monitor,
    ));

    match config.tunnel.clone() {
        Some(tunnel) => TunnelClient::new(tunnel, service).run(shutdown).await,
        None => serve_http(&config, service, cli.server_host, cli.server_port, shutdown).await?,
    }
    info!("Stopped");
    Ok(())
}

async fn serve_http(
    config: &Config,
    service: Arc<dyn LnurlServiceApi>,
    address: IpAddr,
    port: u16,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let state = AppState {
        service,
        nip05: config
            .nostr
            .public_key()
            .map(|key| Nip05::new(&config.lnurl.username, &key)),
    };
    let figment = rocket::Config::figment()
        .merge(("address", address))
        .merge(("port", port))
        .merge(("log_level", "off"));

    let rocket = handlers::mount(rocket::custom(figment), state)
        .ignite()
        .await
        .map_err(|e| anyhow!("Could not start http server: {e}"))?;
    let handle = rocket.shutdown();
    tokio::spawn(async move {
        shutdown.wait().await;
        handle.notify();
    });

    info!(
        "Serving https://{}/.well-known/lnurlp/{} on {address}:{port}",
        config.lnurl.domain, config.lnurl.username
    );
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Http server failed: {e}"))?;
    Ok(())
}
