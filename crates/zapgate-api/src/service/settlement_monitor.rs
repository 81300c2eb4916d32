use async_broadcast::RecvError;
use log::{debug, error, info, warn};
use nostr::Keys;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};
use zapgate_core::{
    PaymentHash, ServiceTraitBounds, SettlementUpdate,
    constants::{SETTLEMENT_MONITOR_TIMEOUT, TAG_RELAYS},
    zap::{ZapRequest, build_zap_receipt},
};

use super::receipt_publisher::ReceiptPublisherApi;
use crate::{ShutdownSignal, external::ledger::InvoiceLedgerApi};

#[cfg(test)]
use mockall::automock;

/// Everything needed to issue a receipt once the zap invoice is paid
#[derive(Debug, Clone)]
pub struct ZapWatch {
    pub payment_hash: PaymentHash,
    /// The encoded invoice, as returned by the ledger on creation
    pub payment_request: String,
    pub zap_request: ZapRequest,
    /// The zap request exactly as received
    pub raw_zap_request: String,
}

/// Terminal states of a monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Matched(SettlementUpdate),
    TimedOut,
    StreamClosed,
    StreamError,
    Cancelled,
    /// a monitor for the same payment hash is already running
    AlreadyWatching,
}

#[cfg_attr(test, automock)]
pub trait SettlementMonitorApi: ServiceTraitBounds {
    /// Starts a detached monitor for the given zap invoice
    fn launch(&self, watch: ZapWatch);
}

#[cfg(test)]
impl ServiceTraitBounds for MockSettlementMonitorApi {}

/// Watches the ledger's settlement stream for zap invoices and publishes a zap receipt for each
/// one that gets paid in time.
#[derive(Clone)]
pub struct SettlementMonitor {
    ledger: Arc<dyn InvoiceLedgerApi>,
    publisher: Arc<dyn ReceiptPublisherApi>,
    keys: Keys,
    relays: Vec<url::Url>,
    timeout: Duration,
    shutdown: ShutdownSignal,
    active: Arc<Mutex<HashSet<PaymentHash>>>,
}

impl ServiceTraitBounds for SettlementMonitor {}

impl SettlementMonitor {
    pub fn new(
        ledger: Arc<dyn InvoiceLedgerApi>,
        publisher: Arc<dyn ReceiptPublisherApi>,
        keys: Keys,
        relays: Vec<url::Url>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            ledger,
            publisher,
            keys,
            relays,
            timeout: SETTLEMENT_MONITOR_TIMEOUT,
            shutdown,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, hash: PaymentHash) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(hash)
    }

    fn release(&self, hash: &PaymentHash) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(hash);
    }

    /// Runs one monitor to its terminal state. On a match, the zap receipt is built and published
    /// before this returns.
    pub async fn watch(&self, watch: ZapWatch) -> MonitorOutcome {
        let hash = watch.payment_hash;
        if !self.claim(hash) {
            warn!("Settlement of {hash} is already being monitored");
            return MonitorOutcome::AlreadyWatching;
        }
        let outcome = self.wait_for_settlement(&hash).await;
        self.release(&hash);

        if let MonitorOutcome::Matched(update) = &outcome {
            info!(
                "Zap invoice {hash} settled with {} msat",
                update.settled_amount_msat
            );
            self.publish_receipt(&watch, update).await;
        }
        outcome
    }

    async fn wait_for_settlement(&self, hash: &PaymentHash) -> MonitorOutcome {
        let mut rx = match self.ledger.subscribe_settlements().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Failed to subscribe to settlements for {hash}: {e}");
                return MonitorOutcome::StreamError;
            }
        };
        info!("Started monitoring settlement of zap invoice {hash}");

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("Stopped monitoring {hash}: not settled within {:?}", self.timeout);
                    return MonitorOutcome::TimedOut;
                }
                _ = self.shutdown.wait() => {
                    info!("Stopped monitoring {hash}: shutting down");
                    return MonitorOutcome::Cancelled;
                }
                entry = rx.recv() => match entry {
                    Ok(update) if update.payment_hash == *hash && update.is_settled() => {
                        return MonitorOutcome::Matched(update);
                    }
                    Ok(update) => {
                        debug!("Ignoring settlement entry {} ({}) while monitoring {hash}", update.payment_hash, update.state);
                    }
                    Err(RecvError::Overflowed(missed)) => {
                        warn!("Settlement monitor for {hash} missed {missed} entries");
                    }
                    Err(RecvError::Closed) => {
                        warn!("Stopped monitoring {hash}: settlement stream closed");
                        return MonitorOutcome::StreamClosed;
                    }
                }
            }
        }
    }

    async fn publish_receipt(&self, watch: &ZapWatch, update: &SettlementUpdate) {
        let bolt11 = if update.payment_request.is_empty() {
            watch.payment_request.as_str()
        } else {
            update.payment_request.as_str()
        };
        let preimage = update.preimage_hex();
        let receipt = match build_zap_receipt(
            &watch.raw_zap_request,
            &watch.zap_request,
            bolt11,
            preimage.as_deref(),
            &self.keys,
        ) {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(
                    "Not publishing zap receipt for zap request {}: {e}",
                    watch.zap_request.id()
                );
                return;
            }
        };
        info!(
            "Created zap receipt {} for zap request {}",
            receipt.id(),
            watch.zap_request.id()
        );
        let relays = self.receipt_relays(&watch.zap_request);
        self.publisher.publish_receipt(receipt, relays).await;
    }

    /// Our configured relays, followed by the ones the zapper asked for
    fn receipt_relays(&self, zap_request: &ZapRequest) -> Vec<url::Url> {
        let mut relays = self.relays.clone();
        let requested = zap_request
            .tags(TAG_RELAYS)
            .into_iter()
            .flat_map(|tag| tag.as_slice().iter().skip(1).cloned().collect::<Vec<_>>())
            .filter_map(|relay| url::Url::parse(&relay).ok());
        for relay in requested {
            if !relays.contains(&relay) {
                relays.push(relay);
            }
        }
        relays
    }
}

impl SettlementMonitorApi for SettlementMonitor {
    fn launch(&self, watch: ZapWatch) {
        let monitor = self.clone();
        tokio::spawn(async move {
            let hash = watch.payment_hash;
            let outcome = monitor.watch(watch).await;
            debug!("Settlement monitor for {hash} finished: {outcome:?}");
        });
    }
}

/// Stands in for the monitor when no nostr keys are configured. Zap invoices are rejected before
/// they reach it, so nothing is ever watched.
#[derive(Debug, Clone, Default)]
pub struct DisabledSettlementMonitor;

impl ServiceTraitBounds for DisabledSettlementMonitor {}

impl SettlementMonitorApi for DisabledSettlementMonitor {
    fn launch(&self, watch: ZapWatch) {
        warn!(
            "Zaps are disabled, not watching invoice {}",
            watch.payment_hash
        );
    }
}
