use async_trait::async_trait;
use log::{error, info};
use nostr::Keys;
use std::sync::Arc;
use zapgate_core::{
    ServiceTraitBounds,
    constants::ZAP_INVOICE_EXPIRY_SECONDS,
    lnurl::{InvoiceParams, InvoiceResponse, PayParams},
    zap::{ZapRequest, check_zap_amount, derive_description_hash},
};

use super::{
    Error, Result,
    settlement_monitor::{SettlementMonitorApi, ZapWatch},
};
use crate::{
    LnurlConfig,
    external::ledger::{CreateInvoiceRequest, InvoiceLedgerApi},
};

#[cfg(test)]
use mockall::automock;

/// Serves the two LNURL-pay steps. Shared by the HTTP routes and the tunnel client.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LnurlServiceApi: ServiceTraitBounds {
    /// Whether the given user is the one this service issues invoices for
    fn is_known_user(&self, username: &str) -> bool;
    /// The LNURL-pay parameters of our lightning address
    async fn pay_params(&self) -> Result<PayParams>;
    /// Creates an invoice, starting a settlement monitor if a zap request is attached
    async fn create_invoice(&self, params: InvoiceParams) -> Result<InvoiceResponse>;
}

#[cfg(test)]
impl ServiceTraitBounds for MockLnurlServiceApi {}

#[derive(Clone)]
pub struct LnurlService {
    config: LnurlConfig,
    nostr_keys: Option<Keys>,
    ledger: Arc<dyn InvoiceLedgerApi>,
    monitor: Arc<dyn SettlementMonitorApi>,
}

impl ServiceTraitBounds for LnurlService {}

impl LnurlService {
    pub fn new(
        config: LnurlConfig,
        nostr_keys: Option<Keys>,
        ledger: Arc<dyn InvoiceLedgerApi>,
        monitor: Arc<dyn SettlementMonitorApi>,
    ) -> Self {
        Self {
            config,
            nostr_keys,
            ledger,
            monitor,
        }
    }

    fn validate_amount(&self, amount: u64) -> Result<()> {
        let (min, max) = (self.config.min_sendable_msat, self.config.max_sendable_msat);
        if amount < min || amount > max {
            return Err(Error::InvalidAmount { amount, min, max });
        }
        Ok(())
    }

    fn validate_comment(&self, comment: Option<&str>) -> Result<()> {
        match comment {
            Some(c) if c.chars().count() as u64 > self.config.comment_allowed => {
                Err(Error::CommentTooLong(self.config.comment_allowed))
            }
            _ => Ok(()),
        }
    }

    fn parse_zap(&self, raw: &str, amount: u64) -> Result<ZapRequest> {
        let keys = self.nostr_keys.as_ref().ok_or(Error::NostrDisabled)?;
        let zap_request = ZapRequest::parse(raw, &keys.public_key())?;
        if self.config.enforce_zap_amount {
            check_zap_amount(&zap_request, amount)?;
        }
        Ok(zap_request)
    }
}

#[async_trait]
impl LnurlServiceApi for LnurlService {
    fn is_known_user(&self, username: &str) -> bool {
        self.config.username == username
    }

    async fn pay_params(&self) -> Result<PayParams> {
        Ok(PayParams::new(
            &self.config.username,
            &self.config.domain,
            self.config.min_sendable_msat,
            self.config.max_sendable_msat,
            self.config.comment_allowed,
            self.nostr_keys.as_ref().map(|k| k.public_key().to_hex()),
        ))
    }

    async fn create_invoice(&self, params: InvoiceParams) -> Result<InvoiceResponse> {
        self.validate_amount(params.amount_msat)?;
        let comment = params.comment.as_deref().filter(|c| !c.is_empty());
        self.validate_comment(comment)?;

        let mut request = CreateInvoiceRequest {
            amount_msat: params.amount_msat,
            memo: comment.map(str::to_owned),
            ..Default::default()
        };

        let zap = match params.nostr_zap.as_deref().filter(|_| params.has_zap()) {
            Some(raw) => {
                let zap_request = self.parse_zap(raw, params.amount_msat)?;
                request.description_hash = Some(derive_description_hash(raw.as_bytes()));
                request.expiry_seconds = Some(ZAP_INVOICE_EXPIRY_SECONDS);
                Some((zap_request, raw.to_owned()))
            }
            None => None,
        };

        let created = self.ledger.create_invoice(request).await.map_err(|e| {
            error!("Failed to create invoice: {e}");
            Error::from(e)
        })?;

        info!(
            "Responding with invoice {} for {} msat (zap: {})",
            created.payment_hash,
            params.amount_msat,
            zap.is_some()
        );
        if let Some((zap_request, raw_zap_request)) = zap {
            self.monitor.launch(ZapWatch {
                payment_hash: created.payment_hash,
                payment_request: created.payment_request.clone(),
                zap_request,
                raw_zap_request,
            });
        }

        Ok(InvoiceResponse::new(created.payment_request))
    }
}
