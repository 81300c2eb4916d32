use async_broadcast::{InactiveReceiver, Receiver, Sender};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio_tungstenite::{
    Connector, connect_async_tls_with_config,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use zapgate_core::{InvoiceState, PaymentHash, ServiceTraitBounds, SettlementUpdate};

use crate::{LedgerConfig, ShutdownSignal};

#[cfg(test)]
use mockall::automock;

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const FEED_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const FEED_CAPACITY: usize = 64;

/// Generic result type
pub type Result<T> = std::result::Result<T, Error>;

/// Generic error type
#[derive(Debug, Error)]
pub enum Error {
    /// all errors originating from requests to the ledger
    #[error("Ledger request error: {0}")]
    Request(#[from] reqwest::Error),

    /// the ledger answered with a non-success status
    #[error("Ledger API error: {status}, body: {body}")]
    Api { status: u16, body: String },

    /// the ledger sent something we could not make sense of
    #[error("Ledger returned invalid data: {0}")]
    InvalidData(String),

    /// errors on the settlement stream
    #[error("Ledger settlement stream error: {0}")]
    Stream(String),

    /// subscribing while the settlement feed is not connected
    #[error("Ledger settlement feed is not running")]
    FeedNotRunning,

    /// errors setting up TLS towards the ledger
    #[error("Ledger TLS error: {0}")]
    Tls(String),
}

/// Parameters for a new invoice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateInvoiceRequest {
    pub amount_msat: u64,
    pub description_hash: Option<[u8; 32]>,
    pub expiry_seconds: Option<u64>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInvoice {
    pub payment_hash: PaymentHash,
    /// The encoded bolt11 invoice
    pub payment_request: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InvoiceLedgerApi: ServiceTraitBounds {
    /// Creates an invoice on the ledger
    async fn create_invoice(&self, request: CreateInvoiceRequest) -> Result<CreatedInvoice>;
    /// Opens a new receiver on the shared settlement stream. Every receiver sees every entry
    /// broadcast after it was opened.
    async fn subscribe_settlements(&self) -> Result<Receiver<SettlementUpdate>>;
}

#[cfg(test)]
impl ServiceTraitBounds for MockInvoiceLedgerApi {}

#[derive(Debug, Serialize)]
struct LndCreateInvoice {
    value_msat: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<u64>,
}

impl From<&CreateInvoiceRequest> for LndCreateInvoice {
    fn from(req: &CreateInvoiceRequest) -> Self {
        Self {
            value_msat: req.amount_msat,
            memo: req.memo.clone(),
            description_hash: req.description_hash.map(|h| STANDARD.encode(h)),
            expiry: req.expiry_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LndCreateInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct LndInvoice {
    #[serde(default)]
    r_hash: String,
    #[serde(default)]
    r_preimage: Option<String>,
    #[serde(default)]
    state: Option<InvoiceState>,
    #[serde(default, deserialize_with = "lenient_u64")]
    amt_paid_msat: u64,
    #[serde(default)]
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct LndStreamFrame {
    result: Option<LndInvoice>,
    error: Option<LndStreamError>,
}

#[derive(Debug, Deserialize)]
struct LndStreamError {
    #[serde(default)]
    message: String,
}

// LND encodes 64 bit integers as json strings
fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num {
        Number(u64),
        Text(String),
    }
    match Num::deserialize(d)? {
        Num::Number(n) => Ok(n),
        Num::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn decode_payment_hash(r_hash: &str) -> Result<PaymentHash> {
    let bytes = STANDARD
        .decode(r_hash)
        .map_err(|e| Error::InvalidData(format!("r_hash is not base64: {e}")))?;
    PaymentHash::from_slice(&bytes).map_err(|e| Error::InvalidData(e.to_string()))
}

impl TryFrom<LndInvoice> for SettlementUpdate {
    type Error = Error;

    fn try_from(invoice: LndInvoice) -> Result<Self> {
        let preimage = match invoice.r_preimage.as_deref() {
            None | Some("") => None,
            Some(encoded) => Some(
                STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::InvalidData(format!("r_preimage is not base64: {e}")))?,
            ),
        };
        Ok(SettlementUpdate {
            payment_hash: decode_payment_hash(&invoice.r_hash)?,
            state: invoice.state.unwrap_or(InvoiceState::Open),
            settled_amount_msat: invoice.amt_paid_msat,
            preimage,
            payment_request: invoice.payment_request,
        })
    }
}

/// Parses one frame of the settlement stream. Frames that carry neither a result nor an error
/// yield `None`.
pub fn parse_settlement_frame(frame: &str) -> Result<Option<SettlementUpdate>> {
    let frame: LndStreamFrame =
        serde_json::from_str(frame).map_err(|e| Error::InvalidData(e.to_string()))?;
    if let Some(err) = frame.error {
        return Err(Error::Stream(err.message));
    }
    frame.result.map(SettlementUpdate::try_from).transpose()
}

struct SettlementFeed {
    sender: Arc<Sender<SettlementUpdate>>,
    _receiver: InactiveReceiver<SettlementUpdate>, // keep receiver around, so channel doesn't get closed
    connected: AtomicBool,
}

impl SettlementFeed {
    fn new() -> Self {
        let (mut tx, rx) = async_broadcast::broadcast::<SettlementUpdate>(FEED_CAPACITY);
        tx.set_overflow(true);
        tx.set_await_active(false);
        Self {
            sender: Arc::new(tx),
            _receiver: rx.deactivate(),
            connected: AtomicBool::new(false),
        }
    }
}

/// Invoice ledger backed by the LND REST API
pub struct LndRestClient {
    cl: reqwest::Client,
    tls: native_tls::TlsConnector,
    host: url::Url,
    macaroon_hex: String,
    feed: SettlementFeed,
}

impl ServiceTraitBounds for LndRestClient {}

impl LndRestClient {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let mut http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        let mut tls = native_tls::TlsConnector::builder();
        match &config.tls_cert_path {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    Error::Tls(format!("could not read cert {}: {e}", path.display()))
                })?;
                http = http.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
                tls.add_root_certificate(
                    native_tls::Certificate::from_pem(&pem)
                        .map_err(|e| Error::Tls(e.to_string()))?,
                );
            }
            None => {
                warn!("No LND TLS certificate configured, the node's certificate is not verified");
                http = http.danger_accept_invalid_certs(true);
                tls.danger_accept_invalid_certs(true);
            }
        }
        Ok(Self {
            cl: http.build()?,
            tls: tls.build().map_err(|e| Error::Tls(e.to_string()))?,
            host: config.host.clone(),
            macaroon_hex: config.macaroon_hex.clone(),
            feed: SettlementFeed::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.host
            .join(path)
            .map_err(|e| Error::InvalidData(format!("invalid ledger url: {e}")))
    }

    fn settlement_stream_url(&self) -> Result<url::Url> {
        let mut url = self.endpoint("/v1/invoices/subscribe")?;
        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidData(format!("can't use {scheme} for {url}")))?;
        Ok(url)
    }

    /// Owns the websocket to the ledger's settlement stream and broadcasts every entry to all
    /// subscribers. Reconnects until shutdown, closing the broadcast channel on exit.
    pub async fn run_settlement_feed(&self, shutdown: ShutdownSignal) {
        while !shutdown.is_shutdown() {
            match self.connect_settlement_stream().await {
                Ok(mut stream) => {
                    info!("Connected to ledger settlement stream");
                    self.feed.connected.store(true, Ordering::SeqCst);
                    let disconnect_reason = loop {
                        tokio::select! {
                            _ = shutdown.wait() => break None,
                            frame = stream.next() => match frame {
                                Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                                Some(Ok(Message::Close(_))) | None => {
                                    break Some("closed by ledger".to_owned());
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => break Some(e.to_string()),
                            }
                        }
                    };
                    self.feed.connected.store(false, Ordering::SeqCst);
                    match disconnect_reason {
                        None => break,
                        Some(reason) => warn!("Ledger settlement stream disconnected: {reason}"),
                    }
                }
                Err(e) => error!("Failed to connect to ledger settlement stream: {e}"),
            }
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(FEED_RECONNECT_DELAY) => {}
            }
        }
        self.feed.sender.close();
        info!("Ledger settlement feed stopped");
    }

    async fn connect_settlement_stream(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    > {
        let url = self.settlement_stream_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Stream(e.to_string()))?;
        request.headers_mut().insert(
            MACAROON_HEADER,
            HeaderValue::from_str(&self.macaroon_hex)
                .map_err(|e| Error::InvalidData(format!("invalid macaroon: {e}")))?,
        );
        let (stream, _) = connect_async_tls_with_config(
            request,
            None,
            false,
            Some(Connector::NativeTls(self.tls.clone())),
        )
        .await
        .map_err(|e| Error::Stream(e.to_string()))?;
        Ok(stream)
    }

    async fn handle_frame(&self, frame: &str) {
        match parse_settlement_frame(frame) {
            Ok(Some(update)) => {
                debug!(
                    "Ledger invoice {} is {} ({} msat paid)",
                    update.payment_hash, update.state, update.settled_amount_msat
                );
                if let Err(e) = self.feed.sender.broadcast(update).await {
                    debug!("No settlement subscribers: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping ledger settlement frame: {e}"),
        }
    }
}

#[async_trait]
impl InvoiceLedgerApi for LndRestClient {
    async fn create_invoice(&self, request: CreateInvoiceRequest) -> Result<CreatedInvoice> {
        let url = self.endpoint("/v1/invoices")?;
        let res = self
            .cl
            .post(url)
            .header(MACAROON_HEADER, &self.macaroon_hex)
            .json(&LndCreateInvoice::from(&request))
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send create invoice request to ledger: {e}");
                Error::Request(e)
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            error!("Ledger rejected create invoice request: {status}, body: {body}");
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let created: LndCreateInvoiceResponse = res.json().await?;
        Ok(CreatedInvoice {
            payment_hash: decode_payment_hash(&created.r_hash)?,
            payment_request: created.payment_request,
        })
    }

    async fn subscribe_settlements(&self) -> Result<Receiver<SettlementUpdate>> {
        if !self.feed.connected.load(Ordering::SeqCst) {
            return Err(Error::FeedNotRunning);
        }
        Ok(self.feed.sender.new_receiver())
    }
}
