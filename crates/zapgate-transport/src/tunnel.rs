//! Serves the lightning address through an outbound websocket connection to a tunnel relay, for
//! setups without a public http endpoint.
//!
//! A session starts with a single auth exchange. Afterwards every request is handled in its own
//! task and answered with the request's id, so a slow invoice never blocks other requests. Any
//! session error ends the session and the client reconnects after a fixed delay until shutdown.

use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{debug, error, info, warn};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex, task::JoinSet};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use zapgate_api::{ShutdownSignal, TunnelConfig, service::lnurl_service::LnurlServiceApi};
use zapgate_core::{
    lnurl::InvoiceParams,
    tunnel::{
        AuthPayload, AuthReply, Inbound, InboundMessage, Outbound, OutboundMessage, ProtocolError,
        S2C_INVOICE_REQUEST,
    },
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

pub const REQUEST_TIMED_OUT: &str = "request timed out";

/// Generic result type
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that ends a tunnel session
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not connect to tunnel: {0}")]
    Connect(String),

    #[error("could not send to tunnel: {0}")]
    Send(String),

    #[error("sending to tunnel timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("could not read from tunnel: {0}")]
    Read(String),

    /// the relay rejected our token
    #[error("tunnel authentication failed: {0}")]
    Authentication(String),

    #[error("no auth response from tunnel within {0:?}")]
    AuthTimeout(Duration),

    /// the first message after auth was something other than an auth result
    #[error("unexpected auth response: {0}")]
    UnexpectedAuthResponse(String),

    #[error("tunnel connection closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

enum Request {
    PayParams,
    Invoice(InvoiceParams),
}

/// The write half of a session, shared by all request tasks
#[derive(Clone)]
struct Session {
    sink: Arc<Mutex<WsSink>>,
    send_timeout: Duration,
}

impl Session {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let frame = message.to_json()?;
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(frame)).await
        };
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(result) => result.map_err(|e| Error::Send(e.to_string())),
            Err(_) => Err(Error::SendTimeout(self.send_timeout)),
        }
    }

    async fn respond(&self, id: String, message: Outbound) {
        let kind = message.wire_type();
        match self.send(OutboundMessage::new(id.clone(), message)).await {
            Ok(()) => debug!("Sent {kind} for tunnel request {id}"),
            Err(e) => error!("Failed to send {kind} for tunnel request {id}: {e}"),
        }
    }

    async fn close(&self) {
        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(self.send_timeout, close).await {
            Ok(Ok(())) => debug!("Closed tunnel connection"),
            Ok(Err(e)) => debug!("Tunnel connection was already gone on close: {e}"),
            Err(_) => warn!("Closing tunnel connection timed out, dropping it"),
        }
    }
}

pub struct TunnelClient {
    config: TunnelConfig,
    handler: Arc<dyn LnurlServiceApi>,
}

impl TunnelClient {
    pub fn new(config: TunnelConfig, handler: Arc<dyn LnurlServiceApi>) -> Self {
        Self { config, handler }
    }

    /// Keeps a session running until shutdown, reconnecting after every failure
    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!("Starting tunnel client for {}", self.config.url);
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.connect_and_serve(&shutdown).await {
                Ok(()) => info!("Tunnel session ended"),
                Err(e) => error!("Tunnel session failed: {e}"),
            }
            if shutdown.is_shutdown() {
                break;
            }
            info!(
                "Reconnecting to tunnel in {} seconds",
                self.config.reconnect_delay.as_secs_f32()
            );
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
        info!("Tunnel client stopped");
    }

    async fn connect_and_serve(&self, shutdown: &ShutdownSignal) -> Result<()> {
        let stream = tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            connected = connect_async(self.config.url.as_str()) => {
                let (stream, _) = connected.map_err(|e| Error::Connect(e.to_string()))?;
                stream
            }
        };
        info!("Connected to tunnel at {}", self.config.url);

        let (sink, mut source) = stream.split();
        let session = Session {
            sink: Arc::new(Mutex::new(sink)),
            send_timeout: self.config.send_timeout,
        };
        let result = tokio::select! {
            _ = shutdown.wait() => {
                info!("Shutdown requested, closing tunnel connection");
                Ok(())
            }
            served = self.serve(&session, &mut source) => served,
        };
        session.close().await;
        result
    }

    async fn authenticate(&self, session: &Session, source: &mut WsSource) -> Result<AuthReply> {
        let auth_id = format!("auth-{}", uuid::Uuid::new_v4());
        session
            .send(OutboundMessage::new(
                auth_id,
                Outbound::Auth(AuthPayload {
                    token: self.config.token.clone(),
                }),
            ))
            .await?;

        let frame = tokio::time::timeout(self.config.auth_timeout, next_text(source))
            .await
            .map_err(|_| Error::AuthTimeout(self.config.auth_timeout))??;
        match InboundMessage::from_json(&frame)?.message {
            Inbound::AuthOk(reply) => Ok(reply),
            Inbound::AuthFail(reply) => Err(Error::Authentication(
                reply.message.unwrap_or_else(|| "no reason given".to_owned()),
            )),
            other => Err(Error::UnexpectedAuthResponse(format!("{other:?}"))),
        }
    }

    /// Dropping this future aborts all request tasks of the session
    async fn serve(&self, session: &Session, source: &mut WsSource) -> Result<()> {
        let reply = self.authenticate(session, source).await?;
        info!("Authenticated with tunnel as {}", reply.username);

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Tunnel request task failed: {e}");
                    }
                }
                frame = next_text(source) => self.dispatch(&frame?, session, &mut tasks),
            }
        }
    }

    fn dispatch(&self, frame: &str, session: &Session, tasks: &mut JoinSet<()>) {
        let InboundMessage { id, message } = match InboundMessage::from_json(frame) {
            Ok(message) => message,
            Err(ProtocolError::InvalidPayload { id, kind, reason }) if kind == S2C_INVOICE_REQUEST => {
                warn!("Invalid invoice request {id}: {reason}");
                let session = session.clone();
                tasks.spawn(async move {
                    session
                        .respond(id, Outbound::error(format!("invalid request: {reason}")))
                        .await;
                });
                return;
            }
            Err(e) => {
                warn!("Dropping tunnel frame: {e}");
                return;
            }
        };

        let request = match message {
            Inbound::PayParamsRequest => Request::PayParams,
            Inbound::InvoiceRequest(params) => Request::Invoice(params),
            Inbound::Error(payload) => {
                error!("Tunnel reported an error for {id}: {}", payload.message);
                return;
            }
            Inbound::AuthOk(_) | Inbound::AuthFail(_) => {
                warn!("Ignoring auth message {id} in an authenticated session");
                return;
            }
            Inbound::Unrecognized(kind) => {
                warn!("Ignoring tunnel message {id} of unknown type {kind}");
                return;
            }
        };

        let handler = self.handler.clone();
        let session = session.clone();
        let handle_timeout = self.config.handle_timeout;
        tasks.spawn(async move {
            let response = match tokio::time::timeout(handle_timeout, handle(handler, request)).await
            {
                Ok(response) => response,
                Err(_) => {
                    warn!("Tunnel request {id} timed out after {handle_timeout:?}");
                    Outbound::error(REQUEST_TIMED_OUT)
                }
            };
            session.respond(id, response).await;
        });
    }
}

async fn handle(handler: Arc<dyn LnurlServiceApi>, request: Request) -> Outbound {
    let result = match request {
        Request::PayParams => handler.pay_params().await.map(Outbound::PayParamsResponse),
        Request::Invoice(params) => handler
            .create_invoice(params)
            .await
            .map(Outbound::InvoiceResponse),
    };
    result.unwrap_or_else(|e| {
        warn!("Tunnel request failed: {e}");
        Outbound::error(e.to_string())
    })
}

/// Waits for the next text frame. Control frames are answered by tungstenite itself.
async fn next_text(source: &mut WsSource) -> Result<String> {
    while let Some(message) = source.next().await {
        match message.map_err(|e| Error::Read(e.to_string()))? {
            Message::Text(text) => return Ok(text),
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => return Ok(text),
                Err(_) => warn!("Dropping non utf-8 binary tunnel frame"),
            },
            Message::Close(frame) => {
                debug!("Tunnel sent close frame: {frame:?}");
                return Err(Error::Closed);
            }
            _ => {}
        }
    }
    Err(Error::Closed)
}
