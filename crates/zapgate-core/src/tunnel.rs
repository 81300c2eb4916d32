//! Wire format of the tunnel session.
//!
//! Every frame is a json envelope `{id, type, payload?}`. Decoding maps the type string onto a
//! closed set of variants, types we don't know decode to [`Inbound::Unrecognized`] instead of
//! failing, since the relay may speak a newer protocol revision than we do.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::lnurl::{InvoiceParams, InvoiceResponse, PayParams};

pub const C2S_AUTH: &str = "c2s_auth";
pub const C2S_PAY_PARAMS_RESPONSE: &str = "c2s_lnurlp_response";
pub const C2S_INVOICE_RESPONSE: &str = "c2s_invoice_response";
pub const C2S_ERROR: &str = "c2s_error";

pub const S2C_AUTH_OK: &str = "s2c_auth_ok";
pub const S2C_AUTH_FAIL: &str = "s2c_auth_fail";
pub const S2C_PAY_PARAMS_REQUEST: &str = "s2c_lnurlp_request";
pub const S2C_INVOICE_REQUEST: &str = "s2c_invoice_request";
pub const S2C_ERROR: &str = "s2c_error";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed tunnel frame: {0}")]
    MalformedFrame(String),

    /// The frame itself was fine, so the request can still be answered
    #[error("invalid payload for message {id} of type {kind}: {reason}")]
    InvalidPayload {
        id: String,
        kind: String,
        reason: String,
    },

    #[error("could not encode tunnel frame: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthReply {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Messages the relay sends to us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    AuthOk(AuthReply),
    AuthFail(AuthReply),
    PayParamsRequest,
    InvoiceRequest(InvoiceParams),
    Error(ErrorPayload),
    /// Carries the unknown type string
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub message: Inbound,
}

impl InboundMessage {
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(frame)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        let message = match envelope.kind.as_str() {
            S2C_AUTH_OK => Inbound::AuthOk(optional_payload(&envelope)?),
            S2C_AUTH_FAIL => Inbound::AuthFail(optional_payload(&envelope)?),
            S2C_PAY_PARAMS_REQUEST => Inbound::PayParamsRequest,
            S2C_INVOICE_REQUEST => Inbound::InvoiceRequest(required_payload(&envelope)?),
            S2C_ERROR => Inbound::Error(required_payload(&envelope)?),
            other => Inbound::Unrecognized(other.to_owned()),
        };
        Ok(Self {
            id: envelope.id,
            message,
        })
    }
}

/// Messages we send to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Auth(AuthPayload),
    PayParamsResponse(PayParams),
    InvoiceResponse(InvoiceResponse),
    Error(ErrorPayload),
}

impl Outbound {
    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn wire_type(&self) -> &'static str {
        match self {
            Outbound::Auth(_) => C2S_AUTH,
            Outbound::PayParamsResponse(_) => C2S_PAY_PARAMS_RESPONSE,
            Outbound::InvoiceResponse(_) => C2S_INVOICE_RESPONSE,
            Outbound::Error(_) => C2S_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: String,
    pub message: Outbound,
}

impl OutboundMessage {
    pub fn new(id: impl Into<String>, message: Outbound) -> Self {
        Self {
            id: id.into(),
            message,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let payload = match &self.message {
            Outbound::Auth(payload) => serde_json::to_value(payload),
            Outbound::PayParamsResponse(payload) => serde_json::to_value(payload),
            Outbound::InvoiceResponse(payload) => serde_json::to_value(payload),
            Outbound::Error(payload) => serde_json::to_value(payload),
        }
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        serde_json::to_string(&Envelope {
            id: self.id.clone(),
            kind: self.message.wire_type().to_owned(),
            payload: Some(payload),
        })
        .map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

fn required_payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, ProtocolError> {
    let payload = envelope
        .payload
        .clone()
        .ok_or_else(|| ProtocolError::InvalidPayload {
            id: envelope.id.clone(),
            kind: envelope.kind.clone(),
            reason: "missing payload".to_owned(),
        })?;
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        id: envelope.id.clone(),
        kind: envelope.kind.clone(),
        reason: e.to_string(),
    })
}

fn optional_payload<T: DeserializeOwned + Default>(envelope: &Envelope) -> Result<T, ProtocolError> {
    match envelope.payload {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(_) => required_payload(envelope),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_decode_invoice_request() {
        let frame = json!({
            "id": "req-1",
            "type": "s2c_invoice_request",
            "payload": {"amount_msat": 21000, "comment": "thanks", "nostr_zap": "{\"kind\":9734}"}
        })
        .to_string();

        let msg = InboundMessage::from_json(&frame).unwrap();
        assert_eq!(msg.id, "req-1");
        assert_eq!(
            msg.message,
            Inbound::InvoiceRequest(InvoiceParams {
                amount_msat: 21000,
                comment: Some("thanks".into()),
                nostr_zap: Some("{\"kind\":9734}".into()),
            })
        );
    }

    #[rstest]
    #[case::pay_params(json!({"id": "a", "type": "s2c_lnurlp_request"}), Inbound::PayParamsRequest)]
    #[case::auth_ok(
        json!({"id": "a", "type": "s2c_auth_ok", "payload": {"username": "alice"}}),
        Inbound::AuthOk(AuthReply { username: "alice".into(), message: None })
    )]
    #[case::auth_fail_without_payload(
        json!({"id": "a", "type": "s2c_auth_fail"}),
        Inbound::AuthFail(AuthReply::default())
    )]
    #[case::server_error(
        json!({"id": "a", "type": "s2c_error", "payload": {"message": "boom"}}),
        Inbound::Error(ErrorPayload { message: "boom".into() })
    )]
    #[case::unknown_type(
        json!({"id": "a", "type": "s2c_ping", "payload": {"x": 1}}),
        Inbound::Unrecognized("s2c_ping".into())
    )]
    fn test_decode_inbound(#[case] frame: serde_json::Value, #[case] expected: Inbound) {
        let msg = InboundMessage::from_json(&frame.to_string()).unwrap();
        assert_eq!(msg.message, expected);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            InboundMessage::from_json("not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        let frame = json!({"id": "a", "type": "s2c_invoice_request"}).to_string();
        assert!(matches!(
            InboundMessage::from_json(&frame),
            Err(ProtocolError::InvalidPayload { .. })
        ));
        let frame = json!({"id": "b", "type": "s2c_invoice_request", "payload": {"amount_msat": "lots"}})
            .to_string();
        assert!(matches!(
            InboundMessage::from_json(&frame),
            Err(ProtocolError::InvalidPayload { id, .. }) if id == "b"
        ));
    }

    #[test]
    fn test_encode_outbound() {
        let msg = OutboundMessage::new("req-7", Outbound::InvoiceResponse(InvoiceResponse::new("lnbc1".into())));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": "req-7", "type": "c2s_invoice_response", "payload": {"pr": "lnbc1", "routes": []}})
        );

        let msg = OutboundMessage::new("auth-1", Outbound::Auth(AuthPayload { token: "secret".into() }));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "c2s_auth");
        assert_eq!(value["payload"]["token"], "secret");

        let msg = OutboundMessage::new("req-8", Outbound::error("request timed out"));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "c2s_error");
        assert_eq!(value["payload"]["message"], "request timed out");
    }
}
