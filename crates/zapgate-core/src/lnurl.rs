use serde::{Deserialize, Serialize};

use crate::constants::{LNURL_PAY_TAG, LNURL_STATUS_ERROR, LNURL_STATUS_OK};

/// LNURL-pay first step response (LUD-06), extended with the NIP-57 fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayParams {
    pub callback: String,
    pub max_sendable: u64,
    pub min_sendable: u64,
    pub metadata: String,
    pub comment_allowed: u64,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allows_nostr: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nostr_pubkey: Option<String>,
}

impl PayParams {
    pub fn new(
        username: &str,
        domain: &str,
        min_sendable: u64,
        max_sendable: u64,
        comment_allowed: u64,
        nostr_pubkey: Option<String>,
    ) -> Self {
        Self {
            callback: callback_url(username, domain),
            max_sendable,
            min_sendable,
            metadata: encode_metadata(username, domain),
            comment_allowed,
            tag: LNURL_PAY_TAG.to_owned(),
            allows_nostr: nostr_pubkey.as_ref().map(|_| true),
            nostr_pubkey,
        }
    }
}

/// Parameters of the LNURL-pay callback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceParams {
    pub amount_msat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// The raw zap request json, exactly as received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nostr_zap: Option<String>,
}

impl InvoiceParams {
    pub fn has_zap(&self) -> bool {
        self.nostr_zap
            .as_deref()
            .is_some_and(|zap| !zap.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessAction {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// LNURL-pay second step response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub pr: String,
    /// always empty
    pub routes: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_action: Option<SuccessAction>,
}

impl InvoiceResponse {
    pub fn new(payment_request: String) -> Self {
        Self {
            pr: payment_request,
            routes: vec![],
            success_action: None,
        }
    }
}

/// Envelope for LNURL responses served over HTTP, which carry a status field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlStatus<T> {
    pub status: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> LnurlStatus<T> {
    pub fn ok(body: T) -> Self {
        Self {
            status: LNURL_STATUS_OK.to_owned(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlError {
    pub status: String,
    pub reason: String,
}

impl LnurlError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            status: LNURL_STATUS_ERROR.to_owned(),
            reason: reason.into(),
        }
    }
}

pub fn callback_url(username: &str, domain: &str) -> String {
    format!("https://{domain}/.well-known/lnurlp/{username}/callback")
}

/// The LUD-06 metadata, a json array of [mime type, content] pairs encoded as a string
pub fn encode_metadata(username: &str, domain: &str) -> String {
    let address = format!("{username}@{domain}");
    serde_json::json!([
        ["text/plain", format!("Pay to {address}")],
        ["text/identifier", address],
    ])
    .to_string()
}
