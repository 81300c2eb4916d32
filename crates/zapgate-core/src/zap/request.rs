use nostr::{Event, EventId, JsonUtil, Kind, PublicKey, Tag};

use super::{Error, Result, first_tag_value, same_key, tag_value, tags_named};
use crate::{
    constants::{TAG_AMOUNT, TAG_RECIPIENT, ZAP_REQUEST_KIND},
    hash::sha256,
};

/// A zap request (kind 9734) that passed validation against our recipient key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapRequest {
    event: Event,
}

impl ZapRequest {
    /// Parses the given raw json and validates it as a zap request for the given recipient
    pub fn parse(raw: &str, recipient: &PublicKey) -> Result<Self> {
        let event = Event::from_json(raw).map_err(|e| Error::Json(e.to_string()))?;
        validate_zap_request(event, recipient)
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }

    /// The public key of the one zapping
    pub fn sender(&self) -> PublicKey {
        self.event.pubkey
    }

    /// The tags with the given name, in the order of the original request
    pub fn tags(&self, name: &str) -> Vec<Tag> {
        tags_named(&self.event, name).cloned().collect()
    }

    /// The raw value of the optional amount tag
    pub fn amount_tag(&self) -> Option<&str> {
        first_tag_value(&self.event, TAG_AMOUNT)
    }
}

/// Validates a nostr event as a zap request addressed to `recipient`.
/// There has to be exactly one p tag and it has to carry the recipient's public key.
pub fn validate_zap_request(event: Event, recipient: &PublicKey) -> Result<ZapRequest> {
    if event.kind != Kind::ZapRequest {
        return Err(Error::InvalidKind {
            expected: ZAP_REQUEST_KIND,
            got: event.kind.as_u16(),
        });
    }

    if event.verify().is_err() {
        return Err(Error::InvalidSignature);
    }

    let recipient_tags: Vec<&Tag> = tags_named(&event, TAG_RECIPIENT).collect();
    let recipient_tag = match recipient_tags.as_slice() {
        [] => return Err(Error::MissingRecipientTag),
        [tag] => *tag,
        _ => return Err(Error::MultipleRecipientTags),
    };
    let tagged = tag_value(recipient_tag).ok_or(Error::MissingRecipientTag)?;
    if !same_key(tagged, recipient) {
        return Err(Error::RecipientMismatch {
            expected: recipient.to_hex(),
            got: tagged.to_owned(),
        });
    }

    Ok(ZapRequest { event })
}

/// Checks the optional amount tag of the zap request against the requested invoice amount.
/// Requests without an amount tag always pass.
pub fn check_zap_amount(zap_request: &ZapRequest, requested_msat: u64) -> Result<()> {
    match zap_request.amount_tag() {
        None => Ok(()),
        Some(tagged) => match tagged.trim().parse::<u64>() {
            Ok(amount) if amount == requested_msat => Ok(()),
            _ => Err(Error::AmountMismatch {
                requested: requested_msat,
                tagged: tagged.to_owned(),
            }),
        },
    }
}

/// The description hash for a zap invoice is the sha256 of the zap request exactly as it was
/// received, before any re-serialization.
pub fn derive_description_hash(raw_zap_request: &[u8]) -> [u8; 32] {
    sha256(raw_zap_request)
}
