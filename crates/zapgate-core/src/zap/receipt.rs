use log::error;
use nostr::{Event, EventBuilder, EventId, Keys, Kind, Tag};

use super::{Error, Result, ZapRequest, first_tag_value};
use crate::{
    PaymentHash,
    constants::{
        TAG_ADDRESS, TAG_BOLT11, TAG_DESCRIPTION, TAG_EVENT, TAG_PREIMAGE, TAG_RECIPIENT,
        TAG_RELAYS, TAG_SENDER, ZAP_RECEIPT_KIND,
    },
    hash::{parse_preimage, sha256},
    invoice::decode_bolt11,
};

/// A signed zap receipt (kind 9735) that passed receipt validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapReceipt {
    event: Event,
}

impl ZapReceipt {
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn into_event(self) -> Event {
        self.event
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }

    pub fn bolt11(&self) -> Option<&str> {
        first_tag_value(&self.event, TAG_BOLT11)
    }
}

impl TryFrom<Event> for ZapReceipt {
    type Error = Error;

    fn try_from(event: Event) -> Result<Self> {
        validate_zap_receipt(&event)?;
        Ok(Self { event })
    }
}

/// Builds and signs the zap receipt for a paid zap invoice.
///
/// The description tag carries `raw_zap_request` verbatim, so its hash matches the description
/// hash the invoice committed to. `e`, `a` and `relays` tags of the zap request are copied over.
/// The result is validated before it is returned, a receipt that fails validation is never handed
/// out.
pub fn build_zap_receipt(
    raw_zap_request: &str,
    zap_request: &ZapRequest,
    paid_invoice: &str,
    preimage_hex: Option<&str>,
    recipient_keys: &Keys,
) -> Result<ZapReceipt> {
    let mut tags = vec![
        tag([TAG_RECIPIENT, &recipient_keys.public_key().to_hex()])?,
        tag([TAG_BOLT11, paid_invoice])?,
        tag([TAG_DESCRIPTION, raw_zap_request])?,
    ];
    if let Some(preimage) = preimage_hex {
        tags.push(tag([TAG_PREIMAGE, preimage])?);
    }
    tags.push(tag([TAG_SENDER, &zap_request.sender().to_hex()])?);
    for name in [TAG_EVENT, TAG_ADDRESS, TAG_RELAYS] {
        tags.extend(zap_request.tags(name));
    }

    // the p tag names the signer, which nostr drops unless self tagging is allowed
    let event = EventBuilder::new(Kind::ZapReceipt, "")
        .tags(tags)
        .allow_self_tagging()
        .sign_with_keys(recipient_keys)
        .map_err(|e| {
            error!("Failed to sign zap receipt: {e}");
            Error::ReceiptConstructionFailed(e.to_string())
        })?;

    ZapReceipt::try_from(event).map_err(|e| {
        error!(
            "Built zap receipt for zap request {} failed validation: {e}",
            zap_request.id()
        );
        Error::ReceiptConstructionFailed(e.to_string())
    })
}

/// Validates a zap receipt. p, bolt11 and description tags are required, an invoice committing to
/// a description hash has to match the hash of the description tag and a preimage, if present,
/// has to hash to the invoice's payment hash.
pub fn validate_zap_receipt(event: &Event) -> Result<()> {
    if event.kind != Kind::ZapReceipt {
        return Err(Error::InvalidKind {
            expected: ZAP_RECEIPT_KIND,
            got: event.kind.as_u16(),
        });
    }

    if event.verify().is_err() {
        return Err(Error::InvalidSignature);
    }

    let recipient = first_tag_value(event, TAG_RECIPIENT);
    let bolt11 = first_tag_value(event, TAG_BOLT11);
    let description = first_tag_value(event, TAG_DESCRIPTION);
    let (bolt11, description) = match (recipient, bolt11, description) {
        (Some(_), Some(bolt11), Some(description)) => (bolt11, description),
        _ => {
            let missing = [
                (TAG_RECIPIENT, recipient),
                (TAG_BOLT11, bolt11),
                (TAG_DESCRIPTION, description),
            ]
            .into_iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name.to_owned())
            .collect();
            return Err(Error::MissingTags(missing));
        }
    };

    let commitments = decode_bolt11(bolt11)?;

    if let Some(preimage) = first_tag_value(event, TAG_PREIMAGE) {
        let preimage = parse_preimage(preimage)?;
        if PaymentHash::from_preimage(&preimage) != commitments.payment_hash {
            return Err(Error::PreimageMismatch);
        }
    }

    if let Some(description_hash) = commitments.description_hash {
        if sha256(description.as_bytes()) != description_hash {
            return Err(Error::DescriptionHashMismatch);
        }
    }

    Ok(())
}

fn tag<const N: usize>(parts: [&str; N]) -> Result<Tag> {
    Tag::parse(parts).map_err(|e| Error::ReceiptConstructionFailed(e.to_string()))
}
