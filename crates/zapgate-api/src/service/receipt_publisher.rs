use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use nostr::Event;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use zapgate_core::{ServiceTraitBounds, constants::RECEIPT_PUBLISH_TIMEOUT, zap::ZapReceipt};

#[cfg(test)]
use mockall::automock;

/// Why publishing to a single relay failed. All of these are treated the same way, the relay is
/// skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rejected by relay: {0}")]
    Rejected(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelayTransportApi: ServiceTraitBounds {
    /// Connects to the given relay, publishes the event and waits for the relay to acknowledge it
    async fn publish(&self, relay: &url::Url, event: &Event) -> Result<(), PublishError>;
}

#[cfg(test)]
impl ServiceTraitBounds for MockRelayTransportApi {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub relay: url::Url,
    pub result: Result<(), PublishError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub outcomes: Vec<RelayOutcome>,
}

impl PublishSummary {
    pub fn published(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.published()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReceiptPublisherApi: ServiceTraitBounds {
    /// Publishes the receipt to all given relays concurrently and waits for every attempt to
    /// finish. Never fails, the outcome of each relay is logged and returned.
    async fn publish_receipt(&self, receipt: ZapReceipt, relays: Vec<url::Url>) -> PublishSummary;
}

#[cfg(test)]
impl ServiceTraitBounds for MockReceiptPublisherApi {}

#[derive(Clone)]
pub struct ReceiptPublisher {
    transport: Arc<dyn RelayTransportApi>,
    timeout: Duration,
}

impl ServiceTraitBounds for ReceiptPublisher {}

impl ReceiptPublisher {
    pub fn new(transport: Arc<dyn RelayTransportApi>) -> Self {
        Self::with_timeout(transport, RECEIPT_PUBLISH_TIMEOUT)
    }

    pub fn with_timeout(transport: Arc<dyn RelayTransportApi>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn publish_to(&self, relay: url::Url, event: &Event) -> RelayOutcome {
        let result = match tokio::time::timeout(self.timeout, self.transport.publish(&relay, event))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::TimedOut(self.timeout)),
        };
        match &result {
            Ok(()) => info!("Published zap receipt {} to {relay}", event.id),
            Err(e) => warn!("Failed to publish zap receipt {} to {relay}: {e}", event.id),
        }
        RelayOutcome { relay, result }
    }
}

#[async_trait]
impl ReceiptPublisherApi for ReceiptPublisher {
    async fn publish_receipt(&self, receipt: ZapReceipt, relays: Vec<url::Url>) -> PublishSummary {
        let mut unique: Vec<url::Url> = Vec::with_capacity(relays.len());
        for relay in relays {
            if !unique.contains(&relay) {
                unique.push(relay);
            }
        }
        if unique.is_empty() {
            warn!("No relays to publish zap receipt {} to", receipt.id());
            return PublishSummary::default();
        }

        let event = receipt.event();
        let outcomes = join_all(
            unique
                .into_iter()
                .map(|relay| self.publish_to(relay, event)),
        )
        .await;

        let summary = PublishSummary { outcomes };
        info!(
            "Zap receipt {} published to {}/{} relays ({} failed)",
            receipt.id(),
            summary.published(),
            summary.outcomes.len(),
            summary.failed()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{EventBuilder, Keys, Kind, Tag};
    use std::collections::HashMap;
    use zapgate_core::{
        PaymentHash,
        test_utils::{create_test_invoice, create_zap_request},
        zap::{self, derive_description_hash},
    };

    #[derive(Clone, Copy)]
    enum Behavior {
        Accept,
        Reject,
        Refuse,
        Hang,
    }

    struct ScriptedTransport {
        behavior: HashMap<String, Behavior>,
    }

    impl ServiceTraitBounds for ScriptedTransport {}

    #[async_trait]
    impl RelayTransportApi for ScriptedTransport {
        async fn publish(&self, relay: &url::Url, _event: &Event) -> Result<(), PublishError> {
            match self.behavior.get(relay.as_str()).copied() {
                Some(Behavior::Accept) => Ok(()),
                Some(Behavior::Reject) => Err(PublishError::Rejected("blocked: no zaps".into())),
                Some(Behavior::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Some(Behavior::Refuse) | None => {
                    Err(PublishError::Connection("connection refused".into()))
                }
            }
        }
    }

    /// A receipt signed by hand, without going through the receipt builder
    fn signed_receipt_event(description: Option<&str>) -> Event {
        let recipient = Keys::generate();
        let (_, raw) = create_zap_request(&Keys::generate(), &recipient.public_key());
        let invoice = create_test_invoice(
            &PaymentHash::from_preimage(&[1u8; 32]),
            Some(derive_description_hash(raw.as_bytes())),
            1000,
        );
        let description = description.unwrap_or(raw.as_str());
        EventBuilder::new(Kind::ZapReceipt, "")
            .tags([
                Tag::parse(["p", &recipient.public_key().to_hex()]).unwrap(),
                Tag::parse(["bolt11", &invoice]).unwrap(),
                Tag::parse(["description", description]).unwrap(),
            ])
            .allow_self_tagging()
            .sign_with_keys(&recipient)
            .unwrap()
    }

    fn receipt() -> ZapReceipt {
        ZapReceipt::try_from(signed_receipt_event(None)).expect("hand signed receipt is valid")
    }

    fn relay(name: &str) -> url::Url {
        url::Url::parse(&format!("wss://{name}.example.com")).unwrap()
    }

    fn publisher(script: &[(&str, Behavior)]) -> ReceiptPublisher {
        ReceiptPublisher::new(Arc::new(ScriptedTransport {
            behavior: script
                .iter()
                .map(|(name, b)| (relay(name).to_string(), *b))
                .collect(),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_with_partial_failures() {
        let publisher = publisher(&[
            ("good", Behavior::Accept),
            ("slow", Behavior::Hang),
            ("strict", Behavior::Reject),
        ]);
        let start = tokio::time::Instant::now();

        let summary = publisher
            .publish_receipt(receipt(), vec![relay("good"), relay("slow"), relay("strict")])
            .await;

        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.published(), 1);
        assert_eq!(summary.failed(), 2);
        let by_relay: HashMap<_, _> = summary
            .outcomes
            .iter()
            .map(|o| (o.relay.clone(), o.result.clone()))
            .collect();
        assert_eq!(by_relay[&relay("good")], Ok(()));
        assert_eq!(
            by_relay[&relay("slow")],
            Err(PublishError::TimedOut(RECEIPT_PUBLISH_TIMEOUT))
        );
        assert!(matches!(
            by_relay[&relay("strict")],
            Err(PublishError::Rejected(_))
        ));
        assert_eq!(start.elapsed(), RECEIPT_PUBLISH_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_attempts_run_concurrently() {
        let publisher = publisher(&[("a", Behavior::Hang), ("b", Behavior::Hang)]);
        let start = tokio::time::Instant::now();

        let summary = publisher
            .publish_receipt(receipt(), vec![relay("a"), relay("b")])
            .await;

        assert_eq!(summary.failed(), 2);
        // both time out together instead of one after the other
        assert_eq!(start.elapsed(), RECEIPT_PUBLISH_TIMEOUT);
    }

    #[tokio::test]
    async fn test_publish_deduplicates_relays() {
        let mut transport = MockRelayTransportApi::new();
        transport.expect_publish().times(2).returning(|_, _| Ok(()));
        let publisher = ReceiptPublisher::new(Arc::new(transport));

        let summary = publisher
            .publish_receipt(receipt(), vec![relay("a"), relay("b"), relay("a")])
            .await;
        assert_eq!(summary.published(), 2);
    }

    #[tokio::test]
    async fn test_publish_without_relays() {
        let mut transport = MockRelayTransportApi::new();
        transport.expect_publish().never();
        let publisher = ReceiptPublisher::new(Arc::new(transport));

        let summary = publisher.publish_receipt(receipt(), vec![]).await;
        assert!(summary.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_a_publish_failure() {
        let publisher = publisher(&[("down", Behavior::Refuse)]);
        let summary = publisher.publish_receipt(receipt(), vec![relay("down")]).await;
        assert_eq!(summary.failed(), 1);
        assert!(matches!(
            summary.outcomes[0].result,
            Err(PublishError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_receipt_never_reaches_a_relay() {
        let valid = signed_receipt_event(None);
        // the description no longer matches the invoice's description hash
        let tampered = signed_receipt_event(Some("{\"kind\":9734}"));
        let valid_id = valid.id;

        let mut transport = MockRelayTransportApi::new();
        transport
            .expect_publish()
            .times(1)
            .withf(move |_, event| event.id == valid_id)
            .returning(|_, _| Ok(()));
        let publisher = ReceiptPublisher::new(Arc::new(transport));

        assert_eq!(
            ZapReceipt::try_from(tampered.clone()),
            Err(zap::Error::DescriptionHashMismatch)
        );
        for event in [tampered, valid] {
            if let Ok(receipt) = ZapReceipt::try_from(event) {
                let summary = publisher.publish_receipt(receipt, vec![relay("a")]).await;
                assert_eq!(summary.published(), 1);
            }
        }
    }
}
