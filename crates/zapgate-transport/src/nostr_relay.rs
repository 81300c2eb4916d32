use async_trait::async_trait;
use log::{debug, error};
use nostr::Event;
use nostr_sdk::{Client, Options as ClientOptions};
use std::time::Duration;
use zapgate_api::service::receipt_publisher::{PublishError, RelayTransportApi};
use zapgate_core::ServiceTraitBounds;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes events with a short lived client per relay, so a slow or broken relay never holds
/// up another one.
#[derive(Debug, Clone)]
pub struct NostrRelayTransport {
    connect_timeout: Duration,
}

impl Default for NostrRelayTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NostrRelayTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl ServiceTraitBounds for NostrRelayTransport {}

#[async_trait]
impl RelayTransportApi for NostrRelayTransport {
    async fn publish(&self, relay: &url::Url, event: &Event) -> Result<(), PublishError> {
        let client = Client::builder().opts(ClientOptions::new()).build();
        client.add_relay(relay).await.map_err(|e| {
            error!("Failed to add relay {relay} to Nostr client: {e}");
            PublishError::Connection(e.to_string())
        })?;
        client.connect().await;
        client.wait_for_connection(self.connect_timeout).await;

        let result = match client.send_event_to(vec![relay.clone()], event).await {
            Ok(output) => match output.failed.into_values().next() {
                Some(reason) => Err(PublishError::Rejected(reason)),
                None if output.success.is_empty() => {
                    Err(PublishError::Rejected("no acknowledgement".to_owned()))
                }
                None => Ok(()),
            },
            Err(e) => Err(PublishError::Connection(e.to_string())),
        };
        debug!("Publishing event {} to {relay} finished", event.id);
        client.shutdown().await;
        result
    }
}
