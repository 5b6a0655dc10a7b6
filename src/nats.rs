use crate::errors::{CreditEngineError, Result};
use crate::models::LedgerEvent;
use async_nats::Client;
use tracing::info;

pub struct NatsProducer {
    client: Client,
    topic_prefix: String,
}

impl NatsProducer {
    pub async fn new(url: &str, topic_prefix: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| CreditEngineError::Nats(e.to_string()))?;

        info!("Connected to NATS at {}", url);

        Ok(NatsProducer {
            client,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    pub async fn publish_ledger_event(&self, event: &LedgerEvent) -> Result<()> {
        let subject = format!("{}.ledger.events", self.topic_prefix);
        let payload = serde_json::to_vec(event)
            .map_err(|e| CreditEngineError::Nats(format!("Serialization error: {}", e)))?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| CreditEngineError::Nats(format!("Failed to publish event: {}", e)))?;

        info!(
            "Published ledger event: {:?} for lot {} to subject {}",
            event.event_type, event.credit_id, subject
        );

        Ok(())
    }
}
