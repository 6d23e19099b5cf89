//! Broker topology shared with the catalog producer
//!
//! ```text
//! products.topic (topic) --product.created/updated--> ai.product.sync.queue
//!                                                          | nack, requeue=false
//!                                                          v
//! products.dlx (direct)  --------dead.letter-------->  ai.product.sync.dlq
//! ```
//!
//! Every declaration is durable and idempotent, so it is repeated on each
//! (re)connect.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::{debug, info};

use crate::config::BrokerSettings;
use crate::error::Result;

/// Queue argument naming the dead-letter exchange
pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
/// Queue argument naming the dead-letter routing key
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// Names of everything the consumer declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_keys: Vec<String>,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub dead_letter_routing_key: String,
}

impl From<&BrokerSettings> for Topology {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            exchange: settings.exchange.clone(),
            queue: settings.queue.clone(),
            routing_keys: settings.routing_keys.clone(),
            dead_letter_exchange: settings.dead_letter_exchange.clone(),
            dead_letter_queue: settings.dead_letter_queue.clone(),
            dead_letter_routing_key: settings.dead_letter_routing_key.clone(),
        }
    }
}

fn durable_exchange() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    }
}

impl Topology {
    /// Arguments that send rejected messages of the primary queue to the DLX
    pub fn queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert(
            DEAD_LETTER_EXCHANGE_ARG.into(),
            AMQPValue::LongString(self.dead_letter_exchange.as_str().into()),
        );
        arguments.insert(
            DEAD_LETTER_ROUTING_KEY_ARG.into(),
            AMQPValue::LongString(self.dead_letter_routing_key.as_str().into()),
        );
        arguments
    }

    /// Declare exchanges, queues and bindings on `channel`
    pub async fn declare(&self, channel: &Channel) -> Result<()> {
        // Dead-letter side first so the primary queue's arguments point at something
        channel
            .exchange_declare(
                &self.dead_letter_exchange,
                ExchangeKind::Direct,
                durable_exchange(),
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(&self.dead_letter_queue, durable_queue(), FieldTable::default())
            .await?;
        channel
            .queue_bind(
                &self.dead_letter_queue,
                &self.dead_letter_exchange,
                &self.dead_letter_routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(
            "Declared dead-letter queue '{}' on '{}'",
            self.dead_letter_queue, self.dead_letter_exchange
        );

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                durable_exchange(),
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(&self.queue, durable_queue(), self.queue_arguments())
            .await?;
        for routing_key in &self.routing_keys {
            channel
                .queue_bind(
                    &self.queue,
                    &self.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        info!(
            "Topology ready: '{}' bound to '{}' for {:?}, dead letters to '{}'",
            self.queue, self.exchange, self.routing_keys, self.dead_letter_queue
        );
        Ok(())
    }
}
