//! Supervised broker consumer
//!
//! [`IngestionService::start`] spawns a supervisor task that owns the broker
//! connection. Each session connects, sets the prefetch credit, declares the
//! topology and consumes; every delivery runs on its own task and is acked or
//! nacked (without requeue) once handled. When a session fails the
//! supervisor waits the reconnect delay and starts over, declaring the
//! topology again. Deliveries that were in flight when a connection dropped
//! are redelivered by the broker.

use std::sync::Arc;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::handler::{Disposition, MessageHandler};
use super::topology::Topology;
use crate::config::BrokerSettings;
use crate::error::Result;

/// Requested state of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Drain,
    Stop,
}

/// Observed state of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    Connecting,
    Consuming,
    /// Consumer cancelled and no handler in flight
    Drained,
    Stopped,
}

/// How a broker session ended
enum SessionEnd {
    Shutdown,
    StreamClosed,
}

/// Entry point of the ingestion pipeline
pub struct IngestionService;

impl IngestionService {
    /// Spawn the supervisor and return its lifecycle handle
    pub fn start(settings: BrokerSettings, handler: MessageHandler) -> IngestionHandle {
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (status_tx, status_rx) = watch::channel(IngestionStatus::Connecting);

        let supervisor = Supervisor {
            topology: Topology::from(&settings),
            settings,
            handler: Arc::new(handler),
            control: control_rx,
            status: status_tx,
        };
        let task = tokio::spawn(supervisor.run());

        IngestionHandle {
            control: control_tx,
            status: status_rx,
            task,
        }
    }

    /// Connect once, declare the topology and disconnect
    pub async fn declare_topology(settings: &BrokerSettings) -> Result<()> {
        let connection = Connection::connect(&settings.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Topology::from(settings).declare(&channel).await?;
        channel.close(200, "topology declared").await?;
        connection.close(200, "topology declared").await?;
        Ok(())
    }
}

/// Lifecycle hooks for the host process
pub struct IngestionHandle {
    control: watch::Sender<Control>,
    status: watch::Receiver<IngestionStatus>,
    task: JoinHandle<()>,
}

impl IngestionHandle {
    pub fn status(&self) -> IngestionStatus {
        *self.status.borrow()
    }

    /// Connecting or consuming
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
            && matches!(
                self.status(),
                IngestionStatus::Connecting | IngestionStatus::Consuming
            )
    }

    /// Stop taking deliveries and wait for in-flight handlers to settle
    pub async fn drain(&mut self) {
        self.control.send_if_modified(|control| {
            if *control == Control::Run {
                *control = Control::Drain;
                true
            } else {
                false
            }
        });
        let _ = self
            .status
            .wait_for(|status| {
                matches!(status, IngestionStatus::Drained | IngestionStatus::Stopped)
            })
            .await;
    }

    /// Drain, close the channel and connection, and wait for the supervisor
    pub async fn stop(mut self) {
        self.drain().await;
        self.control.send_replace(Control::Stop);
        if let Err(e) = self.task.await {
            error!("Ingestion supervisor terminated abnormally: {}", e);
        }
        info!("Ingestion stopped");
    }
}

struct Supervisor {
    settings: BrokerSettings,
    topology: Topology,
    handler: Arc<MessageHandler>,
    control: watch::Receiver<Control>,
    status: watch::Sender<IngestionStatus>,
}

impl Supervisor {
    fn requested(&self) -> Control {
        *self.control.borrow()
    }

    async fn run(mut self) {
        while self.requested() == Control::Run {
            self.status.send_replace(IngestionStatus::Connecting);
            match self.session().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::StreamClosed) => warn!("Consumer stream closed by broker"),
                Err(e) => error!("Broker session failed: {}", e),
            }
            if self.requested() != Control::Run {
                break;
            }

            self.status.send_replace(IngestionStatus::Connecting);
            info!("Reconnecting in {:?}", self.settings.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                changed = self.control.changed() => {
                    // Handle dropped
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        // Nothing in flight outside a session
        self.status.send_replace(IngestionStatus::Drained);
        let _ = self.control.wait_for(|control| *control == Control::Stop).await;
        self.status.send_replace(IngestionStatus::Stopped);
    }

    async fn session(&mut self) -> Result<SessionEnd> {
        let connection =
            Connection::connect(&self.settings.url, ConnectionProperties::default()).await?;
        connection.on_error(|e| error!("Broker connection error: {}", e));
        let channel = connection.create_channel().await?;

        channel
            .basic_qos(self.settings.prefetch, BasicQosOptions::default())
            .await?;
        self.topology.declare(&channel).await?;

        let mut consumer = channel
            .basic_consume(
                &self.settings.queue,
                &self.settings.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        self.status.send_replace(IngestionStatus::Consuming);
        info!(
            "Consumer listening on '{}' (exchange '{}', prefetch {})",
            self.settings.queue, self.settings.exchange, self.settings.prefetch
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let outcome = loop {
            tokio::select! {
                changed = self.control.changed() => {
                    if changed.is_err() || self.requested() != Control::Run {
                        break Ok(SessionEnd::Shutdown);
                    }
                }
                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => {
                        in_flight.spawn(settle(Arc::clone(&self.handler), delivery));
                    }
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(SessionEnd::StreamClosed),
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Message handler task failed: {}", e);
                    }
                }
            }
        };

        if matches!(outcome, Ok(SessionEnd::Shutdown)) {
            self.shutdown(connection, channel, in_flight).await;
        } else {
            wait_in_flight(&mut in_flight).await;
        }
        outcome
    }

    /// Cancel the consumer, finish in-flight work, then close once stop is requested
    async fn shutdown(
        &mut self,
        connection: Connection,
        channel: Channel,
        mut in_flight: JoinSet<()>,
    ) {
        info!("Draining consumer '{}'", self.settings.consumer_tag);
        if let Err(e) = channel
            .basic_cancel(&self.settings.consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!("Failed to cancel consumer: {}", e);
        }
        wait_in_flight(&mut in_flight).await;
        self.status.send_replace(IngestionStatus::Drained);
        info!("Consumer drained");

        let _ = self.control.wait_for(|control| *control == Control::Stop).await;
        if let Err(e) = channel.close(200, "shutdown").await {
            debug!("Channel close: {}", e);
        }
        if let Err(e) = connection.close(200, "shutdown").await {
            debug!("Connection close: {}", e);
        }
    }
}

async fn wait_in_flight(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Message handler task failed: {}", e);
        }
    }
}

/// Handle one delivery and settle it with the broker
async fn settle(handler: Arc<MessageHandler>, delivery: Delivery) {
    if delivery.redelivered {
        debug!("Delivery {} is a redelivery", delivery.delivery_tag);
    }
    let disposition = handler
        .handle(delivery.routing_key.as_str(), &delivery.data)
        .await;

    let settled = match disposition {
        Disposition::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
        Disposition::DeadLetter => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                })
                .await
        }
    };
    if let Err(e) = settled {
        warn!(
            "Could not settle delivery {} ({:?}), broker will redeliver: {}",
            delivery.delivery_tag, disposition, e
        );
    }
}
