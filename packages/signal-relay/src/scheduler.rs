// Fair scheduler - drains every bridge queue into one producer
//
// Each turn serves the next bridge in the registry's round-robin order and
// forwards at most one message from it. A forwarded sample is followed by the
// write interval, which caps the downstream rate independently of how bursty
// the sources are. Delivery downstream is at most once: failed forwards are
// logged and not retried.

use crate::bridge::BridgeMessage;
use crate::platform::StreamProducer;
use crate::registry::BridgeRegistry;
use crate::types::{Sample, VariableName};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pacing of the scheduler loop
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Sleep after each forwarded sample
    pub write_interval: Duration,
    /// Sleep after a turn that found nothing to forward
    pub empty_interval: Duration,
    /// Sleep while no bridge is registered
    pub idle_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            write_interval: Duration::from_millis(200),
            empty_interval: Duration::from_millis(10),
            idle_interval: Duration::from_millis(100),
        }
    }
}

/// Outcome of one scheduler turn
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    /// No bridge registered
    Idle,
    /// The served bridge had nothing queued
    Empty(VariableName),
    /// One sample forwarded
    Forwarded(VariableName),
    /// The producer rejected the sample; it is dropped
    Failed(VariableName),
    /// Binary payload that did not contain a sample; dropped
    Skipped(VariableName),
}

pub struct FairScheduler {
    registry: BridgeRegistry,
    producer: Arc<dyn StreamProducer>,
    settings: SchedulerSettings,
}

impl FairScheduler {
    pub fn new(
        registry: BridgeRegistry,
        producer: Arc<dyn StreamProducer>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            producer,
            settings,
        }
    }

    /// Serve the next bridge once, without pacing
    pub async fn turn(&self) -> Turn {
        // The registry lock is released before any I/O happens
        let Some((name, queue)) = self.registry.next_turn() else {
            return Turn::Idle;
        };

        let Some(message) = queue.try_pop() else {
            return Turn::Empty(name);
        };

        let sample = match message {
            BridgeMessage::Sample(sample) => sample,
            BridgeMessage::Binary(data) => match serde_json::from_slice::<Sample>(&data) {
                Ok(sample) => sample,
                Err(e) => {
                    warn!("Dropping binary payload from {}: {}", name, e);
                    return Turn::Skipped(name);
                }
            },
        };

        match self.producer.produce(&sample).await {
            Ok(()) => Turn::Forwarded(name),
            Err(e) => {
                error!("Error processing data from {}: {}", name, e);
                Turn::Failed(name)
            }
        }
    }

    /// Run turns until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!("Producer stream loop started (fair scheduling)");

        loop {
            let pause = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                turn = self.turn() => match turn {
                    Turn::Idle => self.settings.idle_interval,
                    Turn::Forwarded(_) => self.settings.write_interval,
                    Turn::Empty(_) | Turn::Failed(_) | Turn::Skipped(_) => self.settings.empty_interval,
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Producer stream loop stopped");
    }
}
