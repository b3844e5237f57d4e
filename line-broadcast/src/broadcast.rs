use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use crate::{
    error::DeliveryError,
    message::Message,
    registry::{ClientId, ClientRegistry, Sink},
};

/// Outcome of one fan-out round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Sinks already closed, by their session or by an earlier failed write.
    pub skipped: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Broadcaster {
    write_timeout: Duration,
}

impl Broadcaster {
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }

    /// Delivers `message` to every sink registered when the call starts,
    /// sender included. Recipient writes run concurrently, each bounded by
    /// the write timeout; one failure never affects the others. A recipient
    /// whose write fails gets no further lines.
    pub async fn broadcast(&self, message: &Message, registry: &ClientRegistry) -> BroadcastReport {
        let recipients = registry.snapshot();
        let deliveries = recipients
            .iter()
            .map(|(id, sink)| self.deliver(*id, sink, message));

        let mut report = BroadcastReport::default();
        for outcome in join_all(deliveries).await {
            match outcome {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.skipped += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    async fn deliver(
        &self,
        id: ClientId,
        sink: &Sink,
        message: &Message,
    ) -> Result<bool, DeliveryError> {
        let result = sink.send_line(message, self.write_timeout).await;
        if let Err(err) = &result {
            warn!(
                client_id = id,
                peer = ?sink.peer(),
                error = %err,
                "failed to deliver message; recipient gets no further lines"
            );
        }
        result
    }
}
