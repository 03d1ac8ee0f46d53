//! Bounded notification channel carrying `(symbol, kind)` dirty marks
//! from ingestion to the Feature Engine's reactive loop.
//!
//! Grounded on `original_source/app/core/event_queue.py`: a single
//! shared bounded queue, `put_nowait` semantics that drop on overflow
//! rather than block the producer, translated here to a bounded
//! `tokio::sync::mpsc` channel.

use tokio::sync::mpsc;

use crate::models::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Kline(Timeframe),
    Depth,
    MarkPrice,
    Liquidation,
    OpenInterest,
    Funding,
}

#[derive(Debug, Clone)]
pub struct DirtyUpdate {
    pub symbol: String,
    pub kind: DataKind,
}

pub struct UpdateBus {
    sender: mpsc::Sender<DirtyUpdate>,
}

pub struct UpdateBusReceiver {
    receiver: mpsc::Receiver<DirtyUpdate>,
}

pub fn update_bus(capacity: usize) -> (UpdateBus, UpdateBusReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (UpdateBus { sender: tx }, UpdateBusReceiver { receiver: rx })
}

impl UpdateBus {
    /// Publish a dirty mark. Drops and counts the drop if the bus is full.
    pub fn publish(&self, symbol: &str, kind: DataKind) {
        let update = DirtyUpdate {
            symbol: symbol.to_string(),
            kind,
        };
        if self.sender.try_send(update).is_err() {
            metrics::counter!("update_bus_dropped_total").increment(1);
            tracing::warn!(symbol, ?kind, "update bus full, dropping dirty mark");
        }
    }

    pub fn clone_sender(&self) -> UpdateBus {
        UpdateBus {
            sender: self.sender.clone(),
        }
    }
}

impl UpdateBusReceiver {
    /// Blocks for at least one update, then drains everything currently
    /// queued without blocking, returning the set of distinct symbols
    /// touched. Mirrors batching symbol IDs across one blocking read.
    pub async fn recv_batch(&mut self) -> Option<Vec<DirtyUpdate>> {
        let first = self.receiver.recv().await?;
        let mut batch = vec![first];
        while let Ok(update) = self.receiver.try_recv() {
            batch.push(update);
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batches_available_updates() {
        let (bus, mut rx) = update_bus(16);
        bus.publish("BTCUSDT", DataKind::Depth);
        bus.publish("ETHUSDT", DataKind::MarkPrice);
        let batch = rx.recv_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn drops_when_full_without_blocking() {
        let (bus, _rx) = update_bus(1);
        bus.publish("BTCUSDT", DataKind::Depth);
        bus.publish("BTCUSDT", DataKind::Depth);
    }
}
