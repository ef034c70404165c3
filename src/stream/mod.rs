//! Price Stream - Single-Writer Broadcast of Normalized Ticks
//!
//! The failover controller is the only producer; every consumer holds
//! an independent [`StreamSubscription`] with its own cursor, so a
//! slow consumer can never block the producer or its peers. Overflow
//! drops the oldest buffered ticks for that subscriber only and is
//! counted; a newer tick always supersedes a dropped one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::tick::{Instrument, Tick};

/// Shared handle to the tick broadcast. Cheap to clone; the producer
/// and all subscription factories hold the same underlying channel.
#[derive(Clone)]
pub struct PriceStream {
    tx: broadcast::Sender<Tick>,
    published: Arc<AtomicU64>,
    dropped_total: Arc<AtomicU64>,
}

impl PriceStream {
    /// `capacity` bounds each subscriber's buffer; beyond it the
    /// oldest unread tick is discarded for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            published: Arc::new(AtomicU64::new(0)),
            dropped_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish one tick to every subscriber. Returns the number of
    /// subscribers that will observe it. Never blocks.
    pub fn publish(&self, tick: Tick) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        // A send error only means there are currently no subscribers.
        self.tx.send(tick).unwrap_or(0)
    }

    /// Subscribe to every instrument on the stream.
    pub fn subscribe(&self) -> StreamSubscription {
        self.subscription(None)
    }

    /// Subscribe to a single instrument; other ticks are filtered out
    /// on the subscriber side.
    pub fn subscribe_instrument(&self, instrument: impl Into<Instrument>) -> StreamSubscription {
        self.subscription(Some(instrument.into()))
    }

    fn subscription(&self, filter: Option<Instrument>) -> StreamSubscription {
        StreamSubscription {
            rx: self.tx.subscribe(),
            filter,
            dropped: 0,
            dropped_total: Arc::clone(&self.dropped_total),
        }
    }

    /// Ticks published since creation.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Ticks dropped across all subscribers due to overflow.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Current number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One reader's cursor into the price stream.
///
/// Owns its buffer position; dropping it releases the buffer. Never
/// mutates shared state beyond the aggregate drop counter.
pub struct StreamSubscription {
    rx: broadcast::Receiver<Tick>,
    filter: Option<Instrument>,
    dropped: u64,
    dropped_total: Arc<AtomicU64>,
}

impl StreamSubscription {
    /// Next tick in publish order, or `None` once the producer is gone
    /// and the buffer is drained. Buffer overflow is absorbed here:
    /// the drop counter advances and the read continues with the
    /// oldest tick still buffered.
    pub async fn recv(&mut self) -> Option<Tick> {
        loop {
            match self.rx.recv().await {
                Ok(tick) => {
                    if let Some(wanted) = &self.filter {
                        if &tick.instrument != wanted {
                            continue;
                        }
                    }
                    return Some(tick);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    self.dropped_total.fetch_add(n, Ordering::Relaxed);
                    warn!(dropped = n, "slow subscriber lagged, oldest ticks dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Ticks this subscriber lost to buffer overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tick::SourceId;
    use chrono::{Duration, TimeZone, Utc};

    fn tick(instrument: &str, seq: u64) -> Tick {
        Tick {
            instrument: instrument.to_string(),
            bid: 1.0950,
            ask: 1.0952,
            ts: Utc.timestamp_opt(0, 0).single().expect("epoch") + Duration::seconds(seq as i64),
            seq,
            source: SourceId::Simulated,
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let stream = PriceStream::new(16);
        let mut sub = stream.subscribe();

        for i in 0..5 {
            stream.publish(tick("EURUSD", i));
        }
        for i in 0..5 {
            let t = sub.recv().await.expect("open");
            assert_eq!(t.seq, i);
        }
        assert_eq!(sub.dropped(), 0);
        assert_eq!(stream.published(), 5);
    }

    #[tokio::test]
    async fn instrument_filter_skips_other_pairs() {
        let stream = PriceStream::new(16);
        let mut sub = stream.subscribe_instrument("EURUSD");

        stream.publish(tick("USDJPY", 1));
        stream.publish(tick("EURUSD", 2));
        stream.publish(tick("GBPUSD", 3));
        stream.publish(tick("EURUSD", 4));

        assert_eq!(sub.recv().await.expect("open").seq, 2);
        assert_eq!(sub.recv().await.expect("open").seq, 4);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let stream = PriceStream::new(4);
        let mut sub = stream.subscribe();

        for i in 0..12 {
            stream.publish(tick("EURUSD", i));
        }

        // The oldest eight were discarded; reading resumes at seq 8.
        let first = sub.recv().await.expect("open");
        assert_eq!(first.seq, 8);
        assert_eq!(sub.dropped(), 8);
        assert_eq!(stream.dropped_total(), 8);
    }

    #[tokio::test]
    async fn closed_stream_ends_subscription() {
        let stream = PriceStream::new(4);
        let mut sub = stream.subscribe();
        stream.publish(tick("EURUSD", 1));
        drop(stream);

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
