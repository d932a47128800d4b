use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use courier_types::api::StatsSnapshot;
use courier_types::models::Message;

use crate::registry::SessionRegistry;

/// Outcome of one publish, mostly useful for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Cumulative fan-out counters since startup. Relaxed atomics: readers get
/// a recent value, not a consistent cut across fields.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Messages handed to `publish`.
    pub published: AtomicU64,
    /// Frames queued for a subscriber.
    pub delivered: AtomicU64,
    /// Frames lost to a full or closed subscriber queue.
    pub dropped: AtomicU64,
}

impl DeliveryStats {
    fn record(&self, report: PublishReport) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
    }
}

/// Fans freshly appended messages out to every session subscribed to the
/// message's channel.
///
/// Delivery is best-effort: each session has a bounded queue, and a session
/// whose queue is full simply misses the message (it can catch up with a
/// resume or a history read). Publishing never waits on a subscriber.
#[derive(Clone)]
pub struct Broker {
    registry: SessionRegistry,
    stats: Arc<DeliveryStats>,
}

impl Broker {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    /// Current counters plus live session figures from the registry.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_active: self.registry.session_count() as u64,
            sessions_opened: self.registry.sessions_opened(),
            published: self.stats.published.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn publish(&self, message: Arc<Message>) -> PublishReport {
        let subscribers = self.registry.subscribers(message.channel_id);
        let mut report = PublishReport::default();

        if subscribers.is_empty() {
            trace!(channel_id = %message.channel_id, seq = message.seq, "no subscribers");
            self.stats.record(report);
            return report;
        }

        for sub in subscribers {
            match sub.tx.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session_id = %sub.session_id,
                        user_id = %sub.user_id,
                        channel_id = %message.channel_id,
                        seq = message.seq,
                        "Subscriber queue full, dropping message"
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session_id = %sub.session_id, "Subscriber gone, deregistering");
                    self.registry.deregister(sub.session_id);
                    report.dropped += 1;
                }
            }
        }

        self.stats.record(report);
        report
    }
}
