use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;
use crate::packet_id::PacketId;

/// Keeps track of missing packets and when to (re-)request each of them next.
///
/// A missing packet is requested for the first time `rexmit_interval` after its absence was
///  noticed, giving packets that are merely reordered on the wire a chance to arrive. After that,
///  it is requested again every `rexmit_interval` until it is explicitly forgotten.
pub struct RexmitScheduler {
    rexmit_interval: Duration,
    next_retry: RwLock<BTreeMap<PacketId, Instant>>,
}

impl RexmitScheduler {
    pub fn new(rexmit_interval: Duration) -> RexmitScheduler {
        RexmitScheduler {
            rexmit_interval,
            next_retry: Default::default(),
        }
    }

    pub async fn append_ids(&self, ids: impl IntoIterator<Item = PacketId>) {
        let next = Instant::now() + self.rexmit_interval;

        let mut next_retry = self.next_retry.write().await;
        for packet_id in ids {
            next_retry.entry(packet_id)
                .or_insert(next);
        }
    }

    /// Drops all entries for `forget`, and returns all ids that are due for a retransmission
    ///  request, scheduling the next one
    pub async fn filter_get_ids(&self, forget: &BTreeSet<PacketId>) -> BTreeSet<PacketId> {
        let now = Instant::now();

        let mut next_retry = self.next_retry.write().await;
        for packet_id in forget {
            next_retry.remove(packet_id);
        }

        let due = next_retry.iter()
            .filter(|(_, &t)| t <= now)
            .map(|(&packet_id, _)| packet_id)
            .collect::<BTreeSet<_>>();

        for packet_id in &due {
            next_retry.insert(*packet_id, now + self.rexmit_interval);
        }

        if !due.is_empty() {
            trace!("{} packets due for retransmission request, {} scheduled in total", due.len(), next_retry.len());
        }
        due
    }

    pub async fn reset(&self) {
        self.next_retry.write().await
            .clear();
    }

    pub async fn len(&self) -> usize {
        self.next_retry.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.next_retry.read().await.is_empty()
    }
}
