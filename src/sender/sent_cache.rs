use tokio::sync::RwLock;
use tracing::trace;
use crate::data_message::AudioPacket;
use crate::packet_id::PacketId;

/// The most recently sent packets, kept for answering retransmission requests. Packets are
///  stored unstamped, so a retransmission always carries the session id current at the time
///  it is sent.
///
/// Slots are indexed by packet number modulo capacity, so storing a packet overwrites the one
///  sent `capacity` packets earlier.
pub struct SentCache {
    payload_len: usize,
    slots: RwLock<Vec<Option<AudioPacket>>>,
}

impl SentCache {
    pub fn new(capacity: usize, payload_len: usize) -> SentCache {
        let capacity = capacity.max(1);
        SentCache {
            payload_len,
            slots: RwLock::new(vec![None; capacity]),
        }
    }

    fn slot_index(&self, packet_id: PacketId, capacity: usize) -> usize {
        (packet_id.packet_number(self.payload_len) % capacity as u64) as usize
    }

    pub async fn atomic_push(&self, packet: AudioPacket) {
        let mut slots = self.slots.write().await;
        let idx = self.slot_index(packet.packet_id, slots.len());
        trace!("caching packet #{} in slot {}", packet.packet_id, idx);
        slots[idx] = Some(packet);
    }

    /// Returns the packet with the given id if it is still cached
    pub async fn atomic_get(&self, packet_id: PacketId) -> Option<AudioPacket> {
        if !packet_id.is_aligned_to(self.payload_len) {
            return None;
        }

        let slots = self.slots.read().await;
        let idx = self.slot_index(packet_id, slots.len());
        slots[idx].as_ref()
            .filter(|p| p.packet_id == packet_id)
            .cloned()
    }
}
