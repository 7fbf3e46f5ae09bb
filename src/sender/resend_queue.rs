use std::collections::BTreeMap;
use tokio::sync::Mutex;
use crate::data_message::AudioPacket;
use crate::packet_id::PacketId;

/// Packets waiting to be retransmitted. Requests for a packet that is already queued are merged,
///  so every packet goes out at most once per retransmission round no matter how many receivers
///  asked for it.
#[derive(Default)]
pub struct ResendQueue {
    packets: Mutex<BTreeMap<PacketId, AudioPacket>>,
}

impl ResendQueue {
    pub fn new() -> ResendQueue {
        Default::default()
    }

    pub async fn push(&self, packet: AudioPacket) {
        self.packets.lock().await
            .insert(packet.packet_id, packet);
    }

    /// Takes all queued packets in id order, leaving the queue empty
    pub async fn drain(&self) -> Vec<AudioPacket> {
        let mut packets = self.packets.lock().await;
        std::mem::take(&mut *packets)
            .into_values()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.packets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.packets.lock().await.is_empty()
    }
}
