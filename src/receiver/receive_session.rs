use std::collections::BTreeSet;
use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use crate::config::ReceiverConfig;
use crate::data_message::DataMessage;
use crate::packet_id::PacketId;
use crate::receiver::reorder_buffer::ReorderBuffer;
use crate::receiver::rexmit_scheduler::RexmitScheduler;
use crate::receiver::state_manager::StateManager;

/// The receiver's protocol logic for the audio stream of the active station, independent of
///  sockets: it gates packets on their session, feeds buffer and retransmission scheduler, and
///  serves playback.
pub struct ReceiveSession {
    buffer: ReorderBuffer,
    rexmit_scheduler: RexmitScheduler,
    state_manager: Arc<StateManager>,
}

impl ReceiveSession {
    pub fn new(config: &ReceiverConfig, state_manager: Arc<StateManager>) -> ReceiveSession {
        ReceiveSession {
            buffer: ReorderBuffer::new(config.buffer_size),
            rexmit_scheduler: RexmitScheduler::new(config.rexmit_interval),
            state_manager,
        }
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Processes a data packet, returning the ids of packets it revealed as missing. These are
    ///  scheduled for retransmission requests.
    pub async fn on_data_message(&self, message: DataMessage) -> BTreeSet<PacketId> {
        trace!("received packet #{} of session {} with {} bytes", message.packet_id, message.session_id, message.payload.len());

        if self.state_manager.register_session_check_ignore(message.session_id).await {
            return BTreeSet::new();
        }

        match self.buffer.write_get_missed(message.packet_id, message.payload).await {
            Ok(missed) => {
                if !missed.is_empty() {
                    self.rexmit_scheduler.append_ids(missed.iter().copied()).await;
                }
                missed
            }
            Err(e) => {
                warn!("dropping packet #{} of session {}: {}", message.packet_id, message.session_id, e);
                BTreeSet::new()
            }
        }
    }

    /// Determines which missing packets to request now. Ids that are due but are not missing any
    ///  more - because they arrived or dropped out of the window - are returned separately, and
    ///  the caller passes them in on the next round so they are never requested again.
    pub async fn rexmit_round(&self, forget: &BTreeSet<PacketId>) -> (BTreeSet<PacketId>, BTreeSet<PacketId>) {
        let due = self.rexmit_scheduler.filter_get_ids(forget).await;

        let mut to_request = BTreeSet::new();
        let mut to_forget = BTreeSet::new();
        for packet_id in due {
            if self.buffer.is_missing(packet_id).await {
                to_request.insert(packet_id);
            }
            else {
                to_forget.insert(packet_id);
            }
        }

        if !to_forget.is_empty() {
            debug!("no longer requesting packets {:?}", to_forget);
        }
        (to_request, to_forget)
    }

    /// Returns the next chunk of audio in playback order, if any. A hole in the stream requests
    ///  a reset so that playback starts over with fresh data.
    pub async fn read_playback(&self) -> Option<Bytes> {
        match self.buffer.try_read().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{} - restarting playback", e);
                self.state_manager.mark_dirty().await;
                None
            }
        }
    }

    pub async fn reset(&self) {
        self.buffer.reset().await;
        self.rexmit_scheduler.reset().await;
    }

    pub fn buffer(&self) -> &ReorderBuffer {
        &self.buffer
    }
}
