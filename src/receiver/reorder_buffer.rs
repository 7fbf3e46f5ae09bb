use std::collections::{BTreeSet, VecDeque};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use crate::packet_id::PacketId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Playback reached a slot whose packet never arrived: the stream can not continue gap-free
    #[error("packet #{front} at the front of the playback window was never received")]
    Access { front: PacketId },
    #[error("packet id {packet_id} is not a multiple of the payload length {payload_len}")]
    Misaligned { packet_id: PacketId, payload_len: usize },
    #[error("payload length {actual} differs from the session's payload length {expected}")]
    PayloadLength { expected: usize, actual: usize },
    #[error("packet has an empty payload")]
    EmptyPayload,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferState {
    /// no packet was received since the last reset
    NoSession,
    /// packets are being buffered, but playback has not started yet
    Waiting,
    Readable,
}

struct ReorderBufferInner {
    window_bytes: usize,
    state: BufferState,

    /// fixed by the first packet of a session
    payload_len: usize,
    max_elements: usize,

    /// the id of the first packet of the session
    byte_zero: PacketId,
    /// playback starts once a packet with this id (or higher) was received
    readable_threshold: PacketId,

    /// The id of the first slot, i.e. of the next packet to be played. If there are no slots,
    ///  this is the id after `back_id`.
    front_id: PacketId,
    /// The highest packet id that was written in this session
    back_id: PacketId,

    /// Contiguous slots: the slot at index `i` holds packet `front_id + i * payload_len`, if it
    ///  was received
    slots: VecDeque<Option<Bytes>>,
}

impl ReorderBufferInner {
    fn new(window_bytes: usize) -> ReorderBufferInner {
        ReorderBufferInner {
            window_bytes,
            state: BufferState::NoSession,
            payload_len: 0,
            max_elements: 0,
            byte_zero: PacketId::ZERO,
            readable_threshold: PacketId::ZERO,
            front_id: PacketId::ZERO,
            back_id: PacketId::ZERO,
            slots: VecDeque::new(),
        }
    }

    fn reset(&mut self) {
        *self = ReorderBufferInner::new(self.window_bytes);
    }

    fn pl(&self) -> u64 {
        self.payload_len as u64
    }

    fn start_session(&mut self, packet_id: PacketId, payload: Bytes) -> Result<BTreeSet<PacketId>, BufferError> {
        if payload.is_empty() {
            return Err(BufferError::EmptyPayload);
        }
        if !packet_id.is_aligned_to(payload.len()) {
            return Err(BufferError::Misaligned { packet_id, payload_len: payload.len() });
        }

        self.payload_len = payload.len();
        self.max_elements = (self.window_bytes / self.payload_len).max(1);
        self.byte_zero = packet_id;
        let threshold_offset = (self.max_elements * 3 / 4) as u64 * self.pl();
        self.readable_threshold = PacketId::from_raw(packet_id.to_raw().saturating_add(threshold_offset));
        self.front_id = packet_id;
        self.back_id = packet_id;
        self.slots.push_back(Some(payload));
        self.state = BufferState::Waiting;

        debug!("starting buffer session at packet #{}: payload length {}, {} slots, playback starts at #{}", packet_id, self.payload_len, self.max_elements, self.readable_threshold);
        Ok(BTreeSet::new())
    }

    fn write_get_missed(&mut self, packet_id: PacketId, payload: Bytes) -> Result<BTreeSet<PacketId>, BufferError> {
        let missed = if self.state == BufferState::NoSession {
            self.start_session(packet_id, payload)?
        }
        else {
            if payload.len() != self.payload_len {
                return Err(BufferError::PayloadLength { expected: self.payload_len, actual: payload.len() });
            }
            if !packet_id.is_aligned_to(self.payload_len) {
                return Err(BufferError::Misaligned { packet_id, payload_len: self.payload_len });
            }

            if packet_id < self.front_id {
                debug!("packet #{} is below the window starting at #{} - ignoring", packet_id, self.front_id);
                BTreeSet::new()
            }
            else if packet_id <= self.back_id {
                let index = ((packet_id.to_raw() - self.front_id.to_raw()) / self.pl()) as usize;
                if let Some(slot) = self.slots.get_mut(index) {
                    if slot.is_some() {
                        trace!("packet #{} was received before - overwriting", packet_id);
                    }
                    *slot = Some(payload);
                }
                BTreeSet::new()
            }
            else {
                self.extend_to(packet_id, payload)
            }
        };

        if self.state == BufferState::Waiting && packet_id >= self.readable_threshold {
            debug!("packet #{} reached the playback threshold - buffer is readable", packet_id);
            self.state = BufferState::Readable;
        }
        Ok(missed)
    }

    /// Moves the back of the window to `packet_id`, evicting slots from the front as necessary
    ///  and adding empty slots for skipped packets. Returns the ids of those empty slots.
    fn extend_to(&mut self, packet_id: PacketId, payload: Bytes) -> BTreeSet<PacketId> {
        let pl = self.pl();

        // the window's front after this write, without stepping through evicted ids
        let new_front = packet_id.checked_minus((self.max_elements as u64 - 1) * pl)
            .map(|lower_bound| lower_bound.max(self.front_id))
            .unwrap_or(self.front_id);

        if new_front > self.front_id {
            let num_evicted = ((new_front.to_raw() - self.front_id.to_raw()) / pl) as usize;
            let num_evicted = num_evicted.min(self.slots.len());
            let num_unplayed_gaps = self.slots.iter().take(num_evicted).filter(|s| s.is_none()).count();
            self.slots.drain(..num_evicted);
            trace!("evicting {} slots ({} never received) to move the window front to #{}", num_evicted, num_unplayed_gaps, new_front);
            self.front_id = new_front;
        }

        let mut missed = BTreeSet::new();
        let mut next_id = self.back_id.to_raw().saturating_add(pl).max(new_front.to_raw());
        while next_id < packet_id.to_raw() {
            missed.insert(PacketId::from_raw(next_id));
            self.slots.push_back(None);
            next_id += pl;
        }
        self.slots.push_back(Some(payload));
        self.back_id = packet_id;

        if !missed.is_empty() {
            trace!("packet #{}: detected missing packets {:?}", packet_id, missed);
        }
        missed
    }

    fn try_read(&mut self) -> Result<Option<Bytes>, BufferError> {
        if self.state != BufferState::Readable {
            return Ok(None);
        }

        match self.slots.front() {
            None => Ok(None),
            Some(None) => Err(BufferError::Access { front: self.front_id }),
            Some(Some(_)) => {
                let payload = self.slots.pop_front().flatten();
                self.front_id = PacketId::from_raw(self.front_id.to_raw() + self.pl());
                Ok(payload)
            }
        }
    }

    fn has_space_for(&self, packet_id: PacketId) -> bool {
        self.state != BufferState::NoSession
            && !self.slots.is_empty()
            && self.front_id <= packet_id
            && packet_id <= self.back_id
    }

    fn is_missing(&self, packet_id: PacketId) -> bool {
        if !self.has_space_for(packet_id) || !packet_id.is_aligned_to(self.payload_len) {
            return false;
        }
        let index = ((packet_id.to_raw() - self.front_id.to_raw()) / self.pl()) as usize;
        matches!(self.slots.get(index), Some(None))
    }
}

/// The receiver's bounded reordering window over a single session's packets.
///
/// Packets are written in arrival order and read in id order. The window holds at most
///  `window_bytes / payload_len` slots and slides forward as packets with higher ids arrive,
///  dropping whatever is at its front - played or not. Playback starts once the window is
///  three quarters full, and it stops with [BufferError::Access] at the first packet that did
///  not arrive in time: the audio stream has a hole then, and it is up to the caller to start
///  over.
pub struct ReorderBuffer {
    inner: RwLock<ReorderBufferInner>,
}

impl ReorderBuffer {
    pub fn new(window_bytes: usize) -> ReorderBuffer {
        ReorderBuffer {
            inner: RwLock::new(ReorderBufferInner::new(window_bytes)),
        }
    }

    /// Stores a packet, returning the ids of packets that this packet revealed as missing and
    ///  that are still inside the window
    pub async fn write_get_missed(&self, packet_id: PacketId, payload: Bytes) -> Result<BTreeSet<PacketId>, BufferError> {
        self.inner.write().await
            .write_get_missed(packet_id, payload)
    }

    /// Returns the next packet's payload in playback order, or `None` if playback has not
    ///  started yet or has caught up with the newest packet
    pub async fn try_read(&self) -> Result<Option<Bytes>, BufferError> {
        self.inner.write().await
            .try_read()
    }

    pub async fn has_space_for(&self, packet_id: PacketId) -> bool {
        self.inner.read().await
            .has_space_for(packet_id)
    }

    /// `true` if the packet is inside the window but was not received yet
    pub async fn is_missing(&self, packet_id: PacketId) -> bool {
        self.inner.read().await
            .is_missing(packet_id)
    }

    pub async fn reset(&self) {
        self.inner.write().await
            .reset();
    }

    pub async fn state(&self) -> BufferState {
        self.inner.read().await.state
    }
}
