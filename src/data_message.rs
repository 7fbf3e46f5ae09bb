use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use crate::packet_id::PacketId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataMessageError {
    #[error("data packet of {0} bytes is shorter than its {len} byte header", len = DataMessage::HEADER_LEN)]
    TooShort(usize),
    #[error("data packet has an empty payload")]
    EmptyPayload,
}

/// A chunk of the sender's audio stream before it is stamped with a session id.
///
/// The sender's cache stores these, and the session id is added only when the packet is put
///  on the wire, so a packet without a session can never be serialized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AudioPacket {
    pub packet_id: PacketId,
    pub payload: Bytes,
}

impl AudioPacket {
    pub fn new(packet_id: PacketId, payload: Bytes) -> AudioPacket {
        AudioPacket { packet_id, payload }
    }

    pub fn stamped(&self, session_id: u64) -> DataMessage {
        DataMessage {
            session_id,
            packet_id: self.packet_id,
            payload: self.payload.clone(),
        }
    }
}

/// Data packet as it goes over the wire - all numbers in network byte order (BE):
///
/// ```ascii
/// 0:  session id (u64)
/// 8:  packet id, i.e. the byte offset of the payload in the stream (u64)
/// 16: audio payload (rest of the datagram)
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataMessage {
    pub session_id: u64,
    pub packet_id: PacketId,
    pub payload: Bytes,
}

impl DataMessage {
    pub const HEADER_LEN: usize = 16;

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) -> Result<(), DataMessageError> {
        if self.payload.is_empty() {
            return Err(DataMessageError::EmptyPayload);
        }

        buf.reserve(self.serialized_len());
        buf.put_u64(self.session_id);
        buf.put_u64(self.packet_id.to_raw());
        buf.put_slice(&self.payload);
        Ok(())
    }

    pub fn deser(mut buf: Bytes) -> Result<DataMessage, DataMessageError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(DataMessageError::TooShort(buf.len()));
        }

        let session_id = buf.get_u64();
        let packet_id = PacketId::from_raw(buf.get_u64());
        if buf.is_empty() {
            return Err(DataMessageError::EmptyPayload);
        }

        Ok(DataMessage {
            session_id,
            packet_id,
            payload: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_ser() {
        let msg = DataMessage {
            session_id: 0x0102030405060708,
            packet_id: PacketId::from_raw(512),
            payload: Bytes::from_static(&[9, 8, 7]),
        };

        let mut buf = BytesMut::new();
        msg.ser(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[1,2,3,4,5,6,7,8, 0,0,0,0,0,0,2,0, 9,8,7]);
        assert_eq!(buf.len(), msg.serialized_len());

        assert_eq!(DataMessage::deser(buf.freeze()).unwrap(), msg);
    }

    #[test]
    fn test_ser_empty_payload() {
        let msg = AudioPacket::new(PacketId::ZERO, Bytes::new()).stamped(3);
        let mut buf = BytesMut::new();
        assert_eq!(msg.ser(&mut buf), Err(DataMessageError::EmptyPayload));
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case::empty(vec![], Err(DataMessageError::TooShort(0)))]
    #[case::header_truncated(vec![0,0,0,0,0,0,0,1, 0,0,0,0,0,0,0], Err(DataMessageError::TooShort(15)))]
    #[case::header_only(vec![0,0,0,0,0,0,0,1, 0,0,0,0,0,0,0,4], Err(DataMessageError::EmptyPayload))]
    #[case::single_byte(vec![0,0,0,0,0,0,0,1, 0,0,0,0,0,0,0,4, 99], Ok((1, 4, vec![99])))]
    #[case::max_values(vec![255,255,255,255,255,255,255,255, 255,255,255,255,255,255,255,255, 1,2], Ok((u64::MAX, u64::MAX, vec![1,2])))]
    fn test_deser(#[case] raw: Vec<u8>, #[case] expected: Result<(u64, u64, Vec<u8>), DataMessageError>) {
        let actual = DataMessage::deser(Bytes::from(raw))
            .map(|msg| (msg.session_id, msg.packet_id.to_raw(), msg.payload.to_vec()));
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_stamped() {
        let packet = AudioPacket::new(PacketId::from_raw(6), Bytes::from_static(b"abc"));
        let msg = packet.stamped(17);
        assert_eq!(msg.session_id, 17);
        assert_eq!(msg.packet_id, PacketId::from_raw(6));
        assert_eq!(msg.payload, packet.payload);
    }
}
