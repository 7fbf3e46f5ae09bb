use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, SocketAddr};
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tracing::debug;
use crate::packet_id::PacketId;

pub const LOOKUP_KEYWORD: &str = "ZERO_SEVEN_COME_IN";
pub const REPLY_KEYWORD: &str = "BOREWICZ_HERE";
pub const REXMIT_KEYWORD: &str = "LOUDER_PLEASE";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlMessageKind {
    Lookup,
    Reply,
    RexmitRequest,
}

impl Display for ControlMessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMessageKind::Lookup => write!(f, "lookup"),
            ControlMessageKind::Reply => write!(f, "reply"),
            ControlMessageKind::RexmitRequest => write!(f, "retransmission request"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlMessageError {
    #[error("control message is not valid text")]
    NotText,
    #[error("unknown control message {0:?}")]
    UnknownKind(String),
    #[error("malformed reply {0:?}")]
    MalformedReply(String),
    #[error("expected a {expected} message, got a {actual} message")]
    WrongKind {
        expected: ControlMessageKind,
        actual: ControlMessageKind,
    },
}

/// The payload of a sender's answer to a lookup: where its audio stream can be received, and the
///  station name that is shown to listeners
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyData {
    pub mcast_addr: Ipv4Addr,
    pub data_port: u16,
    pub name: String,
}

impl ReplyData {
    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::from((self.mcast_addr, self.data_port))
    }
}

/// Control messages are newline-terminated ASCII text, one message per datagram:
///
/// ```ascii
/// ZERO_SEVEN_COME_IN
/// BOREWICZ_HERE <multicast address> <data port> <station name, may contain spaces>
/// LOUDER_PLEASE <packet id>,<packet id>,...
/// ```
///
/// Parsing is lenient: the kind is determined by the leading keyword, line terminators are
///  ignored, and retransmission request entries that are not numbers are skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlMessage {
    Lookup,
    Reply(ReplyData),
    RexmitRequest(Vec<PacketId>),
}

impl Display for ControlMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMessage::Lookup => write!(f, "{}", LOOKUP_KEYWORD),
            ControlMessage::Reply(data) => write!(f, "{} {} {} {}", REPLY_KEYWORD, data.mcast_addr, data.data_port, data.name),
            ControlMessage::RexmitRequest(ids) => {
                write!(f, "{} ", REXMIT_KEYWORD)?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", id)?;
                }
                Ok(())
            }
        }
    }
}

impl ControlMessage {
    /// Splits a set of packet ids into retransmission requests that each fit into a single
    ///  datagram
    pub fn rexmit_requests(ids: impl IntoIterator<Item = PacketId>, max_ids_per_message: usize) -> Vec<ControlMessage> {
        let ids = ids.into_iter().collect::<Vec<_>>();
        ids.chunks(max_ids_per_message.max(1))
            .map(|chunk| ControlMessage::RexmitRequest(chunk.to_vec()))
            .collect()
    }

    pub fn kind(&self) -> ControlMessageKind {
        match self {
            ControlMessage::Lookup => ControlMessageKind::Lookup,
            ControlMessage::Reply(_) => ControlMessageKind::Reply,
            ControlMessage::RexmitRequest(_) => ControlMessageKind::RexmitRequest,
        }
    }

    pub fn is_lookup(&self) -> bool {
        self.kind() == ControlMessageKind::Lookup
    }

    pub fn is_reply(&self) -> bool {
        self.kind() == ControlMessageKind::Reply
    }

    pub fn is_rexmit(&self) -> bool {
        self.kind() == ControlMessageKind::RexmitRequest
    }

    pub fn rexmit_ids(&self) -> Result<&[PacketId], ControlMessageError> {
        match self {
            ControlMessage::RexmitRequest(ids) => Ok(ids),
            other => Err(ControlMessageError::WrongKind {
                expected: ControlMessageKind::RexmitRequest,
                actual: other.kind(),
            }),
        }
    }

    pub fn reply_data(&self) -> Result<&ReplyData, ControlMessageError> {
        match self {
            ControlMessage::Reply(data) => Ok(data),
            other => Err(ControlMessageError::WrongKind {
                expected: ControlMessageKind::Reply,
                actual: other.kind(),
            }),
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(format!("{}\n", self).as_bytes());
    }

    pub fn deser(buf: &[u8]) -> Result<ControlMessage, ControlMessageError> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| ControlMessageError::NotText)?
            .trim_end_matches(|c: char| c == '\r' || c == '\n');

        if strip_keyword(text, LOOKUP_KEYWORD).is_some() {
            return Ok(ControlMessage::Lookup);
        }
        if let Some(rest) = strip_keyword(text, REPLY_KEYWORD) {
            return Self::deser_reply(rest).map(ControlMessage::Reply);
        }
        if let Some(rest) = strip_keyword(text, REXMIT_KEYWORD) {
            return Ok(ControlMessage::RexmitRequest(Self::deser_rexmit_ids(rest)));
        }

        Err(ControlMessageError::UnknownKind(text.to_string()))
    }

    fn deser_reply(rest: &str) -> Result<ReplyData, ControlMessageError> {
        let malformed = || ControlMessageError::MalformedReply(rest.to_string());

        let mut tokens = rest.split_whitespace();
        let mcast_addr = tokens.next()
            .and_then(|s| s.parse::<Ipv4Addr>().ok())
            .ok_or_else(malformed)?;
        let data_port = tokens.next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(malformed)?;
        let name = tokens.collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            return Err(malformed());
        }

        Ok(ReplyData { mcast_addr, data_port, name })
    }

    fn deser_rexmit_ids(rest: &str) -> Vec<PacketId> {
        rest.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter_map(|token| match token.parse::<u64>() {
                Ok(raw) => Some(PacketId::from_raw(raw)),
                Err(_) => {
                    debug!("skipping unparseable packet id {:?} in retransmission request", token);
                    None
                }
            })
            .collect()
    }
}

/// returns the text after the keyword if the text starts with the keyword as a separate word
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.is_empty() || rest.starts_with(' ') {
        Some(rest.trim_start())
    }
    else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ids(raw: &[u64]) -> Vec<PacketId> {
        raw.iter().map(|&r| PacketId::from_raw(r)).collect()
    }

    fn reply(addr: [u8; 4], port: u16, name: &str) -> ControlMessage {
        ControlMessage::Reply(ReplyData {
            mcast_addr: Ipv4Addr::from(addr),
            data_port: port,
            name: name.to_string(),
        })
    }

    #[rstest]
    #[case::lookup(ControlMessage::Lookup, "ZERO_SEVEN_COME_IN\n")]
    #[case::reply(reply([239,10,11,12], 25830, "Radio Joe"), "BOREWICZ_HERE 239.10.11.12 25830 Radio Joe\n")]
    #[case::rexmit(ControlMessage::RexmitRequest(ids(&[512, 1024, 4096])), "LOUDER_PLEASE 512,1024,4096\n")]
    #[case::rexmit_single(ControlMessage::RexmitRequest(ids(&[0])), "LOUDER_PLEASE 0\n")]
    #[case::rexmit_empty(ControlMessage::RexmitRequest(vec![]), "LOUDER_PLEASE \n")]
    fn test_ser(#[case] msg: ControlMessage, #[case] expected: &str) {
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_bytes());

        assert_eq!(ControlMessage::deser(&buf).unwrap(), msg);
    }

    #[rstest]
    #[case::lookup_without_newline("ZERO_SEVEN_COME_IN", Ok(ControlMessage::Lookup))]
    #[case::lookup_crlf("ZERO_SEVEN_COME_IN\r\n", Ok(ControlMessage::Lookup))]
    #[case::lookup_trailing_garbage("ZERO_SEVEN_COME_IN please", Ok(ControlMessage::Lookup))]
    #[case::lookup_glued("ZERO_SEVEN_COME_INX", Err(ControlMessageError::UnknownKind("ZERO_SEVEN_COME_INX".to_string())))]
    #[case::reply_name_with_spaces("BOREWICZ_HERE 239.0.0.1 2000 a  b c\n", Ok(reply([239,0,0,1], 2000, "a b c")))]
    #[case::reply_missing_name("BOREWICZ_HERE 239.0.0.1 2000\n", Err(ControlMessageError::MalformedReply("239.0.0.1 2000".to_string())))]
    #[case::reply_bad_addr("BOREWICZ_HERE 239.0.0 2000 x", Err(ControlMessageError::MalformedReply("239.0.0 2000 x".to_string())))]
    #[case::reply_bad_port("BOREWICZ_HERE 239.0.0.1 70000 x", Err(ControlMessageError::MalformedReply("239.0.0.1 70000 x".to_string())))]
    #[case::rexmit_bare("LOUDER_PLEASE", Ok(ControlMessage::RexmitRequest(vec![])))]
    #[case::rexmit_skips_garbage("LOUDER_PLEASE 1,x,,3, 5 ,-2", Ok(ControlMessage::RexmitRequest(ids(&[1, 3, 5]))))]
    #[case::unknown("HELLO", Err(ControlMessageError::UnknownKind("HELLO".to_string())))]
    #[case::empty("", Err(ControlMessageError::UnknownKind("".to_string())))]
    fn test_deser(#[case] raw: &str, #[case] expected: Result<ControlMessage, ControlMessageError>) {
        assert_eq!(ControlMessage::deser(raw.as_bytes()), expected);
    }

    #[test]
    fn test_deser_not_text() {
        assert_eq!(ControlMessage::deser(&[0xff, 0xfe, 0x00]), Err(ControlMessageError::NotText));
    }

    #[test]
    fn test_accessors() {
        let lookup = ControlMessage::Lookup;
        assert!(lookup.is_lookup());
        assert!(!lookup.is_reply());
        assert!(!lookup.is_rexmit());
        assert_eq!(lookup.rexmit_ids(), Err(ControlMessageError::WrongKind {
            expected: ControlMessageKind::RexmitRequest,
            actual: ControlMessageKind::Lookup,
        }));

        let rexmit = ControlMessage::RexmitRequest(ids(&[4, 8]));
        assert!(rexmit.is_rexmit());
        assert_eq!(rexmit.rexmit_ids().unwrap(), ids(&[4, 8]).as_slice());
        assert_eq!(rexmit.reply_data(), Err(ControlMessageError::WrongKind {
            expected: ControlMessageKind::Reply,
            actual: ControlMessageKind::RexmitRequest,
        }));

        let reply = reply([239,1,2,3], 99, "x");
        assert!(reply.is_reply());
        assert_eq!(reply.reply_data().unwrap().data_addr(), SocketAddr::from(([239,1,2,3], 99)));
    }

    #[rstest]
    #[case::empty(vec![], 3, vec![])]
    #[case::single_chunk(vec![1,2,3], 3, vec![vec![1,2,3]])]
    #[case::split(vec![1,2,3,4,5,6,7], 3, vec![vec![1,2,3], vec![4,5,6], vec![7]])]
    #[case::zero_limit(vec![1,2], 0, vec![vec![1], vec![2]])]
    fn test_rexmit_requests(#[case] raw_ids: Vec<u64>, #[case] max_ids: usize, #[case] expected: Vec<Vec<u64>>) {
        let expected = expected.iter()
            .map(|chunk| ControlMessage::RexmitRequest(ids(chunk)))
            .collect::<Vec<_>>();
        assert_eq!(ControlMessage::rexmit_requests(ids(&raw_ids), max_ids), expected);
    }
}
