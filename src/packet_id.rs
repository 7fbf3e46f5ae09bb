use std::fmt::{Display, Formatter};

/// Identifies an audio packet by the byte offset of its first payload byte in the sender's
///  stream. Consecutive packets of a session differ by the (fixed) payload length.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PacketId(u64);

impl Display for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PacketId {
    pub const ZERO: PacketId = PacketId(0);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn checked_plus(&self, offset: u64) -> Option<PacketId> {
        self.0.checked_add(offset).map(PacketId)
    }

    pub fn checked_minus(&self, offset: u64) -> Option<PacketId> {
        self.0.checked_sub(offset).map(PacketId)
    }

    pub fn is_aligned_to(&self, payload_len: usize) -> bool {
        payload_len > 0 && self.0 % payload_len as u64 == 0
    }

    /// the ordinal number of the packet, i.e. how many packets precede it in the stream
    pub fn packet_number(&self, payload_len: usize) -> u64 {
        self.0 / payload_len.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 4, true)]
    #[case::multiple(12, 4, true)]
    #[case::misaligned(13, 4, false)]
    #[case::zero_payload(8, 0, false)]
    fn test_is_aligned_to(#[case] raw: u64, #[case] payload_len: usize, #[case] expected: bool) {
        assert_eq!(PacketId::from_raw(raw).is_aligned_to(payload_len), expected);
    }

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(PacketId::from_raw(5).checked_minus(6), None);
        assert_eq!(PacketId::from_raw(5).checked_minus(5), Some(PacketId::ZERO));
        assert_eq!(PacketId::from_raw(u64::MAX).checked_plus(1), None);
        assert_eq!(PacketId::from_raw(7).checked_plus(3), Some(PacketId::from_raw(10)));
    }
}
