use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use anyhow::bail;

pub const DEFAULT_DATA_PORT: u16 = 25830;
pub const DEFAULT_CTRL_PORT: u16 = 35830;
pub const DEFAULT_UI_PORT: u16 = 15830;

/// This is the largest payload that fits into a single UDP datagram over IPV4
pub const MAX_UDP_PAYLOAD: usize = 65507;

pub struct SenderConfig {
    /// The multicast group that audio packets are sent to
    pub mcast_addr: Ipv4Addr,
    pub data_port: u16,

    /// The port on which the sender listens for lookups and retransmission requests
    pub ctrl_port: u16,

    /// Number of audio bytes per packet. All packets of a session have exactly this size, and
    ///  packet ids advance by this amount.
    pub packet_size: usize,

    /// Number of bytes of most recently sent audio that are retained for retransmission. This
    ///  is rounded up to a whole number of packets.
    pub cache_size: usize,

    /// The interval at which requested retransmissions are collected and sent out. Requests
    ///  for the same packet within one interval are sent only once.
    pub rexmit_interval: Duration,

    pub name: String,

    /// Every socket read is bounded by this timeout, so loops notice shutdown in a timely fashion
    pub recv_timeout: Duration,
    pub multicast_ttl: u32,
    pub max_datagram_len: usize,
}

impl SenderConfig {
    pub fn new(mcast_addr: Ipv4Addr) -> SenderConfig {
        SenderConfig {
            mcast_addr,
            data_port: DEFAULT_DATA_PORT,
            ctrl_port: DEFAULT_CTRL_PORT,
            packet_size: 512,
            cache_size: 128 * 1024,
            rexmit_interval: Duration::from_millis(250),
            name: "Unnamed Station".to_string(),
            recv_timeout: Duration::from_millis(500),
            multicast_ttl: 4,
            max_datagram_len: MAX_UDP_PAYLOAD,
        }
    }

    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::from((self.mcast_addr, self.data_port))
    }

    /// number of packets that fit into the retransmission cache
    pub fn cache_capacity(&self) -> usize {
        1 + (self.cache_size.max(1) - 1) / self.packet_size.max(1)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.mcast_addr.is_multicast() {
            bail!("{} is not a multicast address", self.mcast_addr);
        }
        if self.packet_size == 0 {
            bail!("packet size must not be 0");
        }
        if self.packet_size + crate::data_message::DataMessage::HEADER_LEN > self.max_datagram_len {
            bail!("packet size {} does not fit into a single datagram", self.packet_size);
        }
        if self.cache_size < self.packet_size {
            bail!("cache size {} is smaller than a single packet", self.cache_size);
        }
        if self.rexmit_interval.is_zero() {
            bail!("retransmission interval must not be 0");
        }
        if self.name.trim().is_empty() {
            bail!("station name must not be empty");
        }
        if self.name.contains('\n') {
            bail!("station name must be a single line");
        }
        Ok(())
    }
}

pub struct ReceiverConfig {
    /// Lookups are sent to this address - typically the broadcast address
    pub discover_addr: Ipv4Addr,
    pub ctrl_port: u16,

    /// TCP port for the station selection menu
    pub ui_port: u16,

    /// Number of audio bytes buffered for reordering and retransmission. Playback starts when
    ///  the buffer is three quarters full.
    pub buffer_size: usize,

    /// Minimum time between two retransmission requests for the same packet
    pub rexmit_interval: Duration,

    /// If a station with this name shows up, it is selected - once, when it is first seen
    pub preferred_station: Option<String>,

    pub lookup_interval: Duration,

    /// The interval at which a changed station or session is picked up and the buffer reset
    pub reset_check_interval: Duration,

    /// The interval at which due retransmission requests are collected
    pub rexmit_check_interval: Duration,

    /// A station that did not answer lookups for this long is dropped
    pub station_timeout: Duration,

    pub recv_timeout: Duration,

    /// Playback checks for readable data at this interval when the buffer has nothing to offer
    pub playback_poll_interval: Duration,

    pub ui_refresh_interval: Duration,

    /// Retransmission requests with more ids than this are split into several datagrams. The
    ///  default keeps a request inside a full Ethernet frame.
    pub max_rexmit_ids_per_message: usize,

    pub max_datagram_len: usize,
}

impl ReceiverConfig {
    pub fn new() -> ReceiverConfig {
        ReceiverConfig {
            discover_addr: Ipv4Addr::BROADCAST,
            ctrl_port: DEFAULT_CTRL_PORT,
            ui_port: DEFAULT_UI_PORT,
            buffer_size: 64 * 1024,
            rexmit_interval: Duration::from_millis(250),
            preferred_station: None,
            lookup_interval: Duration::from_secs(5),
            reset_check_interval: Duration::from_millis(20),
            rexmit_check_interval: Duration::from_millis(10),
            station_timeout: Duration::from_secs(20),
            recv_timeout: Duration::from_millis(500),
            playback_poll_interval: Duration::from_millis(5),
            ui_refresh_interval: Duration::from_millis(250),
            max_rexmit_ids_per_message: 64,
            max_datagram_len: MAX_UDP_PAYLOAD,
        }
    }

    pub fn discover_target(&self) -> SocketAddr {
        SocketAddr::from((self.discover_addr, self.ctrl_port))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.buffer_size == 0 {
            bail!("buffer size must not be 0");
        }
        if self.max_rexmit_ids_per_message == 0 {
            bail!("retransmission requests must be allowed to contain at least one id");
        }

        for (name, interval) in [
            ("retransmission", self.rexmit_interval),
            ("lookup", self.lookup_interval),
            ("reset check", self.reset_check_interval),
            ("retransmission check", self.rexmit_check_interval),
            ("station timeout", self.station_timeout),
            ("receive timeout", self.recv_timeout),
            ("playback poll", self.playback_poll_interval),
            ("UI refresh", self.ui_refresh_interval),
        ] {
            if interval.is_zero() {
                bail!("{} interval must not be 0", name);
            }
        }
        Ok(())
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self::new()
    }
}
