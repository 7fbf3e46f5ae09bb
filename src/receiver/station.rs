use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use crate::control_messages::ReplyData;

/// A sender as seen by the receiver, built from its reply to a lookup.
///
/// Two records are the same station if name and endpoints match - `last_reply` is bookkeeping
///  for staleness only.
#[derive(Clone, Debug)]
pub struct Station {
    pub name: String,
    pub ctrl_addr: SocketAddr,
    pub data_addr: SocketAddr,
    pub last_reply: Instant,
}

impl PartialEq for Station {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.ctrl_addr == other.ctrl_addr
            && self.data_addr == other.data_addr
    }
}
impl Eq for Station {}

impl Station {
    pub fn from_reply(reply: &ReplyData, ctrl_addr: SocketAddr) -> Station {
        Station {
            name: reply.name.clone(),
            ctrl_addr,
            data_addr: reply.data_addr(),
            last_reply: Instant::now(),
        }
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_reply) > timeout
    }
}
