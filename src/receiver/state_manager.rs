use tokio::sync::RwLock;
use tracing::{debug, info, trace};
use crate::receiver::station::Station;

struct StateManagerInner {
    active_station: Option<Station>,
    /// the highest session id seen for the active station
    session_id: u64,
    /// set whenever the audio path must start over, cleared when the reset monitor picks it up
    dirty: bool,
}

/// Tracks which station is being listened to and which of its sessions, raising a 'dirty' flag
///  whenever either changes. The reset monitor polls the flag and starts over with an empty
///  buffer.
pub struct StateManager {
    inner: RwLock<StateManagerInner>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> StateManager {
        StateManager {
            inner: RwLock::new(StateManagerInner {
                active_station: None,
                session_id: 0,
                dirty: false,
            }),
        }
    }

    /// Returns the active station and whether a reset is due, clearing the flag atomically
    pub async fn check_state(&self) -> (Option<Station>, bool) {
        let mut inner = self.inner.write().await;
        let was_dirty = inner.dirty;
        inner.dirty = false;
        (inner.active_station.clone(), was_dirty)
    }

    /// `true` while a reset is pending. Only the reset monitor clears the flag.
    pub async fn is_dirty(&self) -> bool {
        self.inner.read().await.dirty
    }

    /// The station being played, without touching the dirty flag
    pub async fn active_station(&self) -> Option<Station> {
        self.inner.read().await
            .active_station.clone()
    }

    /// Registers the station that should be played, returning `true` if that is a change.
    ///
    /// A new station's sessions are unrelated to the previous station's, so the session id
    ///  starts over as well.
    pub async fn register_address_check_change(&self, new_station: Option<Station>) -> bool {
        let mut inner = self.inner.write().await;

        if inner.active_station == new_station {
            inner.active_station = new_station;
            return false;
        }

        info!("switching station from {:?} to {:?}",
            inner.active_station.as_ref().map(|s| &s.name),
            new_station.as_ref().map(|s| &s.name),
        );
        inner.active_station = new_station;
        inner.session_id = 0;
        inner.dirty = true;
        true
    }

    /// Checks a data packet's session id, returning `true` if the packet should be ignored.
    ///
    /// A higher session id means the sender restarted: the new session is adopted and a reset
    ///  requested, and the packet that revealed the restart is dropped along with the buffer.
    ///
    /// While a reset is pending, all packets are ignored without looking at their session. They
    ///  belong to the stream that is being discarded, possibly from a station that is no longer
    ///  active, and must neither reach the buffer nor be adopted as the current session.
    pub async fn register_session_check_ignore(&self, session_id: u64) -> bool {
        let mut inner = self.inner.write().await;

        if inner.dirty {
            trace!("reset pending - dropping packet of session {}", session_id);
            return true;
        }
        if session_id < inner.session_id {
            debug!("packet from outdated session {} (current session is {}) - ignoring", session_id, inner.session_id);
            return true;
        }
        if session_id == inner.session_id {
            return false;
        }

        info!("new session {} (previous session was {})", session_id, inner.session_id);
        inner.session_id = session_id;
        inner.dirty = true;
        true
    }

    pub async fn mark_dirty(&self) {
        self.inner.write().await
            .dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use rstest::rstest;
    use crate::control_messages::ReplyData;

    fn station(name: &str, port: u16) -> Station {
        Station::from_reply(
            &ReplyData { mcast_addr: Ipv4Addr::new(239, 0, 0, 1), data_port: port, name: name.to_string() },
            SocketAddr::from(([10, 0, 0, 1], 35830)),
        )
    }

    #[rstest]
    #[case::lower(vec![5], 4, true, false)]
    #[case::equal(vec![5], 5, false, false)]
    #[case::higher(vec![5], 6, true, true)]
    #[case::first_session(vec![], 1, true, true)]
    #[case::zero_session(vec![], 0, false, false)]
    fn test_session_monotonicity(#[case] previous: Vec<u64>, #[case] session_id: u64, #[case] expected_ignore: bool, #[case] expected_dirty: bool) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let state_manager = StateManager::new();
            for s in previous {
                state_manager.register_session_check_ignore(s).await;
            }
            state_manager.check_state().await;

            assert_eq!(state_manager.register_session_check_ignore(session_id).await, expected_ignore);
            assert_eq!(state_manager.check_state().await.1, expected_dirty);
        });
    }

    #[tokio::test]
    async fn test_session_adopted_after_restart() {
        let state_manager = StateManager::new();
        assert!(state_manager.register_session_check_ignore(10).await);
        assert!(state_manager.check_state().await.1);
        assert!(!state_manager.register_session_check_ignore(10).await);
        assert!(state_manager.register_session_check_ignore(9).await);
        assert!(!state_manager.is_dirty().await);

        assert!(state_manager.register_session_check_ignore(11).await);
        assert!(state_manager.check_state().await.1);
        assert!(!state_manager.register_session_check_ignore(11).await);
        assert!(state_manager.register_session_check_ignore(10).await);
    }

    #[tokio::test]
    async fn test_packets_ignored_while_reset_pending() {
        let state_manager = StateManager::new();
        assert!(state_manager.register_session_check_ignore(10).await);

        // neither the new session nor an even newer one gets through before the reset
        assert!(state_manager.register_session_check_ignore(10).await);
        assert!(state_manager.register_session_check_ignore(12).await);
        assert!(state_manager.is_dirty().await);

        assert!(state_manager.check_state().await.1);
        assert!(!state_manager.register_session_check_ignore(10).await);

        state_manager.mark_dirty().await;
        assert!(state_manager.register_session_check_ignore(10).await);
        state_manager.check_state().await;
        assert!(!state_manager.register_session_check_ignore(10).await);
    }

    #[tokio::test]
    async fn test_check_state_clears_dirty() {
        let state_manager = StateManager::new();
        assert_eq!(state_manager.check_state().await, (None, false));

        state_manager.mark_dirty().await;
        assert_eq!(state_manager.check_state().await, (None, true));
        assert_eq!(state_manager.check_state().await, (None, false));
    }

    #[tokio::test]
    async fn test_register_address() {
        let state_manager = StateManager::new();

        assert!(state_manager.register_address_check_change(Some(station("a", 1))).await);
        assert_eq!(state_manager.active_station().await, Some(station("a", 1)));
        assert_eq!(state_manager.check_state().await, (Some(station("a", 1)), true));

        assert!(!state_manager.register_address_check_change(Some(station("a", 1))).await);
        assert_eq!(state_manager.check_state().await, (Some(station("a", 1)), false));

        assert!(state_manager.register_address_check_change(Some(station("a", 2))).await);
        assert_eq!(state_manager.check_state().await, (Some(station("a", 2)), true));

        assert!(state_manager.register_address_check_change(None).await);
        assert_eq!(state_manager.check_state().await, (None, true));
    }

    #[tokio::test]
    async fn test_station_change_forgets_session() {
        let state_manager = StateManager::new();
        state_manager.register_address_check_change(Some(station("a", 1))).await;
        state_manager.check_state().await;
        state_manager.register_session_check_ignore(1000).await;
        state_manager.check_state().await;
        assert!(!state_manager.register_session_check_ignore(1000).await);

        state_manager.register_address_check_change(Some(station("b", 1))).await;
        // a packet of the previous station that was in flight during the switch
        assert!(state_manager.register_session_check_ignore(1000).await);
        assert_eq!(state_manager.check_state().await, (Some(station("b", 1)), true));

        // the new station started earlier than the previous one
        assert!(state_manager.register_session_check_ignore(500).await);
        assert!(state_manager.check_state().await.1);
        assert!(!state_manager.register_session_check_ignore(500).await);
    }
}
