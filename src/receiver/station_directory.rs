use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use crate::receiver::station::Station;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Up,
    Down,
}

/// An entry of the station menu
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MenuEntry {
    pub name: String,
    pub is_selected: bool,
}

struct StationDirectoryInner {
    stations: BTreeMap<String, Station>,
    selected: Option<String>,
}

impl StationDirectoryInner {
    fn evict_stale(&mut self, station_timeout: Duration) {
        let now = Instant::now();

        let stale = self.stations.values()
            .filter(|s| s.is_stale(now, station_timeout))
            .map(|s| s.name.clone())
            .collect::<Vec<_>>();
        if stale.is_empty() {
            return;
        }

        for name in &stale {
            info!("station {:?} did not reply for {:?} - removing it", name, station_timeout);
            self.stations.remove(name);
        }

        if let Some(selected) = self.selected.clone() {
            if !self.stations.contains_key(&selected) {
                self.selected = self.name_after(&selected)
                    .or_else(|| self.first_name());
                debug!("selected station was removed, selecting {:?}", self.selected);
            }
        }
    }

    fn name_after(&self, name: &str) -> Option<String> {
        self.stations.range::<str, _>((Bound::Excluded(name), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    fn name_before(&self, name: &str) -> Option<String> {
        self.stations.range::<str, _>((Bound::Unbounded, Bound::Excluded(name)))
            .next_back()
            .map(|(k, _)| k.clone())
    }

    fn first_name(&self) -> Option<String> {
        self.stations.keys().next().cloned()
    }

    fn last_name(&self) -> Option<String> {
        self.stations.keys().next_back().cloned()
    }

    fn selected_station(&self) -> Option<Station> {
        self.selected.as_ref()
            .and_then(|name| self.stations.get(name))
            .cloned()
    }
}

/// All stations that answered lookups recently, ordered by name, and the one the listener
///  selected. Stations that stop answering are removed on every access.
pub struct StationDirectory {
    station_timeout: Duration,
    preferred_station: Option<String>,
    inner: RwLock<StationDirectoryInner>,
}

impl StationDirectory {
    pub fn new(station_timeout: Duration, preferred_station: Option<String>) -> StationDirectory {
        StationDirectory {
            station_timeout,
            preferred_station,
            inner: RwLock::new(StationDirectoryInner {
                stations: Default::default(),
                selected: None,
            }),
        }
    }

    /// Adds or refreshes a station, returning the selected station afterwards.
    ///
    /// The first station to show up is selected. The preferred station is selected when it
    ///  shows up, but only then - the listener may switch away from it afterwards.
    pub async fn update_get_selected(&self, station: Station) -> Option<Station> {
        let mut inner = self.inner.write().await;
        inner.evict_stale(self.station_timeout);

        let name = station.name.clone();
        let is_new = inner.stations.insert(name.clone(), station).is_none();
        if is_new {
            info!("discovered station {:?}", name);
        }

        if inner.selected.is_none() {
            inner.selected = Some(name);
        }
        else if is_new && self.preferred_station.as_ref() == Some(&name) {
            info!("preferred station {:?} showed up - selecting it", name);
            inner.selected = Some(name);
        }

        inner.selected_station()
    }

    /// Moves the selection one station up or down in the menu, wrapping around at both ends
    pub async fn select_get_selected(&self, direction: Direction) -> Option<Station> {
        let mut inner = self.inner.write().await;
        inner.evict_stale(self.station_timeout);

        let new_selection = match (&inner.selected, direction) {
            (None, _) => inner.first_name(),
            (Some(current), Direction::Down) => inner.name_after(current).or_else(|| inner.first_name()),
            (Some(current), Direction::Up) => inner.name_before(current).or_else(|| inner.last_name()),
        };
        inner.selected = new_selection;

        inner.selected_station()
    }

    pub async fn get_selected(&self) -> Option<Station> {
        let mut inner = self.inner.write().await;
        inner.evict_stale(self.station_timeout);
        inner.selected_station()
    }

    pub async fn get_station_names(&self) -> Vec<String> {
        let mut inner = self.inner.write().await;
        inner.evict_stale(self.station_timeout);
        inner.stations.keys().cloned().collect()
    }

    pub async fn get_menu(&self) -> Vec<MenuEntry> {
        let mut inner = self.inner.write().await;
        inner.evict_stale(self.station_timeout);
        inner.stations.keys()
            .map(|name| MenuEntry {
                name: name.clone(),
                is_selected: inner.selected.as_ref() == Some(name),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use rstest::rstest;
    use tokio::time::advance;
    use crate::control_messages::ReplyData;

    fn station(name: &str) -> Station {
        Station::from_reply(
            &ReplyData { mcast_addr: Ipv4Addr::new(239, 0, 0, 1), data_port: 2000, name: name.to_string() },
            SocketAddr::from(([10, 0, 0, 1], 35830)),
        )
    }

    fn selected_name(station: Option<Station>) -> Option<String> {
        station.map(|s| s.name)
    }

    async fn directory_with(names: &[&str], preferred: Option<&str>) -> StationDirectory {
        let directory = StationDirectory::new(Duration::from_secs(20), preferred.map(|s| s.to_string()));
        for name in names {
            directory.update_get_selected(station(name)).await;
        }
        directory
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_station_is_selected() {
        let directory = directory_with(&[], None).await;
        assert_eq!(directory.get_selected().await, None);

        assert_eq!(selected_name(directory.update_get_selected(station("b")).await), Some("b".to_string()));
        assert_eq!(selected_name(directory.update_get_selected(station("a")).await), Some("b".to_string()));
        assert_eq!(directory.get_station_names().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[rstest]
    #[case::down_from_first(Direction::Down, 1, "B")]
    #[case::down_wraps(Direction::Down, 3, "A")]
    #[case::up_wraps(Direction::Up, 1, "C")]
    #[case::up_back_to_first(Direction::Up, 3, "A")]
    #[case::down_twice(Direction::Down, 2, "C")]
    fn test_wrap_around(#[case] direction: Direction, #[case] num_steps: usize, #[case] expected: &str) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let directory = directory_with(&["A", "B", "C"], None).await;
            assert_eq!(selected_name(directory.get_selected().await), Some("A".to_string()));

            let mut selected = None;
            for _ in 0..num_steps {
                selected = directory.select_get_selected(direction).await;
            }
            assert_eq!(selected_name(selected), Some(expected.to_string()));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_on_empty_directory() {
        let directory = directory_with(&[], None).await;
        assert_eq!(directory.select_get_selected(Direction::Down).await, None);
        assert_eq!(directory.select_get_selected(Direction::Up).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preferred_station_selected_once() {
        let directory = directory_with(&["a"], Some("p")).await;

        assert_eq!(selected_name(directory.update_get_selected(station("p")).await), Some("p".to_string()));

        directory.select_get_selected(Direction::Up).await;
        assert_eq!(selected_name(directory.get_selected().await), Some("a".to_string()));

        // refreshing the preferred station does not select it again
        assert_eq!(selected_name(directory.update_get_selected(station("p")).await), Some("a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_stations_are_evicted() {
        let directory = directory_with(&["a", "b"], None).await;

        advance(Duration::from_secs(15)).await;
        directory.update_get_selected(station("b")).await;

        advance(Duration::from_secs(6)).await;
        assert_eq!(directory.get_station_names().await, vec!["b".to_string()]);
        assert_eq!(selected_name(directory.get_selected().await), Some("b".to_string()));

        advance(Duration::from_secs(15)).await;
        assert!(directory.get_station_names().await.is_empty());
        assert_eq!(directory.get_selected().await, None);
    }

    #[rstest]
    #[case::next_in_order(&["a", "b", "c"], "b", &["a", "c"], Some("c"))]
    #[case::wraps_to_first(&["a", "b", "c"], "c", &["a", "b"], Some("a"))]
    #[case::none_left(&["a"], "a", &[], None)]
    fn test_eviction_of_selected(#[case] names: &[&str], #[case] selected: &str, #[case] refreshed: &[&str], #[case] expected: Option<&str>) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let directory = directory_with(names, None).await;
            while selected_name(directory.get_selected().await).as_deref() != Some(selected) {
                directory.select_get_selected(Direction::Down).await;
            }

            advance(Duration::from_secs(15)).await;
            for name in refreshed {
                directory.update_get_selected(station(name)).await;
            }
            advance(Duration::from_secs(6)).await;

            assert_eq!(selected_name(directory.get_selected().await).as_deref(), expected);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_menu() {
        let directory = directory_with(&["b", "a"], None).await;
        assert_eq!(directory.get_menu().await, vec![
            MenuEntry { name: "a".to_string(), is_selected: false },
            MenuEntry { name: "b".to_string(), is_selected: true },
        ]);
    }
}
