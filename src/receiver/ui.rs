//! A minimal telnet-style station menu: each connected client sees the list of stations with
//!  the selected one marked, and moves the selection with the arrow keys (or by typing `up` /
//!  `down` followed by a newline).

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::watch;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::receiver::state_manager::StateManager;
use crate::receiver::station_directory::{Direction, MenuEntry, StationDirectory};

pub const SELECTED_PREFIX: &str = "  > ";
pub const UNSELECTED_PREFIX: &str = "    ";

const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

const IAC: u8 = 255;
const WILL: u8 = 251;
const ECHO: u8 = 1;
const SUPPRESS_GO_AHEAD: u8 = 3;
/// puts a telnet client into character mode without local echo
const TELNET_NEGOTIATION: [u8; 6] = [IAC, WILL, ECHO, IAC, WILL, SUPPRESS_GO_AHEAD];

pub fn render_menu(entries: &[MenuEntry]) -> String {
    let mut result = String::from(CLEAR_SCREEN);
    result.push_str("------------------------------------------------------------------------\r\n");
    result.push_str(" wavecast\r\n");
    result.push_str("------------------------------------------------------------------------\r\n");
    for entry in entries {
        let prefix = if entry.is_selected { SELECTED_PREFIX } else { UNSELECTED_PREFIX };
        result.push_str(prefix);
        result.push_str(&entry.name);
        result.push_str("\r\n");
    }
    result.push_str("------------------------------------------------------------------------\r\n");
    result
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ParseState {
    Text,
    Escape,
    EscapeBracket,
    TelnetCommand,
    TelnetOption,
}

/// Turns a client's keystrokes into selection commands. Input may arrive in arbitrary chunks,
///  so partial escape sequences and lines are kept between calls.
pub struct CommandParser {
    state: ParseState,
    line: String,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    const MAX_LINE_LEN: usize = 64;

    pub fn new() -> CommandParser {
        CommandParser {
            state: ParseState::Text,
            line: String::new(),
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<Direction> {
        let mut result = Vec::new();

        for &b in data {
            self.state = match (self.state, b) {
                (ParseState::Text, 0x1b) => ParseState::Escape,
                (ParseState::Text, IAC) => ParseState::TelnetCommand,
                (ParseState::Text, b'\r') | (ParseState::Text, b'\n') | (ParseState::Text, 0) => {
                    if let Some(direction) = Self::parse_line(&self.line) {
                        result.push(direction);
                    }
                    self.line.clear();
                    ParseState::Text
                }
                (ParseState::Text, b) => {
                    if self.line.len() < Self::MAX_LINE_LEN && (b.is_ascii_graphic() || b == b' ') {
                        self.line.push(b as char);
                    }
                    ParseState::Text
                }

                (ParseState::Escape, b'[') | (ParseState::Escape, b'O') => ParseState::EscapeBracket,
                (ParseState::Escape, _) => ParseState::Text,
                (ParseState::EscapeBracket, b'A') => {
                    result.push(Direction::Up);
                    ParseState::Text
                }
                (ParseState::EscapeBracket, b'B') => {
                    result.push(Direction::Down);
                    ParseState::Text
                }
                (ParseState::EscapeBracket, _) => ParseState::Text,

                // WILL / WONT / DO / DONT are followed by an option byte
                (ParseState::TelnetCommand, 251..=254) => ParseState::TelnetOption,
                (ParseState::TelnetCommand, _) => ParseState::Text,
                (ParseState::TelnetOption, _) => ParseState::Text,
            };
        }
        result
    }

    fn parse_line(line: &str) -> Option<Direction> {
        match line.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "" => None,
            other => {
                debug!("ignoring unknown UI command {:?}", other);
                None
            }
        }
    }
}

/// Serves the station menu to any number of TCP clients. Every client sees the same menu, and
///  any client can change the selection.
pub struct UiServer {
    stations: Arc<StationDirectory>,
    state_manager: Arc<StateManager>,
    menu: watch::Sender<String>,
}

impl UiServer {
    pub fn new(stations: Arc<StationDirectory>, state_manager: Arc<StateManager>) -> UiServer {
        let (menu, _) = watch::channel(render_menu(&[]));
        UiServer {
            stations,
            state_manager,
            menu,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.menu.subscribe()
    }

    /// Re-renders the menu, notifying clients if it changed
    pub async fn refresh_menu(&self) {
        let rendered = render_menu(&self.stations.get_menu().await);
        self.menu.send_if_modified(|menu| {
            if *menu == rendered {
                return false;
            }
            *menu = rendered;
            true
        });
    }

    pub async fn on_command(&self, direction: Direction) {
        let selected = self.stations.select_get_selected(direction).await;
        debug!("UI: moved selection {:?} to {:?}", direction, selected.as_ref().map(|s| &s.name));
        self.state_manager.register_address_check_change(selected).await;
        self.refresh_menu().await;
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener, refresh_interval: Duration, cancel: CancellationToken) {
        info!("UI listening on {:?}", listener.local_addr().ok());

        let mut refresh_interval = interval(refresh_interval);
        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = refresh_interval.tick() => {
                    self.refresh_menu().await;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!("UI client connected from {:?}", peer_addr);
                            tokio::spawn(self.clone().handle_connection(stream, cancel.clone()));
                        }
                        Err(e) => {
                            warn!("error accepting UI connection: {}", e);
                        }
                    }
                }
            }
        }
        info!("UI server stopped");
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, cancel: CancellationToken) {
        let mut menu = self.subscribe();
        let mut parser = CommandParser::new();
        let mut buf = [0u8; 256];

        if let Err(e) = stream.write_all(&TELNET_NEGOTIATION).await {
            debug!("UI client went away: {}", e);
            return;
        }
        let initial = menu.borrow_and_update().clone();
        if let Err(e) = stream.write_all(initial.as_bytes()).await {
            debug!("UI client went away: {}", e);
            return;
        }

        loop {
            select! {
                _ = cancel.cancelled() => break,
                changed = menu.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let rendered = menu.borrow_and_update().clone();
                    if let Err(e) = stream.write_all(rendered.as_bytes()).await {
                        debug!("UI client went away: {}", e);
                        break;
                    }
                }
                read = stream.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            debug!("UI client disconnected");
                            break;
                        }
                        Ok(n) => {
                            for direction in parser.feed(&buf[..n]) {
                                self.on_command(direction).await;
                            }
                        }
                        Err(e) => {
                            debug!("UI client went away: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use rstest::rstest;
    use crate::control_messages::ReplyData;
    use crate::receiver::station::Station;

    fn station(name: &str) -> Station {
        Station::from_reply(
            &ReplyData { mcast_addr: Ipv4Addr::new(239, 0, 0, 1), data_port: 2000, name: name.to_string() },
            SocketAddr::from(([10, 0, 0, 1], 35830)),
        )
    }

    #[test]
    fn test_render_menu() {
        let rendered = render_menu(&[
            MenuEntry { name: "Jazz".to_string(), is_selected: false },
            MenuEntry { name: "Rock FM".to_string(), is_selected: true },
        ]);
        assert!(rendered.starts_with(CLEAR_SCREEN));
        assert!(rendered.contains("\r\n    Jazz\r\n  > Rock FM\r\n"));
    }

    #[rstest]
    #[case::arrow_up(vec![b"\x1b[A".as_slice()], vec![Direction::Up])]
    #[case::arrow_down(vec![b"\x1b[B".as_slice()], vec![Direction::Down])]
    #[case::application_mode(vec![b"\x1bOB".as_slice()], vec![Direction::Down])]
    #[case::several_arrows(vec![b"\x1b[A\x1b[B\x1b[B".as_slice()], vec![Direction::Up, Direction::Down, Direction::Down])]
    #[case::split_escape(vec![b"\x1b".as_slice(), b"[".as_slice(), b"B".as_slice()], vec![Direction::Down])]
    #[case::other_escape(vec![b"\x1b[C\x1b[D".as_slice()], vec![])]
    #[case::text_lines(vec![b"up\r\nDOWN\n".as_slice()], vec![Direction::Up, Direction::Down])]
    #[case::split_line(vec![b"do".as_slice(), b"wn\r\n".as_slice()], vec![Direction::Down])]
    #[case::unknown_line(vec![b"sideways\n".as_slice()], vec![])]
    #[case::telnet_negotiation(vec![&[IAC, 253, ECHO, IAC, 241][..], b"\x1b[A".as_slice()], vec![Direction::Up])]
    fn test_command_parser(#[case] chunks: Vec<&[u8]>, #[case] expected: Vec<Direction>) {
        let mut parser = CommandParser::new();
        let mut actual = Vec::new();
        for chunk in chunks {
            actual.extend(parser.feed(chunk));
        }
        assert_eq!(actual, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_command_switches_station() {
        let stations = Arc::new(StationDirectory::new(Duration::from_secs(20), None));
        let state_manager = Arc::new(StateManager::new());
        let ui = UiServer::new(stations.clone(), state_manager.clone());

        stations.update_get_selected(station("a")).await;
        stations.update_get_selected(station("b")).await;
        let mut menu = ui.subscribe();

        ui.on_command(Direction::Down).await;

        let (active, dirty) = state_manager.check_state().await;
        assert_eq!(active.map(|s| s.name), Some("b".to_string()));
        assert!(dirty);

        assert!(menu.has_changed().unwrap());
        assert!(menu.borrow_and_update().contains("    a\r\n  > b\r\n"));
    }

    #[tokio::test]
    async fn test_serves_menu_over_tcp() {
        let stations = Arc::new(StationDirectory::new(Duration::from_secs(20), None));
        let state_manager = Arc::new(StateManager::new());
        stations.update_get_selected(station("a")).await;
        stations.update_get_selected(station("b")).await;

        let ui = Arc::new(UiServer::new(stations.clone(), state_manager.clone()));
        ui.refresh_menu().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(ui.clone().run(listener, Duration::from_secs(60), cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&received).contains("  > a\r\n") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert!(received.starts_with(&TELNET_NEGOTIATION));

        client.write_all(b"\x1b[B").await.unwrap();
        received.clear();
        while !String::from_utf8_lossy(&received).contains("  > b\r\n") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(state_manager.check_state().await.0.map(|s| s.name), Some("b".to_string()));

        cancel.cancel();
        server.await.unwrap();
    }
}
