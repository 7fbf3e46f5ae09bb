use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::select;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::config::ReceiverConfig;
use crate::control_messages::ControlMessage;
use crate::data_message::DataMessage;
use crate::packet_id::PacketId;
use crate::receiver::receive_session::ReceiveSession;
use crate::receiver::state_manager::StateManager;
use crate::receiver::station::Station;
use crate::receiver::station_directory::StationDirectory;
use crate::receiver::ui::UiServer;
use crate::send_socket::{send_control_message, SendSocket};
use crate::sockets::{control_client_socket, recv_with_timeout, subscribe_data_socket};

/// The subscription to the active station's audio stream. It is replaced as a whole when the
///  station or session changes, and intake holds the lock while it processes a packet so that
///  no packet of the previous subscription ends up in the reset buffer.
struct DataPath {
    socket: Option<UdpSocket>,
}

/// The receiver: it discovers stations, plays the selected one and requests retransmission of
///  packets that went missing.
pub struct RadioReceiver {
    config: Arc<ReceiverConfig>,
    session: Arc<ReceiveSession>,
    state_manager: Arc<StateManager>,
    stations: Arc<StationDirectory>,
    ctrl_socket: Arc<UdpSocket>,
    send_socket: Arc<dyn SendSocket>,
    data_path: Mutex<DataPath>,
}

impl RadioReceiver {
    pub fn new(config: Arc<ReceiverConfig>) -> anyhow::Result<RadioReceiver> {
        config.validate()?;

        let ctrl_socket = Arc::new(control_client_socket()?);
        let state_manager = Arc::new(StateManager::new());

        Ok(RadioReceiver {
            session: Arc::new(ReceiveSession::new(&config, state_manager.clone())),
            stations: Arc::new(StationDirectory::new(config.station_timeout, config.preferred_station.clone())),
            send_socket: Arc::new(ctrl_socket.clone()),
            ctrl_socket,
            state_manager,
            data_path: Mutex::new(DataPath { socket: None }),
            config,
        })
    }

    pub fn stations(&self) -> &Arc<StationDirectory> {
        &self.stations
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Runs until cancelled or until playback output fails
    pub async fn run(
        self: Arc<Self>,
        output: impl AsyncWrite + Unpin + Send + 'static,
        ui_listener: Option<TcpListener>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("receiver started, looking for stations at {:?}", self.config.discover_target());

        let mut handles: Vec<JoinHandle<()>> = vec![
            tokio::spawn(self.clone().reset_monitor_loop(cancel.clone())),
            tokio::spawn(self.clone().ctrl_receive_loop(cancel.clone())),
            tokio::spawn(self.clone().lookup_loop(cancel.clone())),
            tokio::spawn(self.clone().rexmit_loop(cancel.clone())),
            tokio::spawn(self.clone().data_intake_loop(cancel.clone())),
        ];
        if let Some(listener) = ui_listener {
            let ui = Arc::new(UiServer::new(self.stations.clone(), self.state_manager.clone()));
            handles.push(tokio::spawn(ui.run(listener, self.config.ui_refresh_interval, cancel.clone())));
        }

        let result = self.playback_loop(output, &cancel).await;

        cancel.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("receiver task failed: {}", e);
            }
        }
        info!("receiver stopped");
        result
    }

    async fn reset_monitor_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut reset_interval = interval(self.config.reset_check_interval);
        reset_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = reset_interval.tick() => {
                    if !self.state_manager.is_dirty().await {
                        continue;
                    }

                    // intake ignores packets until the flag is cleared, and it can not process
                    //  one between clearing the flag and resetting
                    let mut data_path = self.data_path.lock().await;
                    let (station, was_dirty) = self.state_manager.check_state().await;
                    if was_dirty {
                        self.reset_data_path(&mut data_path, station).await;
                    }
                }
            }
        }
    }

    async fn reset_data_path(&self, data_path: &mut DataPath, station: Option<Station>) {
        self.session.reset().await;
        data_path.socket = None;

        let station = match station {
            Some(station) => station,
            None => {
                info!("no station selected - playback stopped");
                return;
            }
        };

        match subscribe_data_socket(station.data_addr) {
            Ok(socket) => {
                info!("listening to station {:?} at {:?}", station.name, station.data_addr);
                data_path.socket = Some(socket);
            }
            Err(e) => {
                warn!("could not subscribe to {:?} for station {:?}: {} - retrying", station.data_addr, station.name, e);
                self.state_manager.mark_dirty().await;
            }
        }
    }

    async fn data_intake_loop(self: Arc<Self>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let data_path = self.data_path.lock().await;
            if data_path.socket.is_none() {
                drop(data_path);
                select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.config.reset_check_interval) => continue,
                }
            }
            let Some(socket) = &data_path.socket else {
                continue;
            };

            let received = select! {
                _ = cancel.cancelled() => break,
                received = recv_with_timeout(socket, self.config.max_datagram_len, self.config.recv_timeout) => received,
            };
            let Some((buf, from)) = received else {
                continue;
            };

            match DataMessage::deser(buf) {
                Ok(message) => {
                    self.session.on_data_message(message).await;
                }
                Err(e) => debug!("dropping data packet from {:?}: {}", from, e),
            }
        }
    }

    async fn playback_loop(&self, mut output: impl AsyncWrite + Unpin, cancel: &CancellationToken) -> anyhow::Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.session.read_playback().await {
                Some(payload) => {
                    select! {
                        _ = cancel.cancelled() => return Ok(()),
                        written = output.write_all(&payload) => {
                            if let Err(e) = written {
                                error!("error writing audio output: {}", e);
                                return Err(e.into());
                            }
                        }
                    }
                }
                None => {
                    output.flush().await?;
                    select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = sleep(self.config.playback_poll_interval) => {}
                    }
                }
            }
        }
    }

    async fn rexmit_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut rexmit_interval = interval(self.config.rexmit_check_interval);
        rexmit_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut forget = BTreeSet::new();

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = rexmit_interval.tick() => {
                    let (to_request, to_forget) = self.session.rexmit_round(&forget).await;
                    forget = to_forget;
                    self.send_rexmit_requests(to_request).await;
                }
            }
        }
    }

    async fn send_rexmit_requests(&self, ids: BTreeSet<PacketId>) {
        if ids.is_empty() {
            return;
        }
        let Some(station) = self.state_manager.active_station().await else {
            return;
        };

        debug!("requesting retransmission of {} packets from {:?}", ids.len(), station.ctrl_addr);
        for message in ControlMessage::rexmit_requests(ids, self.config.max_rexmit_ids_per_message) {
            send_control_message(self.send_socket.as_ref(), station.ctrl_addr, &message).await;
        }
    }

    async fn lookup_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut lookup_interval = interval(self.config.lookup_interval);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = lookup_interval.tick() => {
                    trace!("sending lookup to {:?}", self.config.discover_target());
                    send_control_message(self.send_socket.as_ref(), self.config.discover_target(), &ControlMessage::Lookup).await;

                    // stations that stopped replying are dropped here, possibly changing the selection
                    let selected = self.stations.get_selected().await;
                    self.state_manager.register_address_check_change(selected).await;
                }
            }
        }
    }

    async fn ctrl_receive_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let received = select! {
                _ = cancel.cancelled() => break,
                received = recv_with_timeout(&self.ctrl_socket, self.config.max_datagram_len, self.config.recv_timeout) => received,
            };
            let Some((buf, from)) = received else {
                continue;
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "control_message_received", ?correlation_id);
            self.on_ctrl_datagram(&buf, from)
                .instrument(span)
                .await;
        }
    }

    async fn on_ctrl_datagram(&self, buf: &[u8], from: SocketAddr) {
        let message = match ControlMessage::deser(buf) {
            Ok(message) => message,
            Err(e) => {
                debug!("dropping control message from {:?}: {}", from, e);
                return;
            }
        };

        match message {
            ControlMessage::Reply(reply) => {
                trace!("reply from {:?}: {:?}", from, reply);
                let station = Station::from_reply(&reply, from);
                let selected = self.stations.update_get_selected(station).await;
                self.state_manager.register_address_check_change(selected).await;
            }
            other => {
                debug!("unexpected {} message from {:?} - ignoring", other.kind(), from);
            }
        }
    }
}
