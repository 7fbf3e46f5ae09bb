use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::config::SenderConfig;
use crate::control_messages::{ControlMessage, ReplyData};
use crate::data_message::AudioPacket;
use crate::packet_id::PacketId;
use crate::send_socket::{send_control_message, send_with_retry, SendSocket};
use crate::sender::resend_queue::ResendQueue;
use crate::sender::sent_cache::SentCache;
use crate::sockets::{control_listen_socket, multicast_send_socket, recv_with_timeout};

/// A session id is the sender's start time in millis since the epoch, so a restarted sender
///  has a higher session id than its previous incarnation
pub fn session_id_from_timestamp() -> anyhow::Result<u64> {
    let raw = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_millis();

    if raw > 0xffff_ffff_ffff {
        anyhow::bail!("system clock is in the future");
    }
    Ok(raw as u64)
}

/// The sender: it streams its input to the multicast group, answers lookups and retransmits
///  cached packets on request.
pub struct RadioSender {
    config: Arc<SenderConfig>,
    session_id: u64,
    cache: SentCache,
    resend_queue: ResendQueue,
    data_socket: Arc<dyn SendSocket>,
    ctrl_socket: Arc<UdpSocket>,
    ctrl_send_socket: Arc<dyn SendSocket>,
}

impl RadioSender {
    pub fn new(config: Arc<SenderConfig>) -> anyhow::Result<RadioSender> {
        config.validate()?;

        let data_socket = Arc::new(multicast_send_socket(config.multicast_ttl)?);
        let ctrl_socket = Arc::new(control_listen_socket(config.ctrl_port)?);
        let ctrl_send_socket = Arc::new(ctrl_socket.clone());

        Ok(Self::with_sockets(config, session_id_from_timestamp()?, Arc::new(data_socket), ctrl_socket, ctrl_send_socket))
    }

    fn with_sockets(
        config: Arc<SenderConfig>,
        session_id: u64,
        data_socket: Arc<dyn SendSocket>,
        ctrl_socket: Arc<UdpSocket>,
        ctrl_send_socket: Arc<dyn SendSocket>,
    ) -> RadioSender {
        RadioSender {
            cache: SentCache::new(config.cache_capacity(), config.packet_size),
            resend_queue: ResendQueue::new(),
            session_id,
            data_socket,
            ctrl_socket,
            ctrl_send_socket,
            config,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Streams `input` until it is exhausted or `cancel` fires, serving control requests in the
    ///  background. Returns once all tasks are stopped.
    pub async fn run(self: Arc<Self>, input: impl AsyncRead + Unpin + Send + 'static, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("station {:?} broadcasting to {:?} in session {}", self.config.name, self.config.data_addr(), self.session_id);

        let handles = vec![
            tokio::spawn(self.clone().ctrl_receive_loop(cancel.clone())),
            tokio::spawn(self.clone().resend_loop(cancel.clone())),
        ];

        let result = self.input_loop(input, &cancel).await;

        cancel.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("sender task failed: {}", e);
            }
        }
        info!("sender stopped");
        result
    }

    async fn input_loop(&self, mut input: impl AsyncRead + Unpin, cancel: &CancellationToken) -> anyhow::Result<()> {
        let packet_size = self.config.packet_size;
        let mut next_id = PacketId::ZERO;

        loop {
            let mut buf = BytesMut::zeroed(packet_size);
            let read = select! {
                _ = cancel.cancelled() => return Ok(()),
                read = input.read_exact(&mut buf) => read,
            };

            match read {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    info!("end of input after {} bytes", next_id);
                    return Ok(());
                }
                Err(e) => {
                    error!("error reading input: {}", e);
                    return Err(e.into());
                }
            }

            self.send_audio_packet(AudioPacket::new(next_id, buf.freeze()), cancel).await;

            next_id = match next_id.checked_plus(packet_size as u64) {
                Some(id) => id,
                None => anyhow::bail!("packet id overflow"),
            };
        }
    }

    async fn send_audio_packet(&self, packet: AudioPacket, cancel: &CancellationToken) {
        self.cache.atomic_push(packet.clone()).await;
        self.transmit(&packet, cancel).await;
    }

    async fn transmit(&self, packet: &AudioPacket, cancel: &CancellationToken) {
        let message = packet.stamped(self.session_id);
        let mut buf = BytesMut::with_capacity(message.serialized_len());
        if let Err(e) = message.ser(&mut buf) {
            warn!("not sending packet #{}: {}", packet.packet_id, e);
            return;
        }

        if !send_with_retry(self.data_socket.as_ref(), self.config.data_addr(), &buf, cancel).await {
            debug!("shutting down - packet #{} was not sent", packet.packet_id);
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
            ControlMessage::Lookup => {
                trace!("lookup from {:?}", from);
                let reply = ControlMessage::Reply(ReplyData {
                    mcast_addr: self.config.mcast_addr,
                    data_port: self.config.data_port,
                    name: self.config.name.clone(),
                });
                send_control_message(self.ctrl_send_socket.as_ref(), from, &reply).await;
            }
            ControlMessage::RexmitRequest(ids) => {
                trace!("retransmission request from {:?} for {:?}", from, ids);
                for packet_id in ids {
                    match self.cache.atomic_get(packet_id).await {
                        Some(packet) => self.resend_queue.push(packet).await,
                        None => debug!("packet #{} requested by {:?} is not cached", packet_id, from),
                    }
                }
            }
            ControlMessage::Reply(_) => {
                debug!("unexpected reply from {:?} - ignoring", from);
            }
        }
    }

    async fn resend_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut resend_interval = interval(self.config.rexmit_interval);
        resend_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = resend_interval.tick() => self.resend_round(&cancel).await,
            }
        }
    }

    async fn resend_round(&self, cancel: &CancellationToken) {
        let packets = self.resend_queue.drain().await;
        if packets.is_empty() {
            return;
        }

        debug!("retransmitting {} packets", packets.len());
        for packet in packets {
            self.transmit(&packet, cancel).await;
        }
    }
}
