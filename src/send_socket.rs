use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};
use crate::control_messages::ControlMessage;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<()>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<()> {
        trace!("UDP socket: sending packet of {} bytes to {:?}", packet_buf.len(), to);

        let num_sent = self.send_to(packet_buf, to).await?;
        if num_sent != packet_buf.len() {
            warn!("UDP socket: sent only {} of {} bytes to {:?}", num_sent, packet_buf.len(), to);
        }
        Ok(())
    }
}

/// Sends a control message, logging failures. Control messages are fire-and-forget: lookups are
///  repeated periodically, and retransmission requests are repeated until the gap is filled.
pub async fn send_control_message(socket: &dyn SendSocket, to: SocketAddr, message: &ControlMessage) {
    let mut buf = BytesMut::new();
    message.ser(&mut buf);

    if let Err(e) = socket.do_send_packet(to, &buf).await {
        error!("error sending {} message to {:?}: {}", message.kind(), to, e);
    }
}

/// Sends a packet, retrying immediately after every failure until it is sent. Returns `false`
///  only if `cancel` fires first.
pub async fn send_with_retry(socket: &dyn SendSocket, to: SocketAddr, packet_buf: &[u8], cancel: &CancellationToken) -> bool {
    let mut attempt = 1usize;
    loop {
        match socket.do_send_packet(to, packet_buf).await {
            Ok(()) => return true,
            Err(e) => {
                warn!("error sending UDP packet to {:?} (attempt {}): {} - retrying", to, attempt, e);
            }
        }
        if cancel.is_cancelled() {
            return false;
        }
        attempt += 1;
        tokio::task::yield_now().await;
    }
}
