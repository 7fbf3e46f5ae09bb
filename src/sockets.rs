//! Creation of the UDP sockets used by sender and receiver. `socket2` is used where options
//!  must be set before binding (address reuse) or are not exposed by tokio (multicast TTL).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

fn new_udp_socket(bind_addr: SocketAddrV4, reuse_address: bool) -> anyhow::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.bind(&SockAddr::from(bind_addr))?;
    Ok(socket)
}

fn into_tokio(socket: Socket) -> anyhow::Result<UdpSocket> {
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// The sender's socket for sending audio packets to the multicast group
pub fn multicast_send_socket(ttl: u32) -> anyhow::Result<UdpSocket> {
    let socket = new_udp_socket(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0), false)?;
    socket.set_multicast_ttl_v4(ttl)?;
    into_tokio(socket)
}

/// The sender's control socket, receiving (broadcast) lookups and retransmission requests on
///  a well-known port
pub fn control_listen_socket(ctrl_port: u16) -> anyhow::Result<UdpSocket> {
    let socket = new_udp_socket(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, ctrl_port), true)?;
    socket.set_broadcast(true)?;
    info!("listening for control messages on port {}", ctrl_port);
    into_tokio(socket)
}

/// The receiver's control socket: it sends (broadcast) lookups and retransmission requests from
///  an ephemeral port, and receives replies on that same port
pub fn control_client_socket() -> anyhow::Result<UdpSocket> {
    let socket = new_udp_socket(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0), false)?;
    socket.set_broadcast(true)?;
    into_tokio(socket)
}

/// Subscribes to a station's audio stream. For a multicast address, the group is joined on the
///  default interface; any other address is treated as a plain local port to listen on.
pub fn subscribe_data_socket(data_addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let socket = new_udp_socket(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, data_addr.port()), true)?;

    match data_addr {
        SocketAddr::V4(addr) if addr.ip().is_multicast() => {
            socket.join_multicast_v4(addr.ip(), &Ipv4Addr::UNSPECIFIED)?;
            info!("joined multicast group {}", addr);
        }
        other => {
            debug!("{:?} is not a multicast address - listening on port {} only", other, other.port());
        }
    }
    into_tokio(socket)
}

/// Receives a single datagram, waiting no longer than `timeout`. Timeouts and socket errors
///  yield `None` - the caller's loop goes on regardless.
pub async fn recv_with_timeout(socket: &UdpSocket, max_datagram_len: usize, timeout: Duration) -> Option<(Bytes, SocketAddr)> {
    let mut buf = BytesMut::zeroed(max_datagram_len);
    match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Err(_) => None,
        Ok(Err(e)) => {
            warn!("socket error: {}", e);
            None
        }
        Ok(Ok((num_read, from))) => {
            buf.truncate(num_read);
            Some((buf.freeze(), from))
        }
    }
}
