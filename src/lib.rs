//! A protocol for broadcasting a live audio stream to any number of receivers on a LAN, using
//!  UDP multicast for the audio and unicast / broadcast for control.
//!
//! ## Design goals
//!
//! * Senders ('stations') are found without configuration: receivers broadcast a lookup, and
//!   every station answers with its name and multicast group
//! * Audio goes to a multicast group, so the sender's load does not depend on the number of
//!   receivers
//! * Lost packets are recovered by negative ack: a receiver asks for what is missing, and the
//!   sender re-sends from a bounded cache of recently sent packets
//!   * requests from different receivers for the same packet are merged into a single resend
//!   * there is no guarantee of delivery: a gap that is not filled in time restarts playback
//! * Receivers buffer a configurable amount of audio before starting playback, trading latency
//!   for resilience against packet loss
//! * A restarted sender is detected by its session id, and receivers start over with fresh data
//!
//! ## Data packets
//!
//! All numbers in network byte order (BE):
//! ```ascii
//! 0:  session id (u64) - the sender's start time, so a restarted sender has a higher id
//! 8:  packet id (u64) - the byte offset of the payload in the audio stream
//! 16: payload - all packets of a session have the same payload length
//! ```
//!
//! Numbering packets by byte offset rather than sequence number lets a receiver compute the
//!  position of every packet relative to the first one it saw, based on the payload length.
//!
//! ## Control messages
//!
//! Control messages are single lines of text:
//! ```ascii
//! ZERO_SEVEN_COME_IN                             lookup, broadcast by receivers
//! BOREWICZ_HERE <mcast addr> <data port> <name>  reply, sent to the lookup's source
//! LOUDER_PLEASE <id>,<id>,...                    retransmission request, sent to the station
//! ```
//!
//! ## Receiver
//!
//! The receiver keeps a sliding window of packets, starting at the first packet of a session.
//!  Playback starts once the window is three quarters full, and from then on the window moves
//!  forward as packets arrive, dropping the oldest packets if playback does not keep up. Gaps are
//!  requested periodically until they are filled or fall out of the window. If playback reaches
//!  a gap, the receiver starts over.
//!
//! A telnet-style UI lists the known stations and allows switching between them.

pub mod config;
pub mod control_messages;
pub mod data_message;
pub mod packet_id;
pub mod receiver;
pub mod send_socket;
pub mod sender;
pub mod sockets;
