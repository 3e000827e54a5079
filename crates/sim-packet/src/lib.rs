//! Packet representation and the generic byte-queue buffer used by every virtual socket (§4.8).
//!
//! Packets are reference-counted: a single send can be cloned cheaply onto a link's delivery
//! queue, a retransmit queue, and a pcap-style trace without copying the payload.

pub mod buffer;
pub mod header;
pub mod packet;

pub use buffer::ByteQueue;
pub use header::{Ipv4Header, Protocol, TcpFlags, TcpHeader, UdpHeader};
pub use packet::{Packet, PacketRef, TransportHeader};
