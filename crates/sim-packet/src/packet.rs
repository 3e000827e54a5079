use std::sync::Arc;

use bytes::Bytes;

use crate::header::{Ipv4Header, TcpHeader, UdpHeader};

#[derive(Clone, Debug)]
pub enum TransportHeader {
    Tcp(TcpHeader),
    Udp(UdpHeader),
}

/// A fully-formed packet: an IP header, a transport header, and a payload. Packets are immutable
/// once built; the send path constructs one, and every consumer (the link model, a retransmit
/// queue, a receive buffer) shares it through [`PacketRef`] rather than copying it.
#[derive(Clone, Debug)]
pub struct Packet {
    pub ip: Ipv4Header,
    pub transport: TransportHeader,
    pub payload: Bytes,
}

/// A reference-counted handle to a [`Packet`]. Cloning is `Arc::clone`: cheap, and every clone
/// observes the same bytes.
pub type PacketRef = Arc<Packet>;

impl Packet {
    pub fn new_tcp(ip: Ipv4Header, header: TcpHeader, payload: Bytes) -> PacketRef {
        Arc::new(Self {
            ip,
            transport: TransportHeader::Tcp(header),
            payload,
        })
    }

    pub fn new_udp(ip: Ipv4Header, header: UdpHeader, payload: Bytes) -> PacketRef {
        Arc::new(Self {
            ip,
            transport: TransportHeader::Udp(header),
            payload,
        })
    }

    /// Total wire length: header bytes (fixed, no IP options) plus payload.
    pub fn wire_len(&self) -> usize {
        const IP_HEADER_LEN: usize = 20;
        let transport_len = match &self.transport {
            TransportHeader::Tcp(_) => 20,
            TransportHeader::Udp(_) => 8,
        };
        IP_HEADER_LEN + transport_len + self.payload.len()
    }

    pub fn tcp_header(&self) -> Option<&TcpHeader> {
        match &self.transport {
            TransportHeader::Tcp(h) => Some(h),
            TransportHeader::Udp(_) => None,
        }
    }

    pub fn udp_header(&self) -> Option<&UdpHeader> {
        match &self.transport {
            TransportHeader::Udp(h) => Some(h),
            TransportHeader::Tcp(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Protocol, TcpFlags};
    use std::net::Ipv4Addr;

    fn ip() -> Ipv4Header {
        Ipv4Header {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            protocol: Protocol::Tcp,
            ttl: 64,
        }
    }

    #[test]
    fn wire_len_counts_headers_and_payload() {
        let header = TcpHeader {
            src_port: 1,
            dst_port: 2,
            seq: 0,
            ack: 0,
            flags: TcpFlags::ACK,
            window: 1024,
            mss: None,
            window_scale: None,
        };
        let pkt = Packet::new_tcp(ip(), header, Bytes::from_static(b"hello"));
        assert_eq!(pkt.wire_len(), 20 + 20 + 5);
    }

    #[test]
    fn clones_share_the_same_payload_allocation() {
        let header = TcpHeader {
            src_port: 1,
            dst_port: 2,
            seq: 0,
            ack: 0,
            flags: TcpFlags::SYN,
            window: 1024,
            mss: Some(1460),
            window_scale: Some(7),
        };
        let pkt = Packet::new_tcp(ip(), header, Bytes::from_static(b"x"));
        let clone = pkt.clone();
        assert_eq!(Arc::strong_count(&pkt), 2);
        assert_eq!(clone.payload, pkt.payload);
    }
}
