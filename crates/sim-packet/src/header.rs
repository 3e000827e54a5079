use std::net::Ipv4Addr;

use bitflags::bitflags;

/// The transport protocol carried by an [`crate::Ipv4Header`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A trimmed IPv4 header: just the fields Shadow's routing and delivery path consults. No
/// options, no fragmentation (packets are delivered whole or dropped, never fragmented).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: Protocol,
    pub ttl: u8,
}

bitflags! {
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct TcpFlags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const PSH = 0b0000_1000;
        const ACK = 0b0001_0000;
        const URG = 0b0010_0000;
    }
}

/// A TCP segment header. `mss` and `window_scale` are only meaningful (and only ever `Some`) on
/// the `SYN` and `SYN+ACK` segments that negotiate them (§4.6).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
}

impl TcpHeader {
    pub fn has(&self, flag: TcpFlags) -> bool {
        self.flags.contains(flag)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}
