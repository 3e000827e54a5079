//! Connectionless datagram sockets (§4.7): no handshake, no ordering guarantee, no
//! retransmission — a bounded FIFO of whole datagrams per socket.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::epoll::EpollEvents;

const MAX_QUEUED_DATAGRAMS: usize = 1024;

#[derive(Debug)]
pub struct UdpSocket {
    local_addr: Option<(Ipv4Addr, u16)>,
    connected_peer: Option<(Ipv4Addr, u16)>,
    incoming: VecDeque<(Ipv4Addr, u16, Bytes)>,
}

impl UdpSocket {
    pub fn new() -> Self {
        Self {
            local_addr: None,
            connected_peer: None,
            incoming: VecDeque::new(),
        }
    }

    pub fn local_addr(&self) -> Option<(Ipv4Addr, u16)> {
        self.local_addr
    }

    pub fn bind(&mut self, addr: Ipv4Addr, port: u16) {
        self.local_addr = Some((addr, port));
    }

    pub fn connect(&mut self, addr: Ipv4Addr, port: u16) {
        self.connected_peer = Some((addr, port));
    }

    pub fn connected_peer(&self) -> Option<(Ipv4Addr, u16)> {
        self.connected_peer
    }

    /// A datagram arrived from the network; drop it silently once the queue is full, mirroring a
    /// kernel socket buffer overrun (no backpressure exists for UDP).
    pub fn deliver(&mut self, from_addr: Ipv4Addr, from_port: u16, payload: Bytes) {
        if self.incoming.len() >= MAX_QUEUED_DATAGRAMS {
            return;
        }
        self.incoming.push_back((from_addr, from_port, payload));
    }

    pub fn recv_from(&mut self) -> Option<(Ipv4Addr, u16, Bytes)> {
        self.incoming.pop_front()
    }

    pub fn readiness(&self) -> EpollEvents {
        let mut events = EpollEvents::WRITABLE; // sending never blocks in this model
        if !self.incoming.is_empty() {
            events |= EpollEvents::READABLE;
        }
        events
    }
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagrams_queue_in_arrival_order() {
        let mut sock = UdpSocket::new();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        sock.deliver(addr, 9000, Bytes::from_static(b"first"));
        sock.deliver(addr, 9000, Bytes::from_static(b"second"));
        assert_eq!(sock.recv_from().unwrap().2, Bytes::from_static(b"first"));
        assert_eq!(sock.recv_from().unwrap().2, Bytes::from_static(b"second"));
        assert!(sock.recv_from().is_none());
    }

    #[test]
    fn overflow_drops_rather_than_blocks() {
        let mut sock = UdpSocket::new();
        let addr = Ipv4Addr::new(10, 0, 0, 5);
        for _ in 0..MAX_QUEUED_DATAGRAMS + 10 {
            sock.deliver(addr, 1, Bytes::from_static(b"x"));
        }
        assert_eq!(sock.incoming.len(), MAX_QUEUED_DATAGRAMS);
    }
}
