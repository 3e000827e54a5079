//! The socket-layer wrapper around a [`sim_tcp::Connection`]: adds addressing and, for a
//! listening socket, the backlog of in-progress and fully-established child connections waiting
//! on `accept()` (§4.5).

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use sim_tcp::{Connection, Dependencies, TcpState};

use crate::epoll::EpollEvents;

type Endpoint = (Ipv4Addr, u16);

/// A listening socket's backlog: connections that have a `SYN` but haven't finished the
/// handshake (`incomplete`), and connections that have finished and are waiting for the
/// application to call `accept()` (`ready`).
#[derive(Default)]
pub struct Listener {
    backlog: usize,
    incomplete: HashMap<Endpoint, Connection>,
    ready: VecDeque<(Endpoint, Connection)>,
}

impl Listener {
    fn new(backlog: usize) -> Self {
        Self {
            backlog: backlog.max(1),
            incomplete: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    pub fn has_room_for_new_attempt(&self) -> bool {
        self.incomplete.len() + self.ready.len() < self.backlog
    }

    pub fn insert_incomplete(&mut self, remote: Endpoint, conn: Connection) {
        self.incomplete.insert(remote, conn);
    }

    pub fn take_incomplete(&mut self, remote: &Endpoint) -> Option<Connection> {
        self.incomplete.remove(remote)
    }

    pub fn push_ready(&mut self, remote: Endpoint, conn: Connection) {
        self.ready.push_back((remote, conn));
    }

    pub fn pop_ready(&mut self) -> Option<(Endpoint, Connection)> {
        self.ready.pop_front()
    }
}

pub struct TcpSocket {
    conn: Connection,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
    listener: Option<Listener>,
}

impl TcpSocket {
    pub fn new_unconnected(mss: u16) -> Self {
        Self {
            conn: Connection::new_closed(mss),
            local: None,
            remote: None,
            listener: None,
        }
    }

    pub fn bind(&mut self, addr: Ipv4Addr, port: u16) {
        self.local = Some((addr, port));
    }

    pub fn local_addr(&self) -> Option<Endpoint> {
        self.local
    }

    pub fn remote_addr(&self) -> Option<Endpoint> {
        self.remote
    }

    pub fn listen(&mut self, backlog: usize) {
        self.listener = Some(Listener::new(backlog));
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn listener_mut(&mut self) -> Option<&mut Listener> {
        self.listener.as_mut()
    }

    pub fn connect(&mut self, deps: &mut impl Dependencies, remote: Endpoint) -> sim_tcp::OutgoingSegment {
        self.remote = Some(remote);
        self.conn.open(deps)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn state(&self) -> TcpState {
        self.conn.state()
    }

    pub fn cwnd_segments(&self) -> f64 {
        self.conn.cwnd_segments()
    }

    /// Build the child socket a fresh inbound connection attempt gets, already seeded in
    /// `Listen` state so the caller can immediately feed it the triggering `SYN`.
    pub fn new_child(local: Endpoint, remote: Endpoint, mss: u16) -> Self {
        Self {
            conn: Connection::listen(mss),
            local: Some(local),
            remote: Some(remote),
            listener: None,
        }
    }

    pub fn readiness(&self) -> EpollEvents {
        let mut events = EpollEvents::empty();
        if let Some(listener) = &self.listener {
            if !listener.ready.is_empty() {
                events |= EpollEvents::READABLE;
            }
            return events;
        }
        // Readable once there's data to drain, or once the peer's FIN has arrived and a `read()`
        // would report EOF (`CloseWait`/`Closing`/`LastAck`/`TimeWait` are only reached after the
        // peer has sent its FIN) — not merely because the connection is `Established`.
        if self.conn.readable_bytes() > 0
            || matches!(
                self.conn.state(),
                TcpState::CloseWait | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait
            )
        {
            events |= EpollEvents::READABLE;
        }
        if matches!(self.conn.state(), TcpState::Established | TcpState::CloseWait) {
            events |= EpollEvents::WRITABLE;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_new_listener_has_an_empty_backlog() {
        let mut sock = TcpSocket::new_unconnected(1460);
        sock.listen(4);
        assert!(sock.listener_mut().unwrap().has_room_for_new_attempt());
    }
}
