//! The virtual socket manager (§4.5): the per-host descriptor table and the POSIX-shaped API
//! surface an intercepted guest binary sees. Every operation here is synchronous; there is no
//! blocking syscall underneath, only `Errno::WouldBlock` and the epoll readiness table in
//! [`crate::epoll`] for the guest to poll.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use bytes::Bytes;
use sim_tcp::{Dependencies, IncomingSegment, OutgoingSegment, TcpState};

use crate::epoll::{Epoll, EpollEvents};
use crate::errno::Errno;
use crate::tcp_socket::TcpSocket;
use crate::udp_socket::UdpSocket;

/// A virtual socket descriptor. Always `>= MIN_DESCRIPTOR` so the interception layer can cheaply
/// tell a guest fd from one of the host OS's own descriptors (§4.5).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Descriptor(u32);

/// Chosen well above any descriptor the embedded runtime might itself have open.
pub const MIN_DESCRIPTOR: u32 = 1000;

/// Ceiling on consecutive retransmission timeouts for one connection before the socket layer
/// gives up and forces a reset (§7 "Retransmit timeout exceeded a configured maximum"). The state
/// machine itself (`sim-tcp`) has no opinion on this — it would resend forever — so the policy
/// lives here, one level up, the same way `sim_tcp::connection`'s doc comment expects.
pub const MAX_RETRANSMITS: u32 = 12;

impl Descriptor {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

type Endpoint = (Ipv4Addr, u16);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum Protocol {
    Tcp,
    Udp,
}

#[derive(Default, Debug, Clone, Copy)]
struct SocketOptions {
    non_blocking: bool,
    reuse_addr: bool,
    reuse_port: bool,
}

enum Socket {
    Tcp(TcpSocket),
    Udp(UdpSocket),
    /// An `epoll_create`d instance consumes a descriptor too, since the guest treats it as an fd.
    Epoll(Epoll),
}

/// A fully-addressed outgoing segment, ready for the caller (the host's packet-send path in
/// `sim-scheduler`) to wrap in a [`sim_packet::Packet`] and hand to the link model.
pub struct OutgoingTcp {
    pub local: Endpoint,
    pub remote: Endpoint,
    pub segment: OutgoingSegment,
}

pub struct OutgoingUdp {
    pub local: Endpoint,
    pub remote: Endpoint,
    pub payload: Bytes,
}

/// The per-host registry of virtual sockets (§4.5). Owns descriptor allocation, socket lifecycle,
/// and the readiness table epoll instances consult.
pub struct SocketManager {
    local_ip: Ipv4Addr,
    next_descriptor: u32,
    sockets: HashMap<Descriptor, Socket>,
    options: HashMap<Descriptor, SocketOptions>,
    bound_tcp: HashMap<Endpoint, Descriptor>,
    bound_udp: HashMap<Endpoint, Descriptor>,
    /// Demultiplexes arriving segments for a connecting or already-established socket by its full
    /// four-tuple, distinct from `bound_tcp` (which only ever names the *listening* socket for a
    /// given local endpoint, since many children share that same local address).
    connections: HashMap<(Endpoint, Endpoint), Descriptor>,
    next_ephemeral_port: u16,
    /// Consecutive retransmission timeouts per descriptor, reset to zero whenever a segment
    /// arrives for that connection (§7). Absence means zero, not "never retransmitted" — entries
    /// are dropped on `close`.
    retransmit_counts: HashMap<Descriptor, u32>,
}

impl SocketManager {
    pub fn new(local_ip: Ipv4Addr) -> Self {
        Self {
            local_ip,
            next_descriptor: MIN_DESCRIPTOR,
            sockets: HashMap::new(),
            options: HashMap::new(),
            bound_tcp: HashMap::new(),
            bound_udp: HashMap::new(),
            connections: HashMap::new(),
            next_ephemeral_port: 32768,
            retransmit_counts: HashMap::new(),
        }
    }

    fn allocate(&mut self, socket: Socket) -> Descriptor {
        let fd = Descriptor(self.next_descriptor);
        self.next_descriptor += 1;
        self.sockets.insert(fd, socket);
        self.options.insert(fd, SocketOptions::default());
        fd
    }

    fn ephemeral_port(&mut self) -> u16 {
        let port = self.next_ephemeral_port;
        self.next_ephemeral_port = self.next_ephemeral_port.wrapping_add(1).max(32768);
        port
    }

    pub fn socket_tcp(&mut self) -> Descriptor {
        self.allocate(Socket::Tcp(TcpSocket::new_unconnected(sim_tcp::MSS)))
    }

    pub fn socket_udp(&mut self) -> Descriptor {
        self.allocate(Socket::Udp(UdpSocket::new()))
    }

    /// `socketpair()`: two TCP-backed endpoints wired directly to each other, bypassing the
    /// network entirely. Used by guest code for self-pipe tricks (§4.5).
    pub fn socketpair(&mut self) -> (Descriptor, Descriptor) {
        let a_port = self.ephemeral_port();
        let b_port = self.ephemeral_port();
        let a_addr = (self.local_ip, a_port);
        let b_addr = (self.local_ip, b_port);

        let mut a = TcpSocket::new_child(a_addr, b_addr, sim_tcp::MSS);
        let mut b = TcpSocket::new_child(b_addr, a_addr, sim_tcp::MSS);
        // Short-circuit straight to ESTABLISHED; there's no wire between a loopback pair.
        a.conn_mut().force_established();
        b.conn_mut().force_established();

        let fd_a = self.allocate(Socket::Tcp(a));
        let fd_b = self.allocate(Socket::Tcp(b));
        (fd_a, fd_b)
    }

    fn tcp_mut(&mut self, fd: Descriptor) -> Result<&mut TcpSocket, Errno> {
        match self.sockets.get_mut(&fd) {
            Some(Socket::Tcp(s)) => Ok(s),
            Some(_) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    fn udp_mut(&mut self, fd: Descriptor) -> Result<&mut UdpSocket, Errno> {
        match self.sockets.get_mut(&fd) {
            Some(Socket::Udp(s)) => Ok(s),
            Some(_) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    fn protocol_of(&self, fd: Descriptor) -> Result<Protocol, Errno> {
        match self.sockets.get(&fd) {
            Some(Socket::Tcp(_)) => Ok(Protocol::Tcp),
            Some(Socket::Udp(_)) => Ok(Protocol::Udp),
            Some(Socket::Epoll(_)) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    pub fn bind(&mut self, fd: Descriptor, port: u16) -> Result<(), Errno> {
        let addr = self.local_ip;
        match self.protocol_of(fd)? {
            Protocol::Tcp => {
                let reuse = self.options.get(&fd).map(|o| o.reuse_addr || o.reuse_port).unwrap_or(false);
                if self.bound_tcp.contains_key(&(addr, port)) && !reuse {
                    return Err(Errno::AddrInUse);
                }
                self.tcp_mut(fd)?.bind(addr, port);
                self.bound_tcp.insert((addr, port), fd);
            }
            Protocol::Udp => {
                let reuse = self.options.get(&fd).map(|o| o.reuse_addr || o.reuse_port).unwrap_or(false);
                if self.bound_udp.contains_key(&(addr, port)) && !reuse {
                    return Err(Errno::AddrInUse);
                }
                self.udp_mut(fd)?.bind(addr, port);
                self.bound_udp.insert((addr, port), fd);
            }
        }
        Ok(())
    }

    pub fn listen(&mut self, fd: Descriptor, backlog: usize) -> Result<(), Errno> {
        let sock = self.tcp_mut(fd)?;
        if sock.local_addr().is_none() {
            return Err(Errno::InvalidArgument);
        }
        sock.listen(backlog);
        Ok(())
    }

    /// `connect()`: begins an active open, always routing the `SYN` segment onto the wire. A
    /// non-blocking socket's guest-visible result is `Some(Errno::InProgress)` (§4.5); the caller
    /// learns of completion via `Event::ConnectionEstablished` once the handshake's `SYN`/`SYN-ACK`
    /// round trip plays out (§4.6), the same as a real non-blocking `connect()` returning
    /// `EINPROGRESS` while the kernel carries on with the handshake underneath it. A blocking
    /// socket's guest-visible result is `None` — this design has no way to suspend the caller until
    /// the handshake completes (§7 "blocking semantics are not supported"), so a blocking `connect`
    /// call returns having merely started the attempt.
    pub fn connect(
        &mut self,
        fd: Descriptor,
        deps: &mut impl Dependencies,
        remote: Endpoint,
    ) -> Result<(OutgoingTcp, Option<Errno>), Errno> {
        let non_blocking = self.options.get(&fd).map(|o| o.non_blocking).unwrap_or(false);
        let local_port = {
            let sock = self.tcp_mut(fd)?;
            if sock.remote_addr().is_some() {
                return Err(Errno::IsConnected);
            }
            if sock.local_addr().is_none() {
                let port = self.next_ephemeral_port;
                self.next_ephemeral_port = self.next_ephemeral_port.wrapping_add(1).max(32768);
                sock.bind(self.local_ip, port);
                port
            } else {
                sock.local_addr().unwrap().1
            }
        };
        let local = (self.local_ip, local_port);
        self.bound_tcp.insert(local, fd);
        self.connections.insert((local, remote), fd);
        let sock = self.tcp_mut(fd)?;
        let segment = sock.connect(deps, remote);
        let outgoing = OutgoingTcp { local, remote, segment };
        let status = non_blocking.then_some(Errno::InProgress);
        Ok((outgoing, status))
    }

    /// `accept()`: pop a fully-established connection off a listening socket's backlog.
    pub fn accept(&mut self, fd: Descriptor) -> Result<Descriptor, Errno> {
        let (local, remote, conn) = {
            let sock = self.tcp_mut(fd)?;
            let local = sock.local_addr().ok_or(Errno::InvalidArgument)?;
            let listener = sock.listener_mut().ok_or(Errno::InvalidArgument)?;
            let (remote, conn) = listener.pop_ready().ok_or(Errno::WouldBlock)?;
            (local, remote, conn)
        };
        let mut child = TcpSocket::new_child(local, remote, sim_tcp::MSS);
        *child.conn_mut() = conn;
        let child_fd = self.allocate(Socket::Tcp(child));
        self.connections.insert((local, remote), child_fd);
        Ok(child_fd)
    }

    pub fn send(&mut self, fd: Descriptor, deps: &mut impl Dependencies, data: Bytes) -> Result<Vec<OutgoingTcp>, Errno> {
        let non_blocking = self.options.get(&fd).map(|o| o.non_blocking).unwrap_or(false);
        let (local, remote, n, segments) = {
            let sock = self.tcp_mut(fd)?;
            if sock.state() == TcpState::Closed && sock.conn().is_reset() {
                return Err(Errno::ConnReset);
            }
            if matches!(sock.state(), TcpState::FinWait1 | TcpState::FinWait2 | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait) {
                return Err(Errno::Pipe);
            }
            let local = sock.local_addr().ok_or(Errno::NotConnected)?;
            let remote = sock.remote_addr().ok_or(Errno::NotConnected)?;
            let n = sock.conn_mut().write(data);
            let segments = sock.conn_mut().send_ready_segments(deps);
            (local, remote, n, segments)
        };
        if n == 0 && non_blocking {
            return Err(Errno::WouldBlock);
        }
        Ok(segments
            .into_iter()
            .map(|segment| OutgoingTcp { local, remote, segment })
            .collect())
    }

    pub fn recv(&mut self, fd: Descriptor, max: usize) -> Result<Bytes, Errno> {
        let non_blocking = self.options.get(&fd).map(|o| o.non_blocking).unwrap_or(false);
        let sock = self.tcp_mut(fd)?;
        if sock.conn().is_reset() {
            return Err(Errno::ConnReset);
        }
        let peer_closed = matches!(
            sock.state(),
            TcpState::CloseWait | TcpState::Closing | TcpState::LastAck | TcpState::TimeWait
        );
        let data = sock.conn_mut().read(max);
        if data.is_empty() && non_blocking && !peer_closed {
            return Err(Errno::WouldBlock);
        }
        Ok(data)
    }

    pub fn sendto(&mut self, fd: Descriptor, dst: Endpoint, data: Bytes) -> Result<OutgoingUdp, Errno> {
        let local_port = {
            let sock = self.udp_mut(fd)?;
            if sock.local_addr().is_none() {
                let port = self.ephemeral_port();
                sock.bind(self.local_ip, port);
            }
            sock.local_addr().unwrap().1
        };
        self.bound_udp.insert((self.local_ip, local_port), fd);
        Ok(OutgoingUdp {
            local: (self.local_ip, local_port),
            remote: dst,
            payload: data,
        })
    }

    pub fn recvfrom(&mut self, fd: Descriptor) -> Result<(Ipv4Addr, u16, Bytes), Errno> {
        let sock = self.udp_mut(fd)?;
        sock.recv_from().ok_or(Errno::WouldBlock)
    }

    pub fn shutdown_write(&mut self, fd: Descriptor, deps: &mut impl Dependencies) -> Result<Vec<OutgoingTcp>, Errno> {
        let (local, remote, segments) = {
            let sock = self.tcp_mut(fd)?;
            let local = sock.local_addr().ok_or(Errno::NotConnected)?;
            let remote = sock.remote_addr().ok_or(Errno::NotConnected)?;
            let segments = sock.conn_mut().close(deps);
            (local, remote, segments)
        };
        Ok(segments
            .into_iter()
            .map(|segment| OutgoingTcp { local, remote, segment })
            .collect())
    }

    /// `close()`: releases the descriptor and its connection state immediately, with no further
    /// FIN/ACK exchange. A caller that wants a graceful close — draining buffered data and letting
    /// the peer see an orderly `FIN` — calls [`Self::shutdown_write`] first and only `close`s once
    /// that side of the connection has reached `Closed`, the same way an application calls
    /// `shutdown(SHUT_WR)` before `close()` for a clean TCP teardown.
    pub fn close(&mut self, fd: Descriptor) -> Result<(), Errno> {
        if !self.sockets.contains_key(&fd) {
            return Err(Errno::BadFd);
        }
        let freed = self.sockets.remove(&fd).unwrap();
        self.options.remove(&fd);
        self.retransmit_counts.remove(&fd);
        if let Socket::Tcp(sock) = &freed {
            if let Some(local) = sock.local_addr() {
                if self.bound_tcp.get(&local) == Some(&fd) {
                    self.bound_tcp.remove(&local);
                }
            }
            if let (Some(local), Some(remote)) = (sock.local_addr(), sock.remote_addr()) {
                if self.connections.get(&(local, remote)) == Some(&fd) {
                    self.connections.remove(&(local, remote));
                }
            }
        }
        if let Socket::Udp(sock) = &freed {
            if let Some(local) = sock.local_addr() {
                if self.bound_udp.get(&local) == Some(&fd) {
                    self.bound_udp.remove(&local);
                }
            }
        }
        Ok(())
    }

    pub fn getsockname(&self, fd: Descriptor) -> Result<Endpoint, Errno> {
        match self.sockets.get(&fd) {
            Some(Socket::Tcp(s)) => s.local_addr().ok_or(Errno::InvalidArgument),
            Some(Socket::Udp(s)) => s.local_addr().ok_or(Errno::InvalidArgument),
            Some(Socket::Epoll(_)) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    pub fn getpeername(&self, fd: Descriptor) -> Result<Endpoint, Errno> {
        match self.sockets.get(&fd) {
            Some(Socket::Tcp(s)) => s.remote_addr().ok_or(Errno::NotConnected),
            Some(Socket::Udp(s)) => s.connected_peer().ok_or(Errno::NotConnected),
            Some(Socket::Epoll(_)) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    pub fn set_non_blocking(&mut self, fd: Descriptor, value: bool) -> Result<(), Errno> {
        self.options.get_mut(&fd).ok_or(Errno::BadFd)?.non_blocking = value;
        Ok(())
    }

    pub fn set_reuse_addr(&mut self, fd: Descriptor, value: bool) -> Result<(), Errno> {
        self.options.get_mut(&fd).ok_or(Errno::BadFd)?.reuse_addr = value;
        Ok(())
    }

    pub fn set_reuse_port(&mut self, fd: Descriptor, value: bool) -> Result<(), Errno> {
        self.options.get_mut(&fd).ok_or(Errno::BadFd)?.reuse_port = value;
        Ok(())
    }

    pub fn is_non_blocking(&self, fd: Descriptor) -> Result<bool, Errno> {
        Ok(self.options.get(&fd).ok_or(Errno::BadFd)?.non_blocking)
    }

    pub fn epoll_create(&mut self) -> Descriptor {
        self.allocate(Socket::Epoll(Epoll::new()))
    }

    pub fn epoll_ctl_add(&mut self, epfd: Descriptor, watched: Descriptor, interest: EpollEvents) -> Result<(), Errno> {
        match self.sockets.get_mut(&epfd) {
            Some(Socket::Epoll(e)) => {
                e.set_interest(watched, interest);
                Ok(())
            }
            Some(_) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    pub fn epoll_ctl_del(&mut self, epfd: Descriptor, watched: Descriptor) -> Result<(), Errno> {
        match self.sockets.get_mut(&epfd) {
            Some(Socket::Epoll(e)) => {
                e.remove_interest(watched);
                Ok(())
            }
            Some(_) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    /// `epoll_wait()`: synchronous, returns the newly-risen edge-triggered ready set (§4.12 — no
    /// real blocking syscall underneath).
    pub fn epoll_wait(&mut self, epfd: Descriptor) -> Result<Vec<(Descriptor, EpollEvents)>, Errno> {
        let readiness = self.readiness_table();
        match self.sockets.get_mut(&epfd) {
            Some(Socket::Epoll(e)) => Ok(e.poll(&readiness)),
            Some(_) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    fn readiness_table(&self) -> HashMap<Descriptor, EpollEvents> {
        self.sockets
            .iter()
            .filter_map(|(&fd, sock)| match sock {
                Socket::Tcp(s) => Some((fd, s.readiness())),
                Socket::Udp(s) => Some((fd, s.readiness())),
                Socket::Epoll(_) => None,
            })
            .collect()
    }

    /// Look up the descriptor, if any, already demultiplexing this four-tuple. Lets a caller that
    /// needs to tag timer events with a concrete descriptor (`sim-scheduler`'s `TimerDeps`) find
    /// it before calling [`Self::deliver_tcp`], which would otherwise resolve it internally and
    /// too late for the caller to know in advance.
    pub fn descriptor_for(&self, local: Endpoint, remote: Endpoint) -> Option<Descriptor> {
        self.connections.get(&(local, remote)).copied()
    }

    /// Deliver an arriving TCP segment. Routes to an established connection, or to a listening
    /// socket's handshake path when none is found and the listener's local endpoint matches. The
    /// `deps` parameter threads timer scheduling down into whichever `Connection` ends up handling
    /// the segment (§4.6).
    pub fn deliver_tcp(
        &mut self,
        deps: &mut impl Dependencies,
        local: Endpoint,
        remote: Endpoint,
        seg: IncomingSegment,
    ) -> (Vec<OutgoingTcp>, Vec<sim_tcp::Event>) {
        if let Some(&fd) = self.connections.get(&(local, remote)) {
            if let Some(Socket::Tcp(sock)) = self.sockets.get_mut(&fd) {
                // Any segment from the peer is evidence the path is alive; forgive past timeouts.
                self.retransmit_counts.remove(&fd);
                let (out, events) = sock.conn_mut().on_segment(deps, seg);
                let segments = out
                    .into_iter()
                    .map(|segment| OutgoingTcp { local, remote, segment })
                    .collect();
                return (segments, events);
            }
        }
        self.deliver_to_listener(deps, local, remote, seg)
    }

    fn deliver_to_listener(
        &mut self,
        deps: &mut impl Dependencies,
        local: Endpoint,
        remote: Endpoint,
        seg: IncomingSegment,
    ) -> (Vec<OutgoingTcp>, Vec<sim_tcp::Event>) {
        let Some(&fd) = self.bound_tcp.get(&local) else {
            return (Vec::new(), Vec::new());
        };
        let Some(Socket::Tcp(sock)) = self.sockets.get_mut(&fd) else {
            return (Vec::new(), Vec::new());
        };
        let Some(listener) = sock.listener_mut() else {
            return (Vec::new(), Vec::new());
        };

        let is_syn_only = seg.flags.contains(sim_packet::TcpFlags::SYN) && !seg.flags.contains(sim_packet::TcpFlags::ACK);
        if is_syn_only {
            if !listener.has_room_for_new_attempt() {
                return (Vec::new(), Vec::new());
            }
            let mut conn = sim_tcp::Connection::listen(sim_tcp::MSS);
            let (out, events) = conn.on_segment(deps, seg);
            listener.insert_incomplete(remote, conn);
            let segments = out
                .into_iter()
                .map(|segment| OutgoingTcp { local, remote, segment })
                .collect();
            return (segments, events);
        }

        if let Some(mut conn) = listener.take_incomplete(&remote) {
            let (out, events) = conn.on_segment(deps, seg);
            if conn.state() == TcpState::Established {
                listener.push_ready(remote, conn);
            } else {
                listener.insert_incomplete(remote, conn);
            }
            let segments = out
                .into_iter()
                .map(|segment| OutgoingTcp { local, remote, segment })
                .collect();
            return (segments, events);
        }

        (Vec::new(), Vec::new())
    }

    /// Deliver an arriving datagram, returning the descriptor it landed on (if any bound socket
    /// matched) so the caller can wake anything watching that descriptor.
    pub fn deliver_udp(&mut self, local: Endpoint, remote: Endpoint, payload: Bytes) -> Option<Descriptor> {
        let fd = *self.bound_udp.get(&local)?;
        if let Some(Socket::Udp(sock)) = self.sockets.get_mut(&fd) {
            sock.deliver(remote.0, remote.1, payload);
        }
        Some(fd)
    }

    /// Route the delayed-ACK/retransmission/TIME-WAIT timer callbacks a `sim-scheduler` `Event`
    /// dispatch invokes, keyed by descriptor.
    pub fn on_delayed_ack_timer(&mut self, fd: Descriptor) -> Result<OutgoingTcp, Errno> {
        let sock = self.tcp_mut(fd)?;
        let local = sock.local_addr().ok_or(Errno::InvalidArgument)?;
        let remote = sock.remote_addr().ok_or(Errno::InvalidArgument)?;
        let segment = sock.conn_mut().on_delayed_ack_timer();
        Ok(OutgoingTcp { local, remote, segment })
    }

    /// Fires on a connection's retransmission timer. Past [`MAX_RETRANSMITS`] consecutive
    /// timeouts with no intervening segment from the peer, gives up and forces a reset instead of
    /// resending again (§7) — the returned event carries that outcome since a forced reset has no
    /// segment to send.
    pub fn on_retransmission_timer(
        &mut self,
        fd: Descriptor,
        deps: &mut impl Dependencies,
    ) -> Result<(Option<OutgoingTcp>, Option<sim_tcp::Event>), Errno> {
        let count = self.retransmit_counts.entry(fd).or_insert(0);
        *count += 1;
        if *count > MAX_RETRANSMITS {
            self.retransmit_counts.remove(&fd);
            let sock = self.tcp_mut(fd)?;
            let event = sock.conn_mut().force_reset(deps);
            return Ok((None, Some(event)));
        }
        let sock = self.tcp_mut(fd)?;
        let local = sock.local_addr().ok_or(Errno::InvalidArgument)?;
        let remote = sock.remote_addr().ok_or(Errno::InvalidArgument)?;
        let outgoing = sock
            .conn_mut()
            .on_retransmission_timer(deps)
            .map(|segment| OutgoingTcp { local, remote, segment });
        Ok((outgoing, None))
    }

    pub fn on_time_wait_timer(&mut self, fd: Descriptor) -> Result<sim_tcp::Event, Errno> {
        Ok(self.tcp_mut(fd)?.conn_mut().on_time_wait_timer())
    }

    pub fn state(&self, fd: Descriptor) -> Result<TcpState, Errno> {
        match self.sockets.get(&fd) {
            Some(Socket::Tcp(t)) => Ok(t.state()),
            Some(_) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }

    pub fn cwnd_segments(&self, fd: Descriptor) -> Result<f64, Errno> {
        match self.sockets.get(&fd) {
            Some(Socket::Tcp(t)) => Ok(t.cwnd_segments()),
            Some(_) => Err(Errno::InvalidArgument),
            None => Err(Errno::BadFd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeClock {
        now: Cell<sim_time::SimulationTime>,
    }

    impl Dependencies for FakeClock {
        fn now(&self) -> sim_time::SimulationTime {
            self.now.get()
        }
        fn arm_timer(&mut self, _kind: sim_tcp::TimerKind, _after: sim_time::SimulationTime) {}
        fn cancel_timer(&mut self, _kind: sim_tcp::TimerKind) {}
    }

    fn clock() -> FakeClock {
        FakeClock { now: Cell::new(sim_time::SimulationTime::ZERO) }
    }

    #[test]
    fn double_bind_without_reuse_fails_with_addrinuse() {
        let mut mgr = SocketManager::new(Ipv4Addr::new(10, 0, 0, 1));
        let a = mgr.socket_tcp();
        let b = mgr.socket_tcp();
        mgr.bind(a, 9000).unwrap();
        assert!(matches!(mgr.bind(b, 9000), Err(Errno::AddrInUse)));
    }

    #[test]
    fn operations_on_a_closed_descriptor_fail_with_badf() {
        let mut mgr = SocketManager::new(Ipv4Addr::new(10, 0, 0, 1));
        let fd = mgr.socket_tcp();
        mgr.close(fd).unwrap();
        assert!(matches!(mgr.close(fd), Err(Errno::BadFd)));
        assert!(matches!(mgr.listen(fd, 1), Err(Errno::BadFd)));
    }

    #[test]
    fn send_before_connect_is_invalid() {
        let mut mgr = SocketManager::new(Ipv4Addr::new(10, 0, 0, 1));
        let fd = mgr.socket_tcp();
        let mut deps = clock();
        assert!(matches!(mgr.send(fd, &mut deps, Bytes::from_static(b"x")), Err(Errno::NotConnected)));
    }

    #[test]
    fn socketpair_sockets_start_established() {
        let mut mgr = SocketManager::new(Ipv4Addr::new(10, 0, 0, 1));
        let (a, b) = mgr.socketpair();
        assert_eq!(mgr.state(a).unwrap(), TcpState::Established);
        assert_eq!(mgr.state(b).unwrap(), TcpState::Established);
    }

    /// Hands one side's outgoing segment to the other side's manager, as the addresses read from
    /// the receiver's end of the wire (local/remote swapped from the sender's).
    fn deliver(
        mgr: &mut SocketManager,
        deps: &mut impl Dependencies,
        out: &OutgoingTcp,
    ) -> (Vec<OutgoingTcp>, Vec<sim_tcp::Event>) {
        mgr.deliver_tcp(
            deps,
            out.remote,
            out.local,
            IncomingSegment {
                seq: out.segment.seq,
                ack: out.segment.ack,
                flags: out.segment.flags,
                window: out.segment.window,
                payload: out.segment.payload.clone(),
                mss: out.segment.mss,
                window_scale: out.segment.window_scale,
            },
        )
    }

    fn connected_pair() -> (SocketManager, Descriptor, SocketManager, Descriptor, FakeClock) {
        let mut mgr_a = SocketManager::new(Ipv4Addr::new(10, 0, 0, 1));
        let mut mgr_b = SocketManager::new(Ipv4Addr::new(10, 0, 0, 2));
        let mut deps = clock();

        let a = mgr_a.socket_tcp();
        let b = mgr_b.socket_tcp();
        mgr_b.bind(b, 9000).unwrap();
        mgr_b.listen(b, 1).unwrap();

        let (syn, status) = mgr_a.connect(a, &mut deps, (Ipv4Addr::new(10, 0, 0, 2), 9000)).unwrap();
        assert_eq!(status, None);
        let (syn_ack, _) = deliver(&mut mgr_b, &mut deps, &syn);
        let (ack, _) = deliver(&mut mgr_a, &mut deps, &syn_ack[0]);
        assert!(deliver(&mut mgr_b, &mut deps, &ack[0]).0.is_empty());

        assert_eq!(mgr_a.state(a).unwrap(), TcpState::Established);
        let child = mgr_b.accept(b).unwrap();
        assert_eq!(mgr_b.state(child).unwrap(), TcpState::Established);

        (mgr_a, a, mgr_b, child, deps)
    }

    /// §4.5 "connect on non-blocking socket → INPROGRESS initially, then completes asynchronously
    /// via SYN/SYN-ACK": the call itself reports `InProgress` while still handing back the `SYN`
    /// to route, and the handshake completes the same way a blocking socket's would once the
    /// `SYN-ACK`/`ACK` round trip plays out.
    #[test]
    fn non_blocking_connect_reports_in_progress_but_still_sends_the_syn() {
        let mut mgr_a = SocketManager::new(Ipv4Addr::new(10, 0, 0, 1));
        let mut mgr_b = SocketManager::new(Ipv4Addr::new(10, 0, 0, 2));
        let mut deps = clock();

        let a = mgr_a.socket_tcp();
        let b = mgr_b.socket_tcp();
        mgr_b.bind(b, 9000).unwrap();
        mgr_b.listen(b, 1).unwrap();
        mgr_a.set_non_blocking(a, true).unwrap();

        let (syn, status) = mgr_a.connect(a, &mut deps, (Ipv4Addr::new(10, 0, 0, 2), 9000)).unwrap();
        assert_eq!(status, Some(Errno::InProgress));
        assert_eq!(mgr_a.state(a).unwrap(), TcpState::SynSent);

        let (syn_ack, _) = deliver(&mut mgr_b, &mut deps, &syn);
        let (_, events) = deliver(&mut mgr_a, &mut deps, &syn_ack[0]);
        assert!(events.contains(&sim_tcp::Event::ConnectionEstablished));
        assert_eq!(mgr_a.state(a).unwrap(), TcpState::Established);
    }

    /// §8 Scenario A: a direct two-host "HELLO" exchange where both ends close gracefully and
    /// both reach `Closed` — the active closer needs its own `on_time_wait_timer` fired once the
    /// final ACK is in, matching how `sim-scheduler` would drive it off the real TIME_WAIT timer.
    #[test]
    fn scenario_a_hello_exchange_ends_with_both_sides_closed() {
        let (mut mgr_a, a, mut mgr_b, child, mut deps) = connected_pair();

        let data = mgr_a.send(a, &mut deps, Bytes::from_static(b"HELLO")).unwrap();
        let mut data_ack = Vec::new();
        for seg in &data {
            let (resp, _) = deliver(&mut mgr_b, &mut deps, seg);
            data_ack.extend(resp);
        }
        assert_eq!(mgr_b.recv(child, 16).unwrap().as_ref(), b"HELLO");
        for seg in &data_ack {
            deliver(&mut mgr_a, &mut deps, seg);
        }

        let fin_a = mgr_a.shutdown_write(a, &mut deps).unwrap();
        assert_eq!(mgr_a.state(a).unwrap(), TcpState::FinWait1);
        let mut ack_of_fin_a = Vec::new();
        for seg in &fin_a {
            let (resp, events) = deliver(&mut mgr_b, &mut deps, seg);
            assert!(events.contains(&sim_tcp::Event::PeerClosedWriting));
            ack_of_fin_a.extend(resp);
        }
        assert_eq!(mgr_b.state(child).unwrap(), TcpState::CloseWait);
        for seg in &ack_of_fin_a {
            deliver(&mut mgr_a, &mut deps, seg);
        }
        assert_eq!(mgr_a.state(a).unwrap(), TcpState::FinWait2);

        let fin_b = mgr_b.shutdown_write(child, &mut deps).unwrap();
        assert_eq!(mgr_b.state(child).unwrap(), TcpState::LastAck);
        let mut ack_of_fin_b = Vec::new();
        for seg in &fin_b {
            let (resp, _) = deliver(&mut mgr_a, &mut deps, seg);
            ack_of_fin_b.extend(resp);
        }
        assert_eq!(mgr_a.state(a).unwrap(), TcpState::TimeWait);
        for seg in &ack_of_fin_b {
            deliver(&mut mgr_b, &mut deps, seg);
        }
        assert_eq!(mgr_b.state(child).unwrap(), TcpState::Closed);

        mgr_a.on_time_wait_timer(a).unwrap();
        assert_eq!(mgr_a.state(a).unwrap(), TcpState::Closed);
    }

    /// §8 Scenario B: a dropped data segment forces a retransmission-timeout, which must collapse
    /// the congestion window back to slow start (the fast-recovery path is exercised separately in
    /// `sim_tcp::congestion`'s own tests) before the retransmit gets through and the transfer
    /// completes.
    #[test]
    fn scenario_b_retransmission_after_loss_shrinks_the_congestion_window() {
        let (mut mgr_a, a, mut mgr_b, child, mut deps) = connected_pair();

        for _ in 0..2 {
            let segs = mgr_a.send(a, &mut deps, Bytes::from_static(b"warm")).unwrap();
            let mut acks = Vec::new();
            for seg in &segs {
                let (resp, _) = deliver(&mut mgr_b, &mut deps, seg);
                acks.extend(resp);
            }
            for seg in &acks {
                deliver(&mut mgr_a, &mut deps, seg);
            }
            mgr_b.recv(child, 16).unwrap();
        }
        let cwnd_before = mgr_a.cwnd_segments(a).unwrap();
        assert!(cwnd_before > 1.0);

        let payload = Bytes::from(vec![0u8; 10 * 1024]);
        let segments = mgr_a.send(a, &mut deps, payload).unwrap();
        assert!(!segments.is_empty());
        // None of `segments` is relayed to mgr_b: simulated packet loss.

        let (resent, forced_reset) = mgr_a.on_retransmission_timer(a, &mut deps).unwrap();
        assert!(forced_reset.is_none());
        let cwnd_after = mgr_a.cwnd_segments(a).unwrap();
        assert!(cwnd_after < cwnd_before);

        let resent = resent.expect("the oldest unacked segment should be resent");
        let (acks, _) = deliver(&mut mgr_b, &mut deps, &resent);
        for seg in &acks {
            deliver(&mut mgr_a, &mut deps, seg);
        }
        assert!(!mgr_b.recv(child, 10 * 1024 + 1).unwrap().is_empty());
    }

    /// §8 Scenario D: `epoll_wait` on a listening socket reports the new-connection edge exactly
    /// once, even though the listener stays "ready" (backlog non-empty) until `accept()` drains it.
    #[test]
    fn scenario_d_edge_triggered_epoll_reports_listener_readiness_once() {
        let mut mgr_b = SocketManager::new(Ipv4Addr::new(10, 0, 0, 2));
        let mut mgr_a = SocketManager::new(Ipv4Addr::new(10, 0, 0, 1));
        let mut deps = clock();

        let b = mgr_b.socket_tcp();
        mgr_b.bind(b, 9000).unwrap();
        mgr_b.listen(b, 4).unwrap();
        let epfd = mgr_b.epoll_create();
        mgr_b.epoll_ctl_add(epfd, b, EpollEvents::READABLE).unwrap();
        assert!(mgr_b.epoll_wait(epfd).unwrap().is_empty());

        let a = mgr_a.socket_tcp();
        let (syn, status) = mgr_a.connect(a, &mut deps, (Ipv4Addr::new(10, 0, 0, 2), 9000)).unwrap();
        assert_eq!(status, None);
        let (syn_ack, _) = deliver(&mut mgr_b, &mut deps, &syn);
        let (ack, _) = deliver(&mut mgr_a, &mut deps, &syn_ack[0]);
        deliver(&mut mgr_b, &mut deps, &ack[0]);

        let ready = mgr_b.epoll_wait(epfd).unwrap();
        assert_eq!(ready, vec![(b, EpollEvents::READABLE)]);
        // Backlog is still non-empty, but the edge was already reported: no repeat.
        assert!(mgr_b.epoll_wait(epfd).unwrap().is_empty());

        mgr_b.accept(b).unwrap();
        assert!(mgr_b.epoll_wait(epfd).unwrap().is_empty());
    }
}
