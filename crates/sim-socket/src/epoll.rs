//! Epoll virtualization (§4.12): a synchronous readiness table. There is no real blocking
//! syscall underneath — `epoll_wait` just reads the current readiness bitmap, which the socket
//! manager updates in lockstep with every TCP/UDP state transition that could change it.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::manager::Descriptor;

bitflags! {
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct EpollEvents: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EpollHandle(u32);

/// One `epoll_create`d instance: a set of watched descriptors, each with its own interest mask,
/// plus the manager-maintained current readiness for every open descriptor on the host.
///
/// Edge-triggered only (§4.12, §8 Scenario D: "epoll_wait (edge-triggered, EPOLLIN) returns
/// exactly once"): `last_reported` remembers which bits this instance has already surfaced for a
/// descriptor, so a subsequent `poll()` only reports a bit again once it has dropped out of
/// readiness and come back — never merely because the fd is still ready from last time.
#[derive(Debug, Default)]
pub struct Epoll {
    interest: HashMap<Descriptor, EpollEvents>,
    last_reported: HashMap<Descriptor, EpollEvents>,
}

impl Epoll {
    pub fn new() -> Self {
        Self::default()
    }

    /// `epoll_ctl(EPOLL_CTL_ADD/MOD, fd, events)`.
    pub fn set_interest(&mut self, fd: Descriptor, events: EpollEvents) {
        self.interest.insert(fd, events);
        // A fresh ADD/MOD re-arms the edge: the next poll should report anything already ready,
        // matching real epoll's behavior of delivering an initial edge on registration.
        self.last_reported.remove(&fd);
    }

    /// `epoll_ctl(EPOLL_CTL_DEL, fd)`.
    pub fn remove_interest(&mut self, fd: Descriptor) {
        self.interest.remove(&fd);
        self.last_reported.remove(&fd);
    }

    /// `epoll_wait`: given the manager's current per-descriptor readiness, return only the
    /// newly-risen edge for each watched descriptor — bits that are ready now and interested, but
    /// were not already reported as ready last time this instance was polled.
    pub fn poll(&mut self, readiness: &HashMap<Descriptor, EpollEvents>) -> Vec<(Descriptor, EpollEvents)> {
        let mut ready = Vec::new();
        for (&fd, &interest) in &self.interest {
            let current = readiness.get(&fd).copied().unwrap_or_default();
            let previously = self.last_reported.get(&fd).copied().unwrap_or_default();
            let rising_edge = current & interest & !previously;
            if !rising_edge.is_empty() {
                ready.push((fd, rising_edge));
            }
            self.last_reported.insert(fd, current & interest);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Descriptor;

    #[test]
    fn only_descriptors_with_intersecting_readiness_are_returned() {
        let mut epoll = Epoll::new();
        let a = Descriptor::new(3);
        let b = Descriptor::new(4);
        epoll.set_interest(a, EpollEvents::READABLE);
        epoll.set_interest(b, EpollEvents::WRITABLE);

        let mut readiness = HashMap::new();
        readiness.insert(a, EpollEvents::READABLE);
        readiness.insert(b, EpollEvents::READABLE);

        let ready = epoll.poll(&readiness);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, a);
    }

    #[test]
    fn edge_triggered_readiness_is_reported_only_once() {
        let mut epoll = Epoll::new();
        let fd = Descriptor::new(3);
        epoll.set_interest(fd, EpollEvents::READABLE);

        let mut readiness = HashMap::new();
        readiness.insert(fd, EpollEvents::READABLE);

        assert_eq!(epoll.poll(&readiness).len(), 1);
        // Still ready, but already reported: a second poll with no state change sees nothing.
        assert_eq!(epoll.poll(&readiness).len(), 0);

        readiness.insert(fd, EpollEvents::empty());
        assert_eq!(epoll.poll(&readiness).len(), 0);

        readiness.insert(fd, EpollEvents::READABLE);
        assert_eq!(epoll.poll(&readiness).len(), 1);
    }
}
