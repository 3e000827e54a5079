//! Bridges a plugin's kernel-service calls (§4.11: log, name resolution, "my hostname/IP",
//! deferred callbacks) into the engine while that plugin's instance is switched in for one host.
//! Constructed fresh around each call into the plugin's vtable; it never outlives that call.

use std::ffi::c_void;
use std::net::Ipv4Addr;

use sim_net::{Dns, HostId};
use sim_plugin::HostServices;
use sim_time::SimulationTime;

use crate::event::EventPayload;
use crate::host::HostState;

pub struct HostServicesBridge<'a> {
    state: &'a mut HostState,
    host: HostId,
    hostname: String,
    ip: Ipv4Addr,
    dns: &'a Dns,
    now: SimulationTime,
    instance: *mut c_void,
}

impl<'a> HostServicesBridge<'a> {
    pub fn new(
        state: &'a mut HostState,
        host: HostId,
        hostname: String,
        ip: Ipv4Addr,
        dns: &'a Dns,
        now: SimulationTime,
        instance: *mut c_void,
    ) -> Self {
        Self { state, host, hostname, ip, dns, now, instance }
    }
}

impl HostServices for HostServicesBridge<'_> {
    fn log(&mut self, level: log::Level, message: &str) {
        log::log!(level, "[{}] {}", self.hostname, message);
    }

    fn resolve_name(&mut self, name: &str) -> Option<Ipv4Addr> {
        self.dns.name_to_addr(name).ok()
    }

    fn my_hostname(&self) -> String {
        self.hostname.clone()
    }

    fn my_ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Schedules a self-targeted callback (§4.11 "a deferred-callback scheduler"). Zero delay is
    /// allowed for same-host events (§4.1), so a plugin asking to be called back "right away" is
    /// legal and just lands later in this same round.
    fn schedule_callback(&mut self, after: SimulationTime, data: *mut c_void) {
        let seq = self.state.next_seq(self.host);
        let cancelled = crate::event::new_cancel_token();
        self.state.local_queue.push_event(crate::event::Event {
            time: self.now + after,
            host: self.host,
            seq,
            cancelled,
            payload: EventPayload::DeferredCallback {
                instance: self.instance as usize,
                data: data as usize,
            },
        });
    }
}
