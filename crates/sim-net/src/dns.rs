//! Virtual name resolution: a process-wide `hostname <-> IP` mapping built at topology load.
//! Guest `gethostname`/`getaddrinfo`/`gethostbyname*` calls resolve against this map in the
//! active host's context and never touch the real network (§4.10).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::HostId;

#[derive(Debug)]
struct Record {
    id: HostId,
    addr: Ipv4Addr,
    name: String,
}

/// Accumulates hostname/address bindings during bootstrap; call [`DnsBuilder::into_dns`] once the
/// topology is fully loaded to get the queryable, immutable [`Dns`].
#[derive(Debug, Default)]
pub struct DnsBuilder {
    name_index: HashMap<String, Arc<Record>>,
    addr_index: HashMap<Ipv4Addr, Arc<Record>>,
}

#[derive(Debug)]
pub enum DnsError {
    /// Two hosts were registered with the same IP address.
    DuplicateAddress(Ipv4Addr),
    /// Two hosts were registered with the same hostname.
    DuplicateName(String),
}

impl DnsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: HostId,
        addr: Ipv4Addr,
        name: impl Into<String>,
    ) -> Result<(), DnsError> {
        let name = name.into();
        if self.addr_index.contains_key(&addr) {
            return Err(DnsError::DuplicateAddress(addr));
        }
        if self.name_index.contains_key(&name) {
            return Err(DnsError::DuplicateName(name));
        }
        let record = Arc::new(Record { id, addr, name: name.clone() });
        self.name_index.insert(name, record.clone());
        self.addr_index.insert(addr, record);
        Ok(())
    }

    pub fn into_dns(self) -> Dns {
        Dns {
            name_index: self.name_index,
            addr_index: self.addr_index,
        }
    }
}

/// The resolved, read-only name database.
#[derive(Debug)]
pub struct Dns {
    name_index: HashMap<String, Arc<Record>>,
    addr_index: HashMap<Ipv4Addr, Arc<Record>>,
}

/// Mirrors the POSIX `EAI_NONAME` the guest sees from `getaddrinfo`/`gethostbyname`.
#[derive(Debug, Eq, PartialEq)]
pub struct EaiNoName;

impl Dns {
    pub fn addr_to_host_id(&self, addr: Ipv4Addr) -> Option<HostId> {
        self.addr_index.get(&addr).map(|r| r.id)
    }

    pub fn addr_to_name(&self, addr: Ipv4Addr) -> Option<&str> {
        self.addr_index.get(&addr).map(|r| r.name.as_str())
    }

    pub fn name_to_addr(&self, name: &str) -> Result<Ipv4Addr, EaiNoName> {
        self.name_index.get(name).map(|r| r.addr).ok_or(EaiNoName)
    }

    /// `gethostname()`-equivalent: the name a given host should see as its own.
    pub fn hostname_of(&self, addr: Ipv4Addr) -> Option<&str> {
        self.addr_to_name(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_both_directions() {
        let mut builder = DnsBuilder::new();
        builder
            .register(HostId::new(0), Ipv4Addr::new(10, 0, 0, 1), "h1")
            .unwrap();
        builder
            .register(HostId::new(1), Ipv4Addr::new(10, 0, 0, 2), "h2")
            .unwrap();
        let dns = builder.into_dns();

        assert_eq!(dns.name_to_addr("h1"), Ok(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(dns.addr_to_host_id(Ipv4Addr::new(10, 0, 0, 2)), Some(HostId::new(1)));
        assert_eq!(dns.name_to_addr("unknown"), Err(EaiNoName));
    }

    #[test]
    fn rejects_duplicate_addresses() {
        let mut builder = DnsBuilder::new();
        builder
            .register(HostId::new(0), Ipv4Addr::new(10, 0, 0, 1), "h1")
            .unwrap();
        let err = builder
            .register(HostId::new(1), Ipv4Addr::new(10, 0, 0, 1), "h2")
            .unwrap_err();
        assert!(matches!(err, DnsError::DuplicateAddress(_)));
    }
}
