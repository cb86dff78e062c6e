//! Per-VLAN IPv6 neighbor table.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use super::{InterfaceId, PortId};
use crate::packet::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    /// Solicited but not yet answered (or the owning port went down).
    Pending,
    Reachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: Ipv6Addr,
    pub mac: Option<MacAddress>,
    pub port: Option<PortId>,
    pub interface: InterfaceId,
    pub state: NeighborState,
    /// Set when the dataplane used the entry since the last sweep.
    pub hit: bool,
}

impl NeighborEntry {
    pub fn pending(ip: Ipv6Addr, interface: InterfaceId) -> Self {
        Self {
            ip,
            mac: None,
            port: None,
            interface,
            state: NeighborState::Pending,
            hit: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == NeighborState::Pending
    }

    pub fn is_reachable(&self) -> bool {
        self.state == NeighborState::Reachable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborTable {
    entries: BTreeMap<Ipv6Addr, NeighborEntry>,
}

impl NeighborTable {
    pub fn get(&self, ip: Ipv6Addr) -> Option<&NeighborEntry> {
        self.entries.get(&ip)
    }

    pub fn get_mut(&mut self, ip: Ipv6Addr) -> Option<&mut NeighborEntry> {
        self.entries.get_mut(&ip)
    }

    pub fn insert(&mut self, entry: NeighborEntry) -> Option<NeighborEntry> {
        self.entries.insert(entry.ip, entry)
    }

    pub fn remove(&mut self, ip: Ipv6Addr) -> Option<NeighborEntry> {
        self.entries.remove(&ip)
    }

    pub fn retain(&mut self, mut f: impl FnMut(&NeighborEntry) -> bool) {
        self.entries.retain(|_, e| f(e));
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NeighborEntry> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
