//! Switch state snapshot.
//!
//! This module provides:
//! - Identifier newtypes (`VlanId`, `PortId`, `InterfaceId`)
//! - `SwitchState`: an immutable snapshot of ports, VLANs, interfaces,
//!   neighbor tables and IPv6 routes
//! - `RouteTable`: LPM table over IPv6 prefixes
//! - `update`: the single-consumer queue that produces new snapshots
//!
//! Snapshots are shared as `Arc<SwitchState>`. VLANs and interfaces are
//! themselves behind `Arc` so an update clones only what it touches.

pub mod neighbor;
pub mod update;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use ipnet::{IpNet, Ipv6Net};
use prefix_trie::PrefixMap;
use serde::{Deserialize, Serialize};

use crate::packet::MacAddress;
use crate::packet::ipv6::is_link_local;

pub use neighbor::{NeighborEntry, NeighborState, NeighborTable};
pub use update::{StateUpdate, StateUpdater, UpdateConsumer, update_queue};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_type!(
    /// 802.1Q VLAN id (12 bits used).
    VlanId(u16)
);
id_type!(
    /// Front-panel port.
    PortId(u32)
);
id_type!(
    /// Routed (L3) interface.
    InterfaceId(u32)
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: PortId,
    pub vlan: VlanId,
    pub up: bool,
}

/// Per-VLAN DHCP relay settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlanRelayConfig {
    pub dhcp_v4_relay: Option<Ipv4Addr>,
    /// Per-client-MAC server overrides
    pub dhcp_v4_relay_overrides: HashMap<MacAddress, Ipv4Addr>,
    pub dhcp_v4_relay_src: Option<Ipv4Addr>,
    pub dhcp_v4_reply_src: Option<Ipv4Addr>,
    pub dhcp_v6_relay: Option<Ipv6Addr>,
    pub dhcp_v6_relay_overrides: HashMap<MacAddress, Ipv6Addr>,
    pub dhcp_v6_relay_src: Option<Ipv6Addr>,
    pub dhcp_v6_reply_src: Option<Ipv6Addr>,
}

impl VlanRelayConfig {
    /// DHCPv4 server for requests from `client`. Zero means unset.
    pub fn dhcp_v4_server_for(&self, client: MacAddress) -> Option<Ipv4Addr> {
        self.dhcp_v4_relay_overrides
            .get(&client)
            .copied()
            .or(self.dhcp_v4_relay)
            .filter(|ip| !ip.is_unspecified())
    }

    /// DHCPv6 server for requests from `client`. `::` means unset.
    pub fn dhcp_v6_server_for(&self, client: MacAddress) -> Option<Ipv6Addr> {
        self.dhcp_v6_relay_overrides
            .get(&client)
            .copied()
            .or(self.dhcp_v6_relay)
            .filter(|ip| !ip.is_unspecified())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vlan {
    pub id: VlanId,
    pub interface: Option<InterfaceId>,
    pub relay: VlanRelayConfig,
    pub neighbors: NeighborTable,
}

impl Vlan {
    pub fn new(id: VlanId) -> Self {
        Self {
            id,
            interface: None,
            relay: VlanRelayConfig::default(),
            neighbors: NeighborTable::default(),
        }
    }
}

fn default_cur_hop_limit() -> u8 {
    255
}

fn default_router_lifetime() -> u16 {
    1800
}

fn default_valid_lifetime() -> u32 {
    2_592_000
}

fn default_preferred_lifetime() -> u32 {
    604_800
}

/// Router advertisement settings of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdpConfig {
    /// 0 disables unsolicited advertisements.
    #[serde(default)]
    pub router_advertisement_seconds: u32,
    #[serde(default = "default_cur_hop_limit")]
    pub cur_hop_limit: u8,
    #[serde(default = "default_router_lifetime")]
    pub router_lifetime: u16,
    #[serde(default = "default_valid_lifetime")]
    pub prefix_valid_lifetime: u32,
    #[serde(default = "default_preferred_lifetime")]
    pub prefix_preferred_lifetime: u32,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub other: bool,
    /// Source of advertisements; the interface link-local when unset.
    #[serde(default)]
    pub router_address: Option<Ipv6Addr>,
}

impl Default for NdpConfig {
    fn default() -> Self {
        Self {
            router_advertisement_seconds: 0,
            cur_hop_limit: default_cur_hop_limit(),
            router_lifetime: default_router_lifetime(),
            prefix_valid_lifetime: default_valid_lifetime(),
            prefix_preferred_lifetime: default_preferred_lifetime(),
            managed: false,
            other: false,
            router_address: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub id: InterfaceId,
    pub vlan: VlanId,
    pub mac: MacAddress,
    pub mtu: u16,
    pub addresses: Vec<IpNet>,
    pub ndp: NdpConfig,
}

impl Interface {
    /// Configured link-local address, else the EUI-64 one.
    pub fn link_local(&self) -> Ipv6Addr {
        self.ipv6_nets()
            .map(|n| n.addr())
            .find(is_link_local)
            .unwrap_or_else(|| self.mac.link_local_ipv6())
    }

    pub fn has_address(&self, ip: IpAddr) -> bool {
        if let IpAddr::V6(v6) = ip
            && v6 == self.mac.link_local_ipv6()
        {
            return true;
        }
        self.addresses.iter().any(|n| n.addr() == ip)
    }

    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|n| match n {
            IpNet::V4(v4) => Some(v4.addr()),
            IpNet::V6(_) => None,
        })
    }

    /// First global IPv6 address, falling back to the link-local.
    pub fn first_ipv6(&self) -> Ipv6Addr {
        self.ipv6_nets()
            .map(|n| n.addr())
            .find(|a| !is_link_local(a))
            .unwrap_or_else(|| self.link_local())
    }

    /// Our address on the subnet containing `target`, if `target` is on-link.
    pub fn address_to_reach_v6(&self, target: Ipv6Addr) -> Option<Ipv6Addr> {
        if is_link_local(&target) {
            return Some(self.link_local());
        }
        self.ipv6_nets()
            .find(|n| n.prefix_len() < 128 && n.contains(&target))
            .map(|n| n.addr())
    }

    /// Whether `target` lives on one of this interface's subnets.
    pub fn is_ipv6_attached(&self, target: Ipv6Addr) -> bool {
        self.address_to_reach_v6(target).is_some()
    }

    pub fn ra_enabled(&self) -> bool {
        self.ndp.router_advertisement_seconds > 0
    }

    /// Distinct on-link prefixes, host routes excluded.
    pub fn ipv6_prefixes(&self) -> Vec<Ipv6Net> {
        let set: BTreeSet<Ipv6Net> = self
            .ipv6_nets()
            .filter(|n| n.prefix_len() < 128)
            .map(|n| n.trunc())
            .collect();
        set.into_iter().collect()
    }

    fn ipv6_nets(&self) -> impl Iterator<Item = &Ipv6Net> {
        self.addresses.iter().filter_map(|n| match n {
            IpNet::V6(v6) => Some(v6),
            IpNet::V4(_) => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub interface: InterfaceId,
    /// Gateway; `None` for directly connected destinations.
    pub addr: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: Ipv6Net,
    pub nexthops: Vec<NextHop>,
    pub connected: bool,
}

/// IPv6 longest-prefix-match table.
#[derive(Clone)]
pub struct RouteTable {
    v6: PrefixMap<Ipv6Net, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            v6: PrefixMap::new(),
        }
    }

    pub fn insert(&mut self, route: Route) {
        self.v6.insert(route.prefix.trunc(), route);
    }

    pub fn remove(&mut self, prefix: &Ipv6Net) -> Option<Route> {
        self.v6.remove(&prefix.trunc())
    }

    /// Longest matching route for `addr`.
    pub fn lookup(&self, addr: Ipv6Addr) -> Option<&Route> {
        let host = Ipv6Net::new(addr, 128).ok()?;
        self.v6.get_lpm(&host).map(|(_, route)| route)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.v6.iter().map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for RouteTable {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

/// Immutable snapshot of everything the slow path consults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwitchState {
    pub cpu_mac: MacAddress,
    pub ports: BTreeMap<PortId, Port>,
    pub vlans: BTreeMap<VlanId, Arc<Vlan>>,
    pub interfaces: BTreeMap<InterfaceId, Arc<Interface>>,
    pub routes: Arc<RouteTable>,
}

impl SwitchState {
    pub fn vlan(&self, id: VlanId) -> Option<&Arc<Vlan>> {
        self.vlans.get(&id)
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Arc<Interface>> {
        self.interfaces.get(&id)
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    /// The routed interface of a VLAN.
    pub fn interface_for_vlan(&self, vlan: VlanId) -> Option<&Arc<Interface>> {
        let id = self.vlan(vlan)?.interface?;
        self.interface(id)
    }

    /// Interface that owns `ip` as one of its addresses.
    pub fn interface_owning(&self, ip: IpAddr) -> Option<&Arc<Interface>> {
        self.interfaces.values().find(|i| i.has_address(ip))
    }

    pub fn is_local_address(&self, ip: IpAddr) -> bool {
        self.interface_owning(ip).is_some()
    }

    /// Copy-on-write access to one VLAN.
    pub fn vlan_mut(&mut self, id: VlanId) -> Option<&mut Vlan> {
        self.vlans.get_mut(&id).map(Arc::make_mut)
    }

    /// Replace the connected routes with ones derived from the current
    /// interface addresses, keeping static routes.
    pub fn rebuild_connected_routes(&mut self) {
        let mut table = RouteTable::new();
        for route in self.routes.iter().filter(|r| !r.connected) {
            table.insert(route.clone());
        }
        for intf in self.interfaces.values() {
            for prefix in intf.ipv6_prefixes() {
                table.insert(Route {
                    prefix,
                    nexthops: vec![NextHop {
                        interface: intf.id,
                        addr: None,
                    }],
                    connected: true,
                });
            }
        }
        self.routes = Arc::new(table);
    }
}
