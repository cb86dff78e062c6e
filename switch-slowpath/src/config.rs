//! Agent configuration.
//!
//! The agent is configured from one JSON document describing the CPU MAC,
//! ports, VLANs with their relay settings, routed interfaces, static IPv6
//! routes and neighbor aging. `AgentConfig::build` validates it and turns it
//! into the initial `SwitchState`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;

use ipnet::{IpNet, Ipv6Net};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ndp::neighbor::NeighborConfig;
use crate::packet::MacAddress;
use crate::packet::ipv6::is_link_local;
use crate::state::{
    Interface, InterfaceId, NdpConfig, NextHop, Port, PortId, Route, RouteTable, SwitchState,
    Vlan, VlanId, VlanRelayConfig,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate {what} {id}")]
    Duplicate { what: &'static str, id: String },
    #[error("{what} {id} references unknown VLAN {vlan}")]
    UnknownVlan {
        what: &'static str,
        id: String,
        vlan: VlanId,
    },
    #[error("VLAN {vlan} has more than one interface")]
    VlanInterfaceConflict { vlan: VlanId },
    #[error("route {prefix} references unknown interface {interface}")]
    UnknownInterface { prefix: Ipv6Net, interface: InterfaceId },
    #[error("route {0} has no next hops")]
    NoNextHops(Ipv6Net),
    #[error("interface {0}: {1}")]
    InvalidInterface(InterfaceId, &'static str),
}

fn default_mtu() -> u16 {
    1500
}

fn default_up() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub id: PortId,
    pub vlan: VlanId,
    #[serde(default = "default_up")]
    pub up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlanConfig {
    pub id: VlanId,
    #[serde(default)]
    pub relay: VlanRelayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub id: InterfaceId,
    pub vlan: VlanId,
    pub mac: MacAddress,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    #[serde(default)]
    pub addresses: Vec<IpNet>,
    #[serde(default)]
    pub ndp: NdpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextHopConfig {
    pub interface: InterfaceId,
    /// Gateway address; absent for directly attached prefixes.
    #[serde(default)]
    pub addr: Option<Ipv6Addr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: Ipv6Net,
    pub nexthops: Vec<NextHopConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub cpu_mac: MacAddress,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub vlans: Vec<VlanConfig>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub neighbor: NeighborConfig,
}

impl AgentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded agent config");
        Self::from_json(&json)
    }

    /// Validate and build the initial switch state.
    pub fn build(&self) -> Result<SwitchState, ConfigError> {
        let mut state = SwitchState {
            cpu_mac: self.cpu_mac,
            ..SwitchState::default()
        };

        for vlan in &self.vlans {
            let mut v = Vlan::new(vlan.id);
            v.relay = vlan.relay.clone();
            if state.vlans.insert(vlan.id, Arc::new(v)).is_some() {
                return Err(ConfigError::Duplicate {
                    what: "VLAN",
                    id: vlan.id.to_string(),
                });
            }
        }

        for port in &self.ports {
            if !state.vlans.contains_key(&port.vlan) {
                return Err(ConfigError::UnknownVlan {
                    what: "port",
                    id: port.id.to_string(),
                    vlan: port.vlan,
                });
            }
            let entry = Port {
                id: port.id,
                vlan: port.vlan,
                up: port.up,
            };
            if state.ports.insert(port.id, entry).is_some() {
                return Err(ConfigError::Duplicate {
                    what: "port",
                    id: port.id.to_string(),
                });
            }
        }

        let mut routed_vlans = BTreeSet::new();
        for intf in &self.interfaces {
            let interface = intf.validate()?;
            if !routed_vlans.insert(intf.vlan) {
                return Err(ConfigError::VlanInterfaceConflict { vlan: intf.vlan });
            }
            let Some(vlan) = state.vlan_mut(intf.vlan) else {
                return Err(ConfigError::UnknownVlan {
                    what: "interface",
                    id: intf.id.to_string(),
                    vlan: intf.vlan,
                });
            };
            vlan.interface = Some(intf.id);
            if state.interfaces.insert(intf.id, Arc::new(interface)).is_some() {
                return Err(ConfigError::Duplicate {
                    what: "interface",
                    id: intf.id.to_string(),
                });
            }
        }

        state.routes = Arc::new(self.static_routes(&state.interfaces)?);
        state.rebuild_connected_routes();
        debug!(
            ports = state.ports.len(),
            vlans = state.vlans.len(),
            interfaces = state.interfaces.len(),
            routes = state.routes.len(),
            "built switch state from config"
        );
        Ok(state)
    }

    fn static_routes(
        &self,
        interfaces: &BTreeMap<InterfaceId, Arc<Interface>>,
    ) -> Result<RouteTable, ConfigError> {
        let mut table = RouteTable::new();
        for route in &self.routes {
            if route.nexthops.is_empty() {
                return Err(ConfigError::NoNextHops(route.prefix));
            }
            let mut nexthops = Vec::with_capacity(route.nexthops.len());
            for nh in &route.nexthops {
                if !interfaces.contains_key(&nh.interface) {
                    return Err(ConfigError::UnknownInterface {
                        prefix: route.prefix,
                        interface: nh.interface,
                    });
                }
                nexthops.push(NextHop {
                    interface: nh.interface,
                    addr: nh.addr,
                });
            }
            table.insert(Route {
                prefix: route.prefix.trunc(),
                nexthops,
                connected: false,
            });
        }
        Ok(table)
    }
}

impl InterfaceConfig {
    fn validate(&self) -> Result<Interface, ConfigError> {
        if self.mac.is_multicast() || self.mac.is_zero() {
            return Err(ConfigError::InvalidInterface(self.id, "MAC must be unicast"));
        }
        if usize::from(self.mtu) < crate::packet::ipv6::IPV6_MIN_MTU {
            return Err(ConfigError::InvalidInterface(self.id, "MTU below 1280"));
        }
        if let Some(router) = self.ndp.router_address {
            let owned = self
                .addresses
                .iter()
                .any(|net| net.addr() == IpAddr::V6(router));
            if !is_link_local(&router) && !owned {
                return Err(ConfigError::InvalidInterface(
                    self.id,
                    "router address must be link-local or an interface address",
                ));
            }
        }
        Ok(Interface {
            id: self.id,
            vlan: self.vlan,
            mac: self.mac,
            mtu: self.mtu,
            addresses: self.addresses.clone(),
            ndp: self.ndp.clone(),
        })
    }
}
