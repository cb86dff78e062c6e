//! In-process switch for handler tests
//!
//! The harness owns both ends of the update queue. Updates submitted by
//! handlers stay queued until `apply_updates` is called, so tests can
//! observe the snapshot before and after.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use crate::error::HandlerError;
use crate::handlers::{self, HandlerContext};
use crate::packet::MacAddress;
use crate::state::{
    Interface, InterfaceId, NdpConfig, NeighborEntry, Port, PortId, StateUpdate, StateUpdater,
    SwitchState, UpdateConsumer, Vlan, VlanId, update_queue,
};
use crate::stats::SwitchStats;

use super::frames::CPU_MAC;
use super::io::RecordingIo;

pub struct Harness {
    pub io: Arc<RecordingIo>,
    pub stats: Arc<SwitchStats>,
    updater: StateUpdater,
    consumer: UpdateConsumer,
}

impl Harness {
    /// Routed interface on VLAN 5.
    pub const INTERFACE_ID: InterfaceId = InterfaceId(55);
    pub const INTERFACE_MAC: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x55]);
    pub const INTERFACE_MTU: u16 = 1500;
    pub const DHCP_V4_SERVER: Ipv4Addr = Ipv4Addr::new(10, 1, 2, 3);
    pub const DHCP_V6_SERVER: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0x200, 0, 0, 0, 0, 2);

    pub fn new() -> Self {
        Self::with_state(Self::default_state())
    }

    pub fn with_state(state: SwitchState) -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        let (updater, consumer) = update_queue(state);
        Self {
            io: Arc::new(RecordingIo::default()),
            stats: Arc::new(SwitchStats::new()),
            updater,
            consumer,
        }
    }

    /// VLAN 1 is bare. VLAN 5 (ports 1-4) has interface 55 with
    /// 10.164.4.10/24 and 2401:db00:2110:3004::a/64 and relays to
    /// `DHCP_V4_SERVER` / `DHCP_V6_SERVER`.
    pub fn default_state() -> SwitchState {
        let mut state = SwitchState {
            cpu_mac: CPU_MAC,
            ..SwitchState::default()
        };

        state.vlans.insert(VlanId(1), Arc::new(Vlan::new(VlanId(1))));

        let mut vlan = Vlan::new(VlanId(5));
        vlan.interface = Some(Self::INTERFACE_ID);
        vlan.relay.dhcp_v4_relay = Some(Self::DHCP_V4_SERVER);
        vlan.relay.dhcp_v6_relay = Some(Self::DHCP_V6_SERVER);
        state.vlans.insert(VlanId(5), Arc::new(vlan));

        for id in 1..=4 {
            state.ports.insert(
                PortId(id),
                Port {
                    id: PortId(id),
                    vlan: VlanId(5),
                    up: true,
                },
            );
        }

        let interface = Interface {
            id: Self::INTERFACE_ID,
            vlan: VlanId(5),
            mac: Self::INTERFACE_MAC,
            mtu: Self::INTERFACE_MTU,
            addresses: vec![
                "10.164.4.10/24".parse().expect("ipv4 net"),
                "2401:db00:2110:3004::a/64".parse().expect("ipv6 net"),
            ],
            ndp: NdpConfig::default(),
        };
        state.interfaces.insert(Self::INTERFACE_ID, Arc::new(interface));
        state.rebuild_connected_routes();
        state
    }

    /// Run one trapped frame through the handlers against the current
    /// snapshot.
    pub fn dispatch(
        &self,
        frame: &[u8],
        port: PortId,
        vlan: Option<VlanId>,
    ) -> Result<(), HandlerError> {
        let state = self.updater.snapshot();
        let ctx = HandlerContext {
            state: &state,
            io: self.io.as_ref(),
            stats: &self.stats,
            updater: &self.updater,
        };
        handlers::dispatch(&ctx, frame, port, vlan)
    }

    /// Apply everything queued so far.
    pub fn apply_updates(&self) -> usize {
        self.consumer.apply_pending()
    }

    /// Queue `update` and apply it right away.
    pub fn submit(&self, update: StateUpdate) {
        self.updater.submit(update);
        self.apply_updates();
    }

    pub fn state(&self) -> Arc<SwitchState> {
        self.updater.snapshot()
    }

    pub fn updater(&self) -> &StateUpdater {
        &self.updater
    }

    pub fn neighbor(&self, vlan: VlanId, ip: &str) -> Option<NeighborEntry> {
        let ip: Ipv6Addr = ip.parse().ok()?;
        self.state().vlan(vlan)?.neighbors.get(ip).cloned()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
