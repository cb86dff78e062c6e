//! Unsolicited router advertisements.
//!
//! One tokio task per interface with advertisements enabled. The task owns
//! the pre-serialized advertisement and retransmits it on every tick. When
//! the interface goes away, advertisements are disabled or the scheduler
//! shuts down, the task is aborted and one last advertisement with a zero
//! router lifetime tells hosts to stop using us as a default router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use smoltcp::time::Duration as NdiscDuration;
use smoltcp::wire::{NdiscPrefixInfoFlags, NdiscPrefixInformation, NdiscRepr, NdiscRouterFlags};

use super::{hardware_address, ndisc_frame};
use crate::error::WriteError;
use crate::hw::{PacketIo, TxPacket};
use crate::packet::ipv6::ALL_NODES;
use crate::packet::MacAddress;
use crate::state::{Interface, InterfaceId, SwitchState};
use crate::stats::{Counter, SwitchStats};

/// Serialize the advertisement `intf` sends, with `router_lifetime`
/// overriding the configured one when given.
///
/// Options are SLLA, MTU, then one prefix information option per on-link
/// prefix.
pub fn router_advertisement(intf: &Interface, router_lifetime: Option<u16>) -> Result<Vec<u8>, WriteError> {
    let ndp = &intf.ndp;
    let mut flags = NdiscRouterFlags::empty();
    if ndp.managed {
        flags |= NdiscRouterFlags::MANAGED;
    }
    if ndp.other {
        flags |= NdiscRouterFlags::OTHER;
    }

    let prefixes: Vec<NdiscPrefixInformation> = intf
        .ipv6_prefixes()
        .into_iter()
        .map(|prefix| NdiscPrefixInformation {
            prefix_len: prefix.prefix_len(),
            flags: NdiscPrefixInfoFlags::ON_LINK | NdiscPrefixInfoFlags::ADDRCONF,
            valid_lifetime: NdiscDuration::from_secs(u64::from(ndp.prefix_valid_lifetime)),
            preferred_lifetime: NdiscDuration::from_secs(u64::from(ndp.prefix_preferred_lifetime)),
            prefix: prefix.network(),
        })
        .collect();

    let message = NdiscRepr::RouterAdvert {
        hop_limit: ndp.cur_hop_limit,
        flags,
        router_lifetime: NdiscDuration::from_secs(u64::from(router_lifetime.unwrap_or(ndp.router_lifetime))),
        reachable_time: NdiscDuration::ZERO,
        retrans_time: NdiscDuration::ZERO,
        lladdr: Some(hardware_address(intf.mac)),
        mtu: Some(u32::from(intf.mtu)),
        prefix_info: None,
    };
    let src = ndp.router_address.unwrap_or_else(|| intf.link_local());
    ndisc_frame(
        intf,
        MacAddress::ipv6_multicast(ALL_NODES),
        src,
        ALL_NODES,
        message,
        &prefixes,
    )
}

struct RaTask {
    interface: Arc<Interface>,
    handle: JoinHandle<()>,
}

/// Owns the per-interface advertisement tasks.
pub struct RaScheduler {
    io: Arc<dyn PacketIo>,
    stats: Arc<SwitchStats>,
    tasks: HashMap<InterfaceId, RaTask>,
}

impl RaScheduler {
    pub fn new(io: Arc<dyn PacketIo>, stats: Arc<SwitchStats>) -> Self {
        Self {
            io,
            stats,
            tasks: HashMap::new(),
        }
    }

    pub fn is_running(&self, id: InterfaceId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Bring the task set in line with `state`. Must run inside a tokio
    /// runtime.
    pub fn sync(&mut self, state: &SwitchState) {
        let stale: Vec<InterfaceId> = self
            .tasks
            .iter()
            .filter(|(id, task)| {
                state
                    .interface(**id)
                    .is_none_or(|intf| !intf.ra_enabled() || *intf != task.interface)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in stale {
            match state.interface(id) {
                // still advertising, only the contents changed
                Some(intf) if intf.ra_enabled() => {
                    if let Some(task) = self.tasks.remove(&id) {
                        task.handle.abort();
                    }
                }
                _ => self.stop(id),
            }
        }

        for intf in state.interfaces.values() {
            if intf.ra_enabled() && !self.tasks.contains_key(&intf.id) {
                self.start(intf.clone());
            }
        }
    }

    fn start(&mut self, intf: Arc<Interface>) {
        let bytes = match router_advertisement(&intf, None) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(interface = %intf.id, error = %e, "failed to build router advertisement");
                self.stats.increment(Counter::EncodeError);
                return;
            }
        };
        let period = Duration::from_secs(u64::from(intf.ndp.router_advertisement_seconds));
        info!(interface = %intf.id, vlan = %intf.vlan, ?period, "starting router advertisements");

        let io = self.io.clone();
        let stats = self.stats.clone();
        let id = intf.id;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(interface = %id, "sending router advertisement");
                io.send_switched(TxPacket::from(bytes.clone()));
                stats.increment(Counter::RouterAdvertisementsSent);
            }
        });
        self.tasks.insert(
            intf.id,
            RaTask {
                interface: intf,
                handle,
            },
        );
    }

    /// Cancel the task of `id` and advertise a zero router lifetime.
    pub fn stop(&mut self, id: InterfaceId) {
        let Some(task) = self.tasks.remove(&id) else {
            return;
        };
        task.handle.abort();
        info!(interface = %id, "stopping router advertisements");
        match router_advertisement(&task.interface, Some(0)) {
            Ok(bytes) => {
                self.io.send_switched(TxPacket::from(bytes));
                self.stats.increment(Counter::RouterAdvertisementsSent);
            }
            Err(e) => {
                warn!(interface = %id, error = %e, "failed to build final router advertisement");
                self.stats.increment(Counter::EncodeError);
            }
        }
    }

    /// Stop every task.
    pub fn shutdown(&mut self) {
        let ids: Vec<InterfaceId> = self.tasks.keys().copied().collect();
        for id in ids {
            self.stop(id);
        }
    }

    /// Follow published snapshots until `shutdown` flips to true, then stop
    /// every task.
    pub async fn run(
        mut self,
        mut states: watch::Receiver<Arc<SwitchState>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let initial = states.borrow_and_update().clone();
        self.sync(&initial);
        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    self.sync(&state);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown();
    }
}

impl Drop for RaScheduler {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.handle.abort();
        }
    }
}
