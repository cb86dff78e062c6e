//! Neighbor aging.
//!
//! The sweeper periodically walks every neighbor table. An entry that has
//! been neither hit nor changed for the configured timeout is probed a few
//! times and then expired. Probes are unicast solicitations when the MAC is
//! known, multicast otherwise.
//!
//! Expiry is submitted as an `ExpireNeighbor` update carrying the MAC and
//! state the sweep observed, so a reply or a hit that lands in between makes
//! the removal abstain.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::hw::{PacketIo, TxPacket};
use crate::packet::MacAddress;
use crate::state::{NeighborEntry, NeighborState, StateUpdate, StateUpdater, SwitchState, VlanId};
use crate::stats::{Counter, SwitchStats};

fn default_timeout_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_max_probes() -> u32 {
    3
}

/// Neighbor aging settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborConfig {
    /// Idle time before an entry is probed.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Probes sent before an idle entry is removed.
    #[serde(default = "default_max_probes")]
    pub max_probes: u32,
}

impl NeighborConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_probes: default_max_probes(),
        }
    }
}

#[derive(Debug)]
struct Aging {
    idle_since: Instant,
    probes: u32,
    observed: (Option<MacAddress>, NeighborState),
}

impl Aging {
    fn new(entry: &NeighborEntry, now: Instant) -> Self {
        Self {
            idle_since: now,
            probes: 0,
            observed: (entry.mac, entry.state),
        }
    }
}

/// Walks neighbor tables, probing and expiring idle entries.
pub struct NeighborSweeper {
    config: NeighborConfig,
    io: Arc<dyn PacketIo>,
    stats: Arc<SwitchStats>,
    updater: StateUpdater,
    aging: HashMap<(VlanId, Ipv6Addr), Aging>,
}

impl NeighborSweeper {
    pub fn new(
        config: NeighborConfig,
        io: Arc<dyn PacketIo>,
        stats: Arc<SwitchStats>,
        updater: StateUpdater,
    ) -> Self {
        Self {
            config,
            io,
            stats,
            updater,
            aging: HashMap::new(),
        }
    }

    /// Entries currently tracked.
    pub fn tracked(&self) -> usize {
        self.aging.len()
    }

    /// One pass over `state`.
    pub fn sweep(&mut self, state: &SwitchState, now: Instant) {
        self.aging
            .retain(|(vlan, ip), _| state.vlan(*vlan).is_some_and(|v| v.neighbors.get(*ip).is_some()));

        for vlan in state.vlans.values() {
            for entry in vlan.neighbors.iter() {
                self.sweep_entry(state, vlan.id, entry, now);
            }
        }
    }

    fn sweep_entry(&mut self, state: &SwitchState, vlan: VlanId, entry: &NeighborEntry, now: Instant) {
        let key = (vlan, entry.ip);
        let aging = self
            .aging
            .entry(key)
            .or_insert_with(|| Aging::new(entry, now));

        if entry.hit {
            self.updater.submit(StateUpdate::ClearNeighborHit { vlan, ip: entry.ip });
            *aging = Aging::new(entry, now);
            return;
        }
        if aging.observed != (entry.mac, entry.state) {
            *aging = Aging::new(entry, now);
            return;
        }
        if now.duration_since(aging.idle_since) < self.config.timeout() {
            return;
        }

        if aging.probes < self.config.max_probes {
            aging.probes += 1;
            let attempt = aging.probes;
            self.probe(state, vlan, entry, attempt);
            return;
        }

        debug!(vlan = %vlan, ip = %entry.ip, state = ?entry.state, "expiring idle neighbor");
        self.updater.submit(StateUpdate::ExpireNeighbor {
            vlan,
            ip: entry.ip,
            mac: entry.mac,
            state: entry.state,
        });
        self.stats.increment(Counter::NeighborExpired);
        self.aging.remove(&key);
    }

    fn probe(&self, state: &SwitchState, vlan: VlanId, entry: &NeighborEntry, attempt: u32) {
        let Some(intf) = state.interface(entry.interface) else {
            debug!(vlan = %vlan, ip = %entry.ip, "no interface to probe neighbor from");
            return;
        };
        let frame = match entry.mac {
            Some(mac) => {
                let src = intf
                    .address_to_reach_v6(entry.ip)
                    .unwrap_or_else(|| intf.link_local());
                super::unicast_solicitation(intf, src, entry.ip, mac)
            }
            None => super::multicast_solicitation(intf, entry.ip),
        };
        match frame {
            Ok(bytes) => {
                debug!(vlan = %vlan, ip = %entry.ip, attempt, "probing idle neighbor");
                self.io.send_switched(TxPacket::from(bytes));
                self.stats.increment(Counter::NeighborProbesSent);
            }
            Err(e) => {
                warn!(error = %e, ip = %entry.ip, "failed to build neighbor probe");
                self.stats.increment(Counter::EncodeError);
            }
        }
    }

    /// Sweep on a timer until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval = ?self.config.sweep_interval(), "neighbor sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let state = self.updater.snapshot();
                    self.sweep(&state, Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("neighbor sweeper stopped");
    }
}
