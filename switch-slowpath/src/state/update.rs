//! State update queue.
//!
//! Every mutation of the switch state is a `StateUpdate` value. Producers
//! (packet handlers, timers, administrative calls) push updates onto a
//! crossbeam channel; a single consumer applies them one at a time against
//! the live snapshot and publishes the result through an `ArcSwap`.
//!
//! Updates are revalidated at apply time. When their preconditions no
//! longer hold they abstain and the snapshot is left untouched.

use std::net::Ipv6Addr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::{
    Interface, InterfaceId, NeighborEntry, NeighborState, PortId, SwitchState, VlanId,
};
use crate::packet::MacAddress;

/// A requested state mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// No-op; used to wait until everything queued before it is applied.
    Barrier,
    /// Install an unresolved entry unless one already exists.
    NeighborPending {
        vlan: VlanId,
        ip: Ipv6Addr,
        interface: InterfaceId,
    },
    /// Install or refresh a resolved entry. With `create` false only an
    /// existing entry is updated.
    NeighborReachable {
        vlan: VlanId,
        ip: Ipv6Addr,
        mac: MacAddress,
        port: PortId,
        interface: InterfaceId,
        create: bool,
    },
    PortLinkState { port: PortId, up: bool },
    NeighborHit { vlan: VlanId, ip: Ipv6Addr },
    ClearNeighborHit { vlan: VlanId, ip: Ipv6Addr },
    /// Remove an aged-out entry, provided it still looks the way the sweep
    /// saw it and was not hit since.
    ExpireNeighbor {
        vlan: VlanId,
        ip: Ipv6Addr,
        mac: Option<MacAddress>,
        state: NeighborState,
    },
    /// Remove entries for `ip` on one VLAN, or on all of them.
    FlushNeighbor { ip: Ipv6Addr, vlan: Option<VlanId> },
    UpsertInterface(Interface),
    RemoveInterface(InterfaceId),
}

impl StateUpdate {
    /// Apply against `state`. Returns the new snapshot and the number of
    /// affected objects, or `None` when the update abstains.
    pub fn apply(&self, state: &SwitchState) -> Option<(SwitchState, usize)> {
        match self {
            StateUpdate::Barrier => None,

            StateUpdate::NeighborPending {
                vlan,
                ip,
                interface,
            } => {
                let current = state.vlan(*vlan)?;
                if current.neighbors.get(*ip).is_some() {
                    return None;
                }
                let mut next = state.clone();
                next.vlan_mut(*vlan)?
                    .neighbors
                    .insert(NeighborEntry::pending(*ip, *interface));
                Some((next, 1))
            }

            StateUpdate::NeighborReachable {
                vlan,
                ip,
                mac,
                port,
                interface,
                create,
            } => {
                let current = state.vlan(*vlan)?;
                let intf = state.interface(*interface)?;
                if !intf.is_ipv6_attached(*ip) {
                    return None;
                }
                let existing = current.neighbors.get(*ip);
                let entry = NeighborEntry {
                    ip: *ip,
                    mac: Some(*mac),
                    port: Some(*port),
                    interface: *interface,
                    state: NeighborState::Reachable,
                    hit: existing.is_some_and(|e| e.hit),
                };
                match existing {
                    None if !create => return None,
                    Some(e) if *e == entry => return None,
                    _ => {}
                }
                let mut next = state.clone();
                next.vlan_mut(*vlan)?.neighbors.insert(entry);
                Some((next, 1))
            }

            StateUpdate::PortLinkState { port, up } => {
                let mut next = state.clone();
                let mut changed = 0;
                if let Some(p) = next.ports.get_mut(port)
                    && p.up != *up
                {
                    p.up = *up;
                    changed += 1;
                }
                if !*up {
                    changed += demote_port_neighbors(&mut next, *port);
                }
                (changed > 0).then_some((next, changed))
            }

            StateUpdate::NeighborHit { vlan, ip } => set_hit(state, *vlan, *ip, true),
            StateUpdate::ClearNeighborHit { vlan, ip } => set_hit(state, *vlan, *ip, false),

            StateUpdate::ExpireNeighbor {
                vlan,
                ip,
                mac,
                state: seen,
            } => {
                let entry = state.vlan(*vlan)?.neighbors.get(*ip)?;
                if entry.hit || entry.mac != *mac || entry.state != *seen {
                    return None;
                }
                let mut next = state.clone();
                next.vlan_mut(*vlan)?.neighbors.remove(*ip);
                Some((next, 1))
            }

            StateUpdate::FlushNeighbor { ip, vlan } => {
                let targets: Vec<VlanId> = state
                    .vlans
                    .values()
                    .filter(|v| vlan.is_none_or(|want| want == v.id))
                    .filter(|v| v.neighbors.get(*ip).is_some())
                    .map(|v| v.id)
                    .collect();
                if targets.is_empty() {
                    return None;
                }
                let mut next = state.clone();
                for id in &targets {
                    if let Some(v) = next.vlan_mut(*id) {
                        v.neighbors.remove(*ip);
                    }
                }
                Some((next, targets.len()))
            }

            StateUpdate::UpsertInterface(intf) => {
                state.vlan(intf.vlan)?;
                if state.interface(intf.id).is_some_and(|i| **i == *intf) {
                    return None;
                }
                let mut next = state.clone();
                if let Some(old) = next.interfaces.get(&intf.id).cloned()
                    && old.vlan != intf.vlan
                    && let Some(v) = next.vlan_mut(old.vlan)
                {
                    v.interface = None;
                }
                next.vlan_mut(intf.vlan)?.interface = Some(intf.id);
                next.interfaces.insert(intf.id, Arc::new(intf.clone()));
                next.rebuild_connected_routes();
                Some((next, 1))
            }

            StateUpdate::RemoveInterface(id) => {
                let old = state.interface(*id)?.clone();
                let mut next = state.clone();
                next.interfaces.remove(id);
                if let Some(v) = next.vlan_mut(old.vlan) {
                    if v.interface == Some(*id) {
                        v.interface = None;
                    }
                    v.neighbors.retain(|e| e.interface != *id);
                }
                next.rebuild_connected_routes();
                Some((next, 1))
            }
        }
    }
}

fn set_hit(state: &SwitchState, vlan: VlanId, ip: Ipv6Addr, hit: bool) -> Option<(SwitchState, usize)> {
    let entry = state.vlan(vlan)?.neighbors.get(ip)?;
    if entry.hit == hit {
        return None;
    }
    let mut next = state.clone();
    next.vlan_mut(vlan)?.neighbors.get_mut(ip)?.hit = hit;
    Some((next, 1))
}

/// Mark reachable entries learned on `port` pending; MAC and port stay.
fn demote_port_neighbors(state: &mut SwitchState, port: PortId) -> usize {
    let affected: Vec<VlanId> = state
        .vlans
        .values()
        .filter(|v| {
            v.neighbors
                .iter()
                .any(|e| e.port == Some(port) && e.is_reachable())
        })
        .map(|v| v.id)
        .collect();

    let mut changed = 0;
    for id in affected {
        if let Some(v) = state.vlan_mut(id) {
            for e in v.neighbors.iter_mut() {
                if e.port == Some(port) && e.is_reachable() {
                    e.state = NeighborState::Pending;
                    changed += 1;
                }
            }
        }
    }
    changed
}

enum Message {
    Update {
        update: StateUpdate,
        reply: Option<Sender<usize>>,
    },
    Stop,
}

/// Producer side of the update queue. Cheap to clone.
#[derive(Clone)]
pub struct StateUpdater {
    state: Arc<ArcSwap<SwitchState>>,
    tx: Sender<Message>,
}

impl StateUpdater {
    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<SwitchState> {
        self.state.load_full()
    }

    /// Queue `update` without waiting for it to be applied.
    pub fn submit(&self, update: StateUpdate) {
        if self
            .tx
            .send(Message::Update {
                update,
                reply: None,
            })
            .is_err()
        {
            warn!("state update queue closed, update discarded");
        }
    }

    /// Queue `update` and wait until it has been applied. Returns the
    /// number of affected objects (0 when it abstained).
    pub fn submit_blocking(&self, update: StateUpdate) -> usize {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let msg = Message::Update {
            update,
            reply: Some(reply_tx),
        };
        if self.tx.send(msg).is_err() {
            warn!("state update queue closed, update discarded");
            return 0;
        }
        reply_rx.recv().unwrap_or(0)
    }

    /// Block until every update queued so far has been applied.
    pub fn wait_for_updates(&self) {
        self.submit_blocking(StateUpdate::Barrier);
    }

    /// Ask the consumer loop to exit.
    pub fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }
}

/// Consumer side of the update queue.
pub struct UpdateConsumer {
    state: Arc<ArcSwap<SwitchState>>,
    rx: Receiver<Message>,
    watch_tx: watch::Sender<Arc<SwitchState>>,
}

impl UpdateConsumer {
    /// Observe published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SwitchState>> {
        self.watch_tx.subscribe()
    }

    /// Apply updates until stopped or every producer is gone.
    pub fn run(self) {
        debug!("state update loop started");
        while let Ok(msg) = self.rx.recv() {
            if !self.handle(msg) {
                break;
            }
        }
        debug!("state update loop stopped");
    }

    /// Apply whatever is queued right now. Returns the number of messages
    /// handled.
    pub fn apply_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    handled += 1;
                    if !self.handle(msg) {
                        break;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    fn handle(&self, msg: Message) -> bool {
        let (update, reply) = match msg {
            Message::Update { update, reply } => (update, reply),
            Message::Stop => return false,
        };

        let current = self.state.load();
        let affected = match update.apply(&current) {
            Some((next, affected)) => {
                let next = Arc::new(next);
                self.state.store(next.clone());
                self.watch_tx.send_replace(next);
                trace!(?update, affected, "state update applied");
                affected
            }
            None => {
                trace!(?update, "state update abstained");
                0
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(affected);
        }
        true
    }
}

/// Create the update queue around `initial`.
pub fn update_queue(initial: SwitchState) -> (StateUpdater, UpdateConsumer) {
    let initial = Arc::new(initial);
    let state = Arc::new(ArcSwap::new(initial.clone()));
    let (tx, rx) = crossbeam_channel::unbounded();
    let (watch_tx, _) = watch::channel(initial);
    (
        StateUpdater {
            state: state.clone(),
            tx,
        },
        UpdateConsumer {
            state,
            rx,
            watch_tx,
        },
    )
}
