//! The slow path as one running object.
//!
//! `Switch` owns the update queue and two background threads:
//! - the update consumer, the only writer of the live snapshot
//! - a current-thread tokio runtime hosting the router advertisement
//!   scheduler and the neighbor sweeper
//!
//! Frame handling itself runs on the caller's thread.

use std::io;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::HandlerError;
use crate::handlers::{self, HandlerContext};
use crate::hw::PacketIo;
use crate::ndp::neighbor::{NeighborConfig, NeighborSweeper};
use crate::ndp::ra::RaScheduler;
use crate::state::{
    Interface, InterfaceId, PortId, StateUpdate, StateUpdater, SwitchState, VlanId, update_queue,
};
use crate::stats::SwitchStats;

pub struct Switch {
    io: Arc<dyn PacketIo>,
    stats: Arc<SwitchStats>,
    updater: StateUpdater,
    shutdown: watch::Sender<bool>,
    consumer_thread: Option<JoinHandle<()>>,
    timer_thread: Option<JoinHandle<()>>,
}

impl Switch {
    /// Start the update consumer and timer threads around `state`.
    pub fn start(
        state: SwitchState,
        neighbor: NeighborConfig,
        io: Arc<dyn PacketIo>,
    ) -> io::Result<Self> {
        let stats = Arc::new(SwitchStats::new());
        let (updater, consumer) = update_queue(state);
        let states = consumer.subscribe();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let consumer_thread = thread::Builder::new()
            .name("slowpath-state".into())
            .spawn(move || consumer.run())?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let ra = RaScheduler::new(io.clone(), stats.clone());
        let sweeper = NeighborSweeper::new(neighbor, io.clone(), stats.clone(), updater.clone());
        let timer_thread = thread::Builder::new()
            .name("slowpath-timers".into())
            .spawn(move || {
                runtime.block_on(async move {
                    tokio::join!(
                        ra.run(states, shutdown_rx.clone()),
                        sweeper.run(shutdown_rx)
                    );
                });
            });
        let timer_thread = match timer_thread {
            Ok(handle) => handle,
            Err(e) => {
                updater.stop();
                let _ = consumer_thread.join();
                return Err(e);
            }
        };

        info!(
            timeout_secs = neighbor.timeout_secs,
            sweep_interval_secs = neighbor.sweep_interval_secs,
            "slow path started"
        );
        Ok(Self {
            io,
            stats,
            updater,
            shutdown,
            consumer_thread: Some(consumer_thread),
            timer_thread: Some(timer_thread),
        })
    }

    /// Handle one frame trapped on `port`. `vlan` is the ingress VLAN as
    /// reported by the hardware, if any.
    pub fn handle_inbound_frame(
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

    /// Remove the neighbor entry for `ip` on `vlan`, or on every VLAN when
    /// `vlan` is `None`. Blocks until applied; returns the number removed.
    pub fn flush_neighbor_entry(&self, ip: Ipv6Addr, vlan: Option<VlanId>) -> usize {
        let removed = self
            .updater
            .submit_blocking(StateUpdate::FlushNeighbor { ip, vlan });
        debug!(%ip, ?vlan, removed, "neighbor flush");
        removed
    }

    pub fn link_state_changed(&self, port: PortId, up: bool) {
        debug!(port = %port, up, "port link state changed");
        self.updater.submit(StateUpdate::PortLinkState { port, up });
    }

    /// Record that the hardware forwarded traffic to a neighbor.
    pub fn neighbor_hit(&self, vlan: VlanId, ip: Ipv6Addr) {
        self.updater.submit(StateUpdate::NeighborHit { vlan, ip });
    }

    /// Add or replace a routed interface. Router advertisements follow.
    pub fn upsert_interface(&self, interface: Interface) {
        self.updater.submit(StateUpdate::UpsertInterface(interface));
    }

    pub fn remove_interface(&self, id: InterfaceId) {
        self.updater.submit(StateUpdate::RemoveInterface(id));
    }

    pub fn snapshot(&self) -> Arc<SwitchState> {
        self.updater.snapshot()
    }

    pub fn stats(&self) -> &Arc<SwitchStats> {
        &self.stats
    }

    /// Block until every update submitted so far has been applied.
    pub fn wait_for_state_updates(&self) {
        self.updater.wait_for_updates();
    }

    /// Stop the timers (sending final router advertisements), then the
    /// update consumer. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.timer_thread.take()
            && handle.join().is_err()
        {
            error!("timer thread panicked");
        }
        self.updater.stop();
        if let Some(handle) = self.consumer_thread.take()
            && handle.join().is_err()
        {
            error!("state update thread panicked");
        }
        info!("slow path stopped");
    }
}

impl Drop for Switch {
    fn drop(&mut self) {
        if self.consumer_thread.is_some() || self.timer_thread.is_some() {
            self.shutdown();
        }
    }
}
