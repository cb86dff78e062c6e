//! Test utilities for driving the slow path without hardware
//!
//! This module provides:
//! - `RecordingIo`: a `PacketIo` that keeps every frame it is handed
//! - `TestFrame`: builders for the frames a switch traps to the CPU
//! - `Harness`: a small switch (one routed VLAN with relay servers, one bare
//!   VLAN) with its update queue applied on demand

pub mod frames;
pub mod harness;
pub mod io;

pub use frames::{CLIENT_MAC, CPU_MAC, TestFrame};
pub use harness::Harness;
pub use io::RecordingIo;
