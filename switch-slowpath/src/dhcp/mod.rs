//! DHCP message models.
//!
//! This module provides:
//! - `v4`: BOOTP/DHCPv4 messages and relay-agent option rewriting
//! - `v6`: DHCPv6 client/server and relay messages

pub mod v4;
pub mod v6;

pub use v4::DhcpV4Packet;
pub use v6::{DhcpV6Header, DhcpV6Option, DhcpV6Packet};
