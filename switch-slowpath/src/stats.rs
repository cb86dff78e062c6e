//! Named slow-path counters.
//!
//! Counters are the only operator-visible record of dropped or rewritten
//! frames, so every drop site increments one of these.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($variant:ident => $name:literal,)+) => {
        /// A slow-path counter.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Counter {
            $($variant,)+
        }

        impl Counter {
            /// Every counter, in declaration order.
            pub const ALL: &'static [Counter] = &[$(Counter::$variant,)+];

            /// Exported counter name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Counter::$variant => $name,)+
                }
            }
        }
    };
}

counters! {
    TrappedPkts => "trapped.pkts",
    TrappedUnhandled => "trapped.unhandled",
    ParseTruncated => "parse_error.truncated",
    ParseMalformed => "parse_error.malformed",
    EncodeError => "encode_error",
    PktDropped => "pkt_dropped",
    PktToHost => "pkt_to_host",
    Dhcpv4Pkt => "dhcpV4.pkt",
    Dhcpv4BadPkt => "dhcpV4.bad_pkt",
    Dhcpv4DropPkt => "dhcpV4.drop_pkt",
    Dhcpv6Pkt => "dhcpV6.pkt",
    Dhcpv6BadPkt => "dhcpV6.bad_pkt",
    Dhcpv6DropPkt => "dhcpV6.drop_pkt",
    Ipv6BadPayloadLength => "ipv6.bad_payload_length",
    Ipv6HopExceeded => "ipv6.hop_exceeded",
    Ipv6PacketTooBig => "ipv6.packet_too_big",
    Ipv6DstLookupFailure => "ipv6.dst_lookup_failure",
    Icmpv6BadChecksum => "icmpv6.bad_checksum",
    NdpPkt => "ipv6.ndp",
    NdpBad => "ipv6.ndp_bad",
    NdpNotMine => "ipv6.ndp_not_mine",
    NeighborSolicitationsSent => "ndp.solicitations_sent",
    NeighborProbesSent => "ndp.probes_sent",
    NeighborAdvertisementsSent => "ndp.advertisements_sent",
    NeighborExpired => "ndp.expired",
    RouterAdvertisementsSent => "router_advertisements",
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Process-wide counter block shared by handlers and background tasks.
pub struct SwitchStats {
    values: Box<[AtomicU64]>,
}

impl SwitchStats {
    pub fn new() -> Self {
        Self {
            values: Counter::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.values[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter as usize].load(Ordering::Relaxed)
    }

    /// Non-zero counters keyed by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Counter::ALL
            .iter()
            .map(|c| (c.name(), self.get(*c)))
            .filter(|(_, v)| *v > 0)
            .collect()
    }
}

impl Default for SwitchStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SwitchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}
