//! Error taxonomy for the slow path.
//!
//! - `ParseError`: the frame could not be decoded (always per-frame)
//! - `WriteError`: a header did not fit the buffer it was written into
//! - `ProtocolViolation`: decodable, but the protocol forbids relaying it
//! - `ResourceUnavailable`: configuration or state needed to act is missing
//!
//! A mutation whose target vanished before it was applied is not an error at
//! all: the update abstains (see `state::update`).

use std::net::IpAddr;

use thiserror::Error;

use crate::state::VlanId;

/// Decoding failure for a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated {what}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("malformed {what}: {reason}")]
    Malformed {
        what: &'static str,
        reason: &'static str,
    },
}

impl ParseError {
    pub(crate) fn malformed(what: &'static str, reason: &'static str) -> Self {
        ParseError::Malformed { what, reason }
    }
}

/// Serialization overran a pre-sized buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("buffer too small: need {needed} bytes, {remaining} remaining")]
    BufferTooSmall { needed: usize, remaining: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("relay agent information option already present")]
    AgentOptionPresent,
    #[error("hop count {0} at relay limit")]
    HopLimit(u8),
    #[error("TTL {0} too low to relay")]
    TtlExpired(u8),
    #[error("message length {len} exceeds maximum {max}")]
    TooLong { len: usize, max: usize },
    #[error("not a DHCP message")]
    NotDhcp,
    #[error("legacy BOOTP packet without magic cookie")]
    Bootp,
    #[error("unsupported BOOTP op code {0}")]
    UnknownOp(u8),
    #[error("malformed options: {0}")]
    BadOptions(&'static str),
    #[error("missing {0} option")]
    MissingOption(&'static str),
    #[error("invalid {0}")]
    InvalidField(&'static str),
}

impl ProtocolViolation {
    /// Whether the violation marks the packet itself as bad, as opposed to
    /// merely undeliverable.
    pub fn is_bad_packet(&self) -> bool {
        !matches!(
            self,
            ProtocolViolation::Bootp
                | ProtocolViolation::MissingOption(_)
                | ProtocolViolation::InvalidField(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceUnavailable {
    #[error("packet received without a VLAN")]
    NoVlan,
    #[error("unknown VLAN {0}")]
    UnknownVlan(VlanId),
    #[error("no DHCP relay server configured for VLAN {0}")]
    NoRelayServer(VlanId),
    #[error("no usable source address on VLAN {0}")]
    NoSourceAddress(VlanId),
    #[error("no interface owns {0}")]
    NoInterface(IpAddr),
}

/// Per-frame outcome of a protocol handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Unavailable(#[from] ResourceUnavailable),
    #[error(transparent)]
    Encode(#[from] WriteError),
}
