//! Delivery lifecycle.
//!
//! A delivery is the tracked state of one message transfer, independent of the
//! payload. Outgoing deliveries move `Pending -> Sent -> Settled`; incoming
//! deliveries move `Received -> Settled`. A sent delivery whose link is lost
//! before settlement ends in `UnknownOutcome`, and a buffered delivery that
//! never reached a link ends in `Aborted`. Both are terminal but stay
//! queryable until the application settles them.

use crate::error::FrameError;
use creditline_transport::LinkHandle;
use std::fmt;

/// Direction of a delivery relative to the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Sent by this endpoint
    Outgoing,
    /// Received by this endpoint
    Incoming,
}

impl Direction {
    /// Index into per-direction arrays
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Direction::Outgoing => 0,
            Direction::Incoming => 1,
        }
    }
}

/// Application-visible handle of a delivery.
///
/// Identifiers are monotonic per direction within one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryHandle {
    direction: Direction,
    id: u64,
}

impl DeliveryHandle {
    /// Create a handle
    #[must_use]
    pub const fn new(direction: Direction, id: u64) -> Self {
        Self { direction, id }
    }

    /// Direction of the delivery
    #[must_use]
    pub const fn direction(self) -> Direction {
        self.direction
    }

    /// Identifier within its direction
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Outgoing => write!(f, "out-{}", self.id),
            Direction::Incoming => write!(f, "in-{}", self.id),
        }
    }
}

/// Local state of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Buffered by `put`, not yet transferred
    Pending,
    /// Transferred on a link, awaiting settlement
    Sent,
    /// Arrived on a link, awaiting settlement
    Received,
    /// Resolved; the window slot is free
    Settled,
    /// Link lost before settlement; the remote outcome is unknown
    UnknownOutcome,
    /// Never transferred because its link could not be used
    Aborted,
}

/// Outcome assigned by the receiving side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Disposition {
    /// Processed successfully
    Accepted = 0x01,
    /// Refused by the receiver
    Rejected = 0x02,
    /// Not processed; may be delivered elsewhere
    Released = 0x03,
}

impl TryFrom<u8> for Disposition {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Accepted),
            0x02 => Ok(Self::Rejected),
            0x03 => Ok(Self::Released),
            other => Err(FrameError::InvalidOutcome(other)),
        }
    }
}

/// In-flight state of one message transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    handle: DeliveryHandle,
    state: DeliveryState,
    link: Option<LinkHandle>,
    remote_id: Option<u64>,
    disposition: Option<Disposition>,
    remote_settled: bool,
}

impl Delivery {
    /// Outgoing delivery buffered by `put`
    #[must_use]
    pub fn pending(handle: DeliveryHandle) -> Self {
        Self {
            handle,
            state: DeliveryState::Pending,
            link: None,
            remote_id: None,
            disposition: None,
            remote_settled: false,
        }
    }

    /// Incoming delivery that arrived on `link` under the sender's id `remote_id`
    #[must_use]
    pub fn received(handle: DeliveryHandle, link: LinkHandle, remote_id: u64) -> Self {
        Self {
            handle,
            state: DeliveryState::Received,
            link: Some(link),
            remote_id: Some(remote_id),
            disposition: None,
            remote_settled: false,
        }
    }

    /// Handle of this delivery
    #[must_use]
    pub fn handle(&self) -> DeliveryHandle {
        self.handle
    }

    /// Direction of this delivery
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.handle.direction()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Owning link, once transferred
    #[must_use]
    pub fn link(&self) -> Option<LinkHandle> {
        self.link
    }

    /// Identifier the peer uses for this delivery (incoming only)
    #[must_use]
    pub fn remote_id(&self) -> Option<u64> {
        self.remote_id
    }

    /// Identifier to put on the wire when talking to the peer about this delivery
    #[must_use]
    pub fn wire_id(&self) -> u64 {
        self.remote_id.unwrap_or(self.handle.id())
    }

    /// Outcome: remote for outgoing deliveries, local for incoming ones
    #[must_use]
    pub fn disposition(&self) -> Option<Disposition> {
        self.disposition
    }

    /// Whether the peer has already settled its side
    #[must_use]
    pub fn is_remote_settled(&self) -> bool {
        self.remote_settled
    }

    /// Record the transfer of a pending delivery
    pub(crate) fn mark_sent(&mut self, link: LinkHandle) {
        self.state = DeliveryState::Sent;
        self.link = Some(link);
    }

    pub(crate) fn set_state(&mut self, state: DeliveryState) {
        self.state = state;
    }

    pub(crate) fn set_disposition(&mut self, disposition: Disposition) {
        self.disposition = Some(disposition);
    }

    pub(crate) fn mark_remote_settled(&mut self) {
        self.remote_settled = true;
    }
}
