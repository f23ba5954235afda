//! Link bookkeeping.
//!
//! A link is one peer relationship as the endpoint sees it. Each end has its
//! own state:
//!
//! ```text
//!   local:  Uninitialized --open--> Active --teardown--> Closed
//!   remote: Uninitialized --first frame/Opened--> Active --teardown--> Closed
//! ```
//!
//! Transfers that arrive before receive credit is available wait in the
//! link's backlog; credit and windows themselves live in the ledger and the
//! tracker, keyed by the link handle.
//!
//! # Link credit
//!
//! Each end also counts transfers so the receiver can hold the sender back.
//! The receiver advertises a transfer limit as `(received, credit)`; the
//! sender may transfer while `sent < received + credit`. Until the first
//! advertisement arrives both ends assume [`DEFAULT_LINK_CREDIT`].
//!
//! ```text
//!   sender                               receiver
//!   sent=0  limit=1024                   received=0  advertised=1024
//!     ── Transfer ×n ──────────────────►   backlog += n
//!                                          recv() drains the backlog
//!     ◄────────────── Flow(received, credit)
//!   limit = received + credit
//! ```

use crate::error::LinkError;
use crate::message::Message;
use creditline_transport::{Address, LinkHandle};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Transfers a sender may have outstanding on a fresh link before the
/// receiver advertises otherwise
pub const DEFAULT_LINK_CREDIT: u64 = 1024;

/// State of one end of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Not opened yet
    Uninitialized,
    /// Open and usable
    Active,
    /// Torn down
    Closed,
}

/// One peer relationship
#[derive(Debug)]
pub struct Link {
    handle: LinkHandle,
    peer: Address,
    local_state: EndpointState,
    remote_state: EndpointState,
    /// Transfers waiting for receive credit: (sender's delivery id, message)
    backlog: VecDeque<(u64, Message)>,
    last_activity: Instant,
    frames_sent: u64,
    frames_received: u64,
    /// Transfers we sent, and the limit the peer allows
    transfers_sent: u64,
    peer_limit: u64,
    /// Transfers we received, and the limit we last advertised
    transfers_received: u64,
    advertised_limit: u64,
}

impl Link {
    /// Create a link in the `Uninitialized` state
    #[must_use]
    pub fn new(handle: LinkHandle, peer: Address) -> Self {
        Self {
            handle,
            peer,
            local_state: EndpointState::Uninitialized,
            remote_state: EndpointState::Uninitialized,
            backlog: VecDeque::new(),
            last_activity: Instant::now(),
            frames_sent: 0,
            frames_received: 0,
            transfers_sent: 0,
            peer_limit: DEFAULT_LINK_CREDIT,
            transfers_received: 0,
            advertised_limit: DEFAULT_LINK_CREDIT,
        }
    }

    /// Transport handle of the link
    #[must_use]
    pub fn handle(&self) -> LinkHandle {
        self.handle
    }

    /// Peer address (host only)
    #[must_use]
    pub fn peer(&self) -> &Address {
        &self.peer
    }

    /// State of our end
    #[must_use]
    pub fn local_state(&self) -> EndpointState {
        self.local_state
    }

    /// State of the peer's end, as far as we know
    #[must_use]
    pub fn remote_state(&self) -> EndpointState {
        self.remote_state
    }

    /// Check if a transition is valid
    #[must_use]
    pub fn can_transition(from: EndpointState, to: EndpointState) -> bool {
        match (from, to) {
            (EndpointState::Uninitialized, EndpointState::Active | EndpointState::Closed) => true,
            (EndpointState::Active, EndpointState::Active | EndpointState::Closed) => true,
            (EndpointState::Closed, EndpointState::Closed) => true,
            _ => false,
        }
    }

    fn transition(
        state: &mut EndpointState,
        to: EndpointState,
        side: &str,
        handle: LinkHandle,
    ) -> Result<(), LinkError> {
        if !Self::can_transition(*state, to) {
            return Err(LinkError::InvalidState { from: *state, to });
        }
        let old = *state;
        *state = to;
        if old != to {
            tracing::debug!(
                "Link {} {} state transition: {:?} -> {:?}",
                handle,
                side,
                old,
                to
            );
        }
        Ok(())
    }

    /// Transition our end.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::InvalidState` if the transition is not allowed.
    pub fn transition_local(&mut self, to: EndpointState) -> Result<(), LinkError> {
        Self::transition(&mut self.local_state, to, "local", self.handle)
    }

    /// Transition the peer's end.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::InvalidState` if the transition is not allowed.
    pub fn transition_remote(&mut self, to: EndpointState) -> Result<(), LinkError> {
        Self::transition(&mut self.remote_state, to, "remote", self.handle)
    }

    /// Mark both ends closed and drop the backlog, returning how many transfers were dropped
    pub fn close(&mut self) -> usize {
        self.local_state = EndpointState::Closed;
        self.remote_state = EndpointState::Closed;
        let dropped = self.backlog.len();
        self.backlog.clear();
        dropped
    }

    /// Queue an inbound transfer until receive credit admits it
    pub fn push_backlog(&mut self, remote_id: u64, message: Message) {
        self.transfers_received += 1;
        if self.transfers_received > self.advertised_limit {
            tracing::debug!(
                "{} transfer {} arrived beyond the advertised limit {}",
                self.handle,
                self.transfers_received,
                self.advertised_limit
            );
        }
        self.backlog.push_back((remote_id, message));
    }

    /// Take the oldest waiting transfer
    pub fn pop_backlog(&mut self) -> Option<(u64, Message)> {
        self.backlog.pop_front()
    }

    /// Transfers waiting for receive credit
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Record an outbound frame
    pub fn record_sent(&mut self) {
        self.frames_sent += 1;
        self.last_activity = Instant::now();
    }

    /// Record an inbound frame
    pub fn record_received(&mut self) {
        self.frames_received += 1;
        self.last_activity = Instant::now();
    }

    /// Frames sent on this link
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames received on this link
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Time since the last frame in either direction
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    // ===== Link credit =====

    /// Record an outbound transfer against the peer's limit
    pub fn record_transfer(&mut self) {
        self.transfers_sent += 1;
        self.record_sent();
    }

    /// Transfers the peer currently allows
    #[must_use]
    pub fn peer_credit(&self) -> u64 {
        self.peer_limit.saturating_sub(self.transfers_sent)
    }

    /// Apply the peer's advertisement: it had received `received` transfers
    /// and will take `credit` more
    pub fn apply_flow(&mut self, received: u64, credit: u64) {
        self.peer_limit = received.saturating_add(credit);
        tracing::debug!(
            "{} peer credit now {} ({} sent, limit {})",
            self.handle,
            self.peer_credit(),
            self.transfers_sent,
            self.peer_limit
        );
    }

    /// Transfers received on this link
    #[must_use]
    pub fn transfers_received(&self) -> u64 {
        self.transfers_received
    }

    /// Transfers the peer may still send under our last advertisement
    #[must_use]
    pub fn advertised_credit(&self) -> u64 {
        self.advertised_limit.saturating_sub(self.transfers_received)
    }

    /// Decide whether to advertise `room` more transfers.
    ///
    /// Returns the credit to put on the wire when the new limit grows past the
    /// advertised one by at least `threshold`, and records it as advertised.
    pub fn credit_update(&mut self, room: u64, threshold: u64) -> Option<u64> {
        let limit = self.transfers_received.saturating_add(room);
        if limit <= self.advertised_limit || limit - self.advertised_limit < threshold {
            return None;
        }
        self.advertised_limit = limit;
        Some(room)
    }

    /// Advertise exactly `room` more transfers, even if that shrinks the limit
    pub fn reset_credit(&mut self, room: u64) -> u64 {
        self.advertised_limit = self.transfers_received.saturating_add(room);
        room
    }
}

/// Snapshot of one link for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStats {
    /// Peer address
    pub peer: String,
    /// State of our end
    pub local_state: EndpointState,
    /// State of the peer's end
    pub remote_state: EndpointState,
    /// Send credit still available
    pub send_credit: u64,
    /// Receive credit still available
    pub recv_credit: u64,
    /// Messages buffered for this peer, not yet sent
    pub queued: usize,
    /// Inbound transfers waiting for receive credit
    pub backlog: usize,
    /// Outgoing deliveries holding a window slot
    pub unsettled_outgoing: usize,
    /// Incoming deliveries holding a window slot
    pub unsettled_incoming: usize,
    /// Send credit ran out
    pub send_blocked: bool,
    /// Receive credit ran out
    pub recv_blocked: bool,
    /// Frames sent on the link
    pub frames_sent: u64,
    /// Frames received on the link
    pub frames_received: u64,
    /// Transfers the peer currently allows us
    pub peer_credit: u64,
    /// Transfers the peer may still send under our advertisement
    pub advertised_credit: u64,
    /// Time since the last frame in either direction
    pub idle: Duration,
}
