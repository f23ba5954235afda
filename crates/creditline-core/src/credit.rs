//! Credit ledger.
//!
//! Every link holds one [`CreditEntry`] per direction. `send` and `recv` top
//! the entry up through a [`CreditRequest`] and then consume one unit per
//! message moved. Running out of credit is flow control, not failure: the
//! entry turns `blocked` and the caller simply makes no further progress.
//!
//! The ledger is the local half of flow control. A sender is additionally
//! held to the credit its peer advertises for the link (see [`crate::link`]).
//!
//! # Invariants
//!
//! - `used <= granted` holds for every entry after every operation.
//! - A capped entry never offers more than its cap, unbounded requests included.

use crate::delivery::Direction;
use crate::error::CreditError;
use creditline_transport::LinkHandle;
use std::collections::HashMap;

/// Sentinel `granted` value meaning "no limit for this call"
pub const UNBOUNDED_CREDIT: u64 = u64::MAX;

/// Credit requested by a `send` or `recv` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreditRequest {
    /// Unlimited credit, scoped to the requesting call
    Unbounded,
    /// Top up by exactly this many units; the call moves at most this many
    Exact(u64),
    /// Request nothing; drain whatever credit is already granted
    None,
}

impl CreditRequest {
    /// Map the conventional signed count (`-1` unbounded, `0` none, `n` exact)
    #[must_use]
    pub fn from_signed(n: i64) -> Self {
        match n {
            n if n < 0 => CreditRequest::Unbounded,
            0 => CreditRequest::None,
            n => CreditRequest::Exact(n.unsigned_abs()),
        }
    }

    /// Maximum number of messages a single call may move
    #[must_use]
    pub fn call_limit(self) -> usize {
        match self {
            CreditRequest::Exact(n) => usize::try_from(n).unwrap_or(usize::MAX),
            CreditRequest::Unbounded | CreditRequest::None => usize::MAX,
        }
    }
}

/// Credit state for one link in one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditEntry {
    window: Option<u64>,
    granted: u64,
    used: u64,
    blocked: bool,
    /// The grant came from `Unbounded` and ends with the call
    call_scoped: bool,
}

impl CreditEntry {
    /// Create an empty entry; `window` caps the credit that may be available at once
    #[must_use]
    pub fn new(window: Option<u64>) -> Self {
        Self {
            window,
            granted: 0,
            used: 0,
            blocked: false,
            call_scoped: false,
        }
    }

    /// Configured capacity (`None` = unlimited)
    #[must_use]
    pub fn window(&self) -> Option<u64> {
        self.window
    }

    /// Credit granted since the last replenishment
    #[must_use]
    pub fn granted(&self) -> u64 {
        self.granted
    }

    /// Credit consumed since the last replenishment
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Whether the entry currently holds an unbounded grant
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.granted == UNBOUNDED_CREDIT
    }

    /// Units that may still be consumed
    #[must_use]
    pub fn available(&self) -> u64 {
        self.granted - self.used
    }

    /// Whether the last consume exhausted the credit
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Replenish the entry.
    ///
    /// Leftover credit carries over; `used` restarts from zero. Under a cap an
    /// unbounded request grants the cap for the rest of the call.
    pub fn request(&mut self, request: CreditRequest) {
        if !self.call_scoped {
            self.granted -= self.used;
            self.used = 0;
        }

        match request {
            CreditRequest::Unbounded => {
                self.granted = self.window.unwrap_or(UNBOUNDED_CREDIT);
                self.used = 0;
                self.blocked = false;
                self.call_scoped = true;
            }
            CreditRequest::Exact(n) => {
                if self.call_scoped {
                    return;
                }
                let mut granted = self.granted.saturating_add(n);
                if let Some(cap) = self.window {
                    granted = granted.min(cap.max(self.granted));
                }
                if granted > self.granted {
                    self.blocked = false;
                }
                self.granted = granted;
            }
            CreditRequest::None => {}
        }
    }

    /// Consume `count` units.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InsufficientCredit` if `used + count > granted`;
    /// the entry is left unchanged.
    pub fn consume(&mut self, count: u64) -> Result<(), CreditError> {
        let available = self.available();
        if count > available {
            self.blocked = true;
            return Err(CreditError::InsufficientCredit {
                requested: count,
                available,
            });
        }

        self.used += count;
        if !self.is_unbounded() && self.used == self.granted {
            self.blocked = true;
        }
        Ok(())
    }

    /// Close the call that requested credit: an unbounded grant does not outlive it
    pub fn end_call(&mut self) {
        if self.call_scoped {
            self.granted = self.used;
            self.call_scoped = false;
        }
    }
}

/// Credit entries for every link and direction
#[derive(Debug, Default)]
pub struct CreditLedger {
    window: Option<u64>,
    entries: HashMap<(LinkHandle, Direction), CreditEntry>,
}

impl CreditLedger {
    /// Create a ledger whose entries are capped at `window` units (`None` = unlimited)
    #[must_use]
    pub fn new(window: Option<u64>) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    fn entry_mut(&mut self, link: LinkHandle, direction: Direction) -> &mut CreditEntry {
        let window = self.window;
        self.entries
            .entry((link, direction))
            .or_insert_with(|| CreditEntry::new(window))
    }

    /// Entry for a link and direction, if any credit was ever requested
    #[must_use]
    pub fn entry(&self, link: LinkHandle, direction: Direction) -> Option<&CreditEntry> {
        self.entries.get(&(link, direction))
    }

    /// Top up send credit on `link`
    pub fn request_send_credit(&mut self, link: LinkHandle, request: CreditRequest) {
        self.entry_mut(link, Direction::Outgoing).request(request);
    }

    /// Top up receive credit on `link`
    pub fn request_recv_credit(&mut self, link: LinkHandle, request: CreditRequest) {
        self.entry_mut(link, Direction::Incoming).request(request);
    }

    /// Consume credit on `link` in `direction`.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InsufficientCredit` when the entry cannot cover `count`.
    pub fn consume(
        &mut self,
        link: LinkHandle,
        direction: Direction,
        count: u64,
    ) -> Result<(), CreditError> {
        self.entry_mut(link, direction).consume(count)
    }

    /// Units still available on `link` in `direction`
    #[must_use]
    pub fn available(&self, link: LinkHandle, direction: Direction) -> u64 {
        self.entry(link, direction)
            .map_or(0, CreditEntry::available)
    }

    /// Whether `link` ran out of credit in `direction`
    #[must_use]
    pub fn is_blocked(&self, link: LinkHandle, direction: Direction) -> bool {
        self.entry(link, direction)
            .is_some_and(CreditEntry::is_blocked)
    }

    /// Close the current call on every entry
    pub fn end_call(&mut self) {
        for entry in self.entries.values_mut() {
            entry.end_call();
        }
    }

    /// Forget both entries of a link
    pub fn remove_link(&mut self, link: LinkHandle) {
        self.entries.remove(&(link, Direction::Outgoing));
        self.entries.remove(&(link, Direction::Incoming));
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&(LinkHandle, Direction), &CreditEntry)> {
        self.entries.iter()
    }
}
