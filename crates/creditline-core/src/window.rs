//! Sliding window tracker.
//!
//! The tracker owns every live [`Delivery`] of an endpoint and keeps, per link
//! and direction, the ordered set of deliveries still holding a window slot:
//!
//! ```text
//!            oldest                                 newest
//! link-1/out [ out-3 | out-4 | out-7 | ... | out-12 ]  <- admit
//!               |
//!               +-- evicted first once len > outgoing_window
//! ```
//!
//! Admission never blocks. When a window grows past its bound the oldest
//! entries are settled on the spot and handed back to the caller, which tells
//! the peer and reports them to the application.
//!
//! Settled deliveries are removed. Handles stay meaningful afterwards:
//! [`WindowTracker::status`] reports `Settled` for any handle this tracker has
//! issued but no longer holds.

use crate::delivery::{Delivery, DeliveryHandle, DeliveryState, Direction, Disposition};
use creditline_transport::LinkHandle;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Outcome of admitting an incoming delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Handle of the admitted delivery
    pub handle: DeliveryHandle,
    /// Older deliveries settled to make room, oldest first
    pub evicted: Vec<Delivery>,
}

/// Deliveries released by a lost link
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reclaim {
    /// Deliveries settled locally (all incoming, plus outgoing ones the peer had resolved)
    pub settled: Vec<Delivery>,
    /// Outgoing deliveries left in `UnknownOutcome`
    pub unknown: Vec<DeliveryHandle>,
}

/// Bounded per-link, per-direction windows of unsettled deliveries
#[derive(Debug, Default)]
pub struct WindowTracker {
    bounds: [Option<usize>; 2],
    next_id: [u64; 2],
    deliveries: HashMap<DeliveryHandle, Delivery>,
    windows: HashMap<(LinkHandle, Direction), BTreeSet<DeliveryHandle>>,
    remote_index: HashMap<(LinkHandle, u64), DeliveryHandle>,
}

impl WindowTracker {
    /// Create a tracker with the given bounds (`None` or `Some(0)` = unbounded)
    #[must_use]
    pub fn new(outgoing_window: Option<usize>, incoming_window: Option<usize>) -> Self {
        let mut tracker = Self::default();
        tracker.set_bound(Direction::Outgoing, outgoing_window);
        tracker.set_bound(Direction::Incoming, incoming_window);
        tracker
    }

    /// Change the bound for one direction
    pub fn set_bound(&mut self, direction: Direction, bound: Option<usize>) {
        self.bounds[direction.index()] = bound.filter(|&b| b > 0);
    }

    /// Bound for one direction (`None` = unbounded)
    #[must_use]
    pub fn bound(&self, direction: Direction) -> Option<usize> {
        self.bounds[direction.index()]
    }

    fn next_handle(&mut self, direction: Direction) -> DeliveryHandle {
        let slot = &mut self.next_id[direction.index()];
        let handle = DeliveryHandle::new(direction, *slot);
        *slot += 1;
        handle
    }

    /// Create a `Pending` outgoing delivery for a buffered message
    pub fn reserve(&mut self) -> DeliveryHandle {
        let handle = self.next_handle(Direction::Outgoing);
        self.deliveries.insert(handle, Delivery::pending(handle));
        handle
    }

    /// Move a pending delivery onto `link`, taking a window slot.
    ///
    /// Returns the deliveries evicted to stay within the bound, or `None` if
    /// `handle` is not a pending delivery of this tracker.
    pub fn admit_outgoing(
        &mut self,
        handle: DeliveryHandle,
        link: LinkHandle,
    ) -> Option<Vec<Delivery>> {
        let delivery = self.deliveries.get_mut(&handle)?;
        if delivery.state() != DeliveryState::Pending {
            return None;
        }
        delivery.mark_sent(link);

        self.windows
            .entry((link, Direction::Outgoing))
            .or_default()
            .insert(handle);
        debug!("Admitted {} on {}", handle, link);

        Some(self.enforce_bound(link, Direction::Outgoing))
    }

    /// Admit a delivery that arrived on `link` under the sender's id `remote_id`
    pub fn admit_incoming(&mut self, link: LinkHandle, remote_id: u64) -> Admission {
        let handle = self.next_handle(Direction::Incoming);
        self.deliveries
            .insert(handle, Delivery::received(handle, link, remote_id));
        self.remote_index.insert((link, remote_id), handle);
        self.windows
            .entry((link, Direction::Incoming))
            .or_default()
            .insert(handle);
        debug!("Admitted {} on {} (remote id {})", handle, link, remote_id);

        let evicted = self.enforce_bound(link, Direction::Incoming);
        Admission { handle, evicted }
    }

    fn enforce_bound(&mut self, link: LinkHandle, direction: Direction) -> Vec<Delivery> {
        let Some(bound) = self.bound(direction) else {
            return Vec::new();
        };

        let mut excess = Vec::new();
        if let Some(window) = self.windows.get_mut(&(link, direction)) {
            while window.len() > bound {
                match window.pop_first() {
                    Some(oldest) => excess.push(oldest),
                    None => break,
                }
            }
        }

        excess
            .into_iter()
            .filter_map(|handle| {
                let mut delivery = self.forget(handle)?;
                if direction == Direction::Incoming && delivery.disposition().is_none() {
                    delivery.set_disposition(Disposition::Accepted);
                }
                delivery.set_state(DeliveryState::Settled);
                Some(delivery)
            })
            .collect()
    }

    /// Drop a delivery from every index, returning it untouched
    fn forget(&mut self, handle: DeliveryHandle) -> Option<Delivery> {
        let delivery = self.deliveries.remove(&handle)?;
        if let Some(link) = delivery.link() {
            if let Some(window) = self.windows.get_mut(&(link, delivery.direction())) {
                window.remove(&handle);
            }
            if let Some(remote_id) = delivery.remote_id() {
                self.remote_index.remove(&(link, remote_id));
            }
        }
        Some(delivery)
    }

    /// Settle a delivery, freeing its slot.
    ///
    /// Returns the delivery as it was before settlement. Unknown or already
    /// settled handles return `None`; settling twice is harmless.
    pub fn settle(&mut self, handle: DeliveryHandle) -> Option<Delivery> {
        let delivery = self.forget(handle)?;
        debug!("Settled {} (was {:?})", handle, delivery.state());
        Some(delivery)
    }

    /// Unsettled deliveries on `link` in `direction`, oldest first
    #[must_use]
    pub fn peek(&self, link: LinkHandle, direction: Direction) -> Vec<DeliveryHandle> {
        self.windows
            .get(&(link, direction))
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Settle the first `position` entries of the window returned by [`Self::peek`]
    pub fn settle_all_before(
        &mut self,
        link: LinkHandle,
        direction: Direction,
        position: usize,
    ) -> Vec<Delivery> {
        let targets: Vec<DeliveryHandle> = self
            .windows
            .get(&(link, direction))
            .map(|w| w.iter().take(position).copied().collect())
            .unwrap_or_default();

        targets
            .into_iter()
            .filter_map(|handle| self.settle(handle))
            .collect()
    }

    /// Put a pending delivery that can no longer be transferred into `Aborted`
    pub fn abort(&mut self, handle: DeliveryHandle) -> bool {
        match self.deliveries.get_mut(&handle) {
            Some(delivery) if delivery.state() == DeliveryState::Pending => {
                delivery.set_state(DeliveryState::Aborted);
                true
            }
            _ => false,
        }
    }

    /// Mark a sent delivery whose outcome can no longer be learned.
    ///
    /// The delivery leaves its window but stays tracked until settled.
    pub fn mark_unknown(&mut self, handle: DeliveryHandle) -> bool {
        let Some(delivery) = self.deliveries.get_mut(&handle) else {
            return false;
        };
        if delivery.state() != DeliveryState::Sent {
            return false;
        }
        delivery.set_state(DeliveryState::UnknownOutcome);
        if let Some(link) = delivery.link() {
            if let Some(window) = self.windows.get_mut(&(link, Direction::Outgoing)) {
                window.remove(&handle);
            }
        }
        true
    }

    /// Release everything held by a lost link.
    ///
    /// Incoming deliveries are settled locally. Outgoing deliveries the peer
    /// already settled or gave an outcome for are settled too; the rest move
    /// to `UnknownOutcome` and stay queryable.
    pub fn reclaim_link(&mut self, link: LinkHandle) -> Reclaim {
        let mut reclaim = Reclaim::default();

        for handle in self
            .windows
            .remove(&(link, Direction::Incoming))
            .unwrap_or_default()
        {
            if let Some(mut delivery) = self.forget(handle) {
                delivery.set_state(DeliveryState::Settled);
                reclaim.settled.push(delivery);
            }
        }

        for handle in self
            .windows
            .remove(&(link, Direction::Outgoing))
            .unwrap_or_default()
        {
            let resolved = self
                .deliveries
                .get(&handle)
                .is_some_and(|d| d.is_remote_settled() || d.disposition().is_some());
            if resolved {
                if let Some(mut delivery) = self.forget(handle) {
                    delivery.set_state(DeliveryState::Settled);
                    reclaim.settled.push(delivery);
                }
            } else if self.mark_unknown(handle) {
                reclaim.unknown.push(handle);
            }
        }

        self.remote_index.retain(|(l, _), _| *l != link);
        reclaim
    }

    /// Incoming delivery the peer knows as `remote_id` on `link`
    #[must_use]
    pub fn find_incoming(&self, link: LinkHandle, remote_id: u64) -> Option<DeliveryHandle> {
        self.remote_index.get(&(link, remote_id)).copied()
    }

    /// Tracked delivery for `handle`
    #[must_use]
    pub fn get(&self, handle: DeliveryHandle) -> Option<&Delivery> {
        self.deliveries.get(&handle)
    }

    /// Mutable access to a tracked delivery
    pub fn get_mut(&mut self, handle: DeliveryHandle) -> Option<&mut Delivery> {
        self.deliveries.get_mut(&handle)
    }

    /// Whether this tracker ever issued `handle`
    #[must_use]
    pub fn issued(&self, handle: DeliveryHandle) -> bool {
        handle.id() < self.next_id[handle.direction().index()]
    }

    /// State of a delivery; `Settled` once it is no longer tracked
    #[must_use]
    pub fn status(&self, handle: DeliveryHandle) -> Option<DeliveryState> {
        match self.deliveries.get(&handle) {
            Some(delivery) => Some(delivery.state()),
            None if self.issued(handle) => Some(DeliveryState::Settled),
            None => None,
        }
    }

    /// Deliveries holding a slot on `link` in `direction`
    #[must_use]
    pub fn unsettled(&self, link: LinkHandle, direction: Direction) -> usize {
        self.windows.get(&(link, direction)).map_or(0, BTreeSet::len)
    }

    /// Deliveries holding a slot in `direction`, across all links
    #[must_use]
    pub fn unsettled_total(&self, direction: Direction) -> usize {
        self.windows
            .iter()
            .filter(|((_, d), _)| *d == direction)
            .map(|(_, w)| w.len())
            .sum()
    }

    /// Number of tracked deliveries in any state
    #[must_use]
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Returns true if nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Iterate over tracked deliveries in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Delivery> {
        self.deliveries.values()
    }
}
