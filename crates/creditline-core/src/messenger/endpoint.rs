//! The messaging endpoint.
//!
//! ```text
//!  put ──► outbox ──send(n)──► [send credit + peer credit] ──► transport ──► peer
//!                                  │
//!                                  └─► outgoing window ──settle/evict──► Settle frame
//!
//!  peer ──► transport ──► link backlog ──recv(n)──► [recv credit] ──► received ──get──► app
//!                              │                        │
//!                              │                        └─► incoming window ──accept/reject──► Disposition frame
//!                              └─► drained ──► Flow frame (peer credit)
//! ```
//!
//! A peer may run at most `link_prefetch` transfers ahead of our `recv` (or
//! the receive credit left over from `recv`, if larger); past that its `send`
//! leaves messages buffered until `recv` frees room. Until our first `Flow`
//! reaches it, a peer assumes [`DEFAULT_LINK_CREDIT`].
//!
//! All state sits behind one mutex, so every operation is applied atomically
//! with respect to every other, including disconnect handling. Transport
//! events are drained lazily at the start of the operations that depend on
//! them; [`Endpoint::process_events`] drains them on demand.

use super::error::{MessengerError, Result};
use crate::config::EndpointConfig;
use crate::credit::{CreditLedger, CreditRequest};
use crate::delivery::{Delivery, DeliveryHandle, DeliveryState, Direction, Disposition};
use crate::frame::WireFrame;
use crate::link::{DEFAULT_LINK_CREDIT, EndpointState, Link, LinkStats};
use crate::message::Message;
use crate::window::WindowTracker;
use creditline_transport::{
    Address, EventReceiver, LinkHandle, MemoryNetwork, Transport, TransportError, TransportEvent,
    TransportStats,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Most auto-settled handles kept for [`Endpoint::take_auto_settled`]
pub const AUTO_SETTLED_REPORT_LIMIT: usize = 1024;

/// Endpoint lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, never started
    Created,
    /// Accepting `send` and `recv`
    Started,
    /// Stopped; deliveries and buffered messages are kept
    Stopped,
}

/// A buffered message waiting for `send`
#[derive(Debug)]
struct Outbound {
    handle: DeliveryHandle,
    peer: Address,
    message: Message,
}

struct EndpointInner {
    transport: Arc<dyn Transport>,
    config: EndpointConfig,
    lifecycle: Lifecycle,
    ledger: CreditLedger,
    tracker: WindowTracker,
    links: BTreeMap<LinkHandle, Link>,
    by_peer: HashMap<String, LinkHandle>,
    outbox: VecDeque<Outbound>,
    received: VecDeque<(DeliveryHandle, Message)>,
    current: Option<DeliveryHandle>,
    auto_settled: VecDeque<DeliveryHandle>,
}

/// A credit-flow messaging endpoint.
///
/// `Endpoint` is `Send + Sync`; share it with an `Arc` to call it from
/// several threads. Calls never block on credit: `send` and `recv` return
/// how many messages they moved, which may be zero.
pub struct Endpoint {
    name: String,
    address: String,
    events: EventReceiver,
    inner: Mutex<EndpointInner>,
}

fn random_name() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

impl Endpoint {
    /// Create an endpoint over an existing transport.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidConfig` if `config` does not validate.
    pub fn new(
        config: EndpointConfig,
        transport: Arc<dyn Transport>,
        events: EventReceiver,
    ) -> Result<Self> {
        config.validate()?;

        let address = transport.local_address();
        let name = Address::parse(&address)
            .map(|a| a.host().to_string())
            .unwrap_or_else(|_| address.clone());

        let tracker = WindowTracker::new(config.outgoing_window, config.incoming_window);

        info!("Created endpoint {} at {}", name, address);

        Ok(Self {
            name,
            address,
            events,
            inner: Mutex::new(EndpointInner {
                transport,
                ledger: CreditLedger::new(config.link_credit_cap),
                tracker,
                config,
                lifecycle: Lifecycle::Created,
                links: BTreeMap::new(),
                by_peer: HashMap::new(),
                outbox: VecDeque::new(),
                received: VecDeque::new(),
                current: None,
                auto_settled: VecDeque::new(),
            }),
        })
    }

    /// Create an endpoint attached to an in-memory network.
    ///
    /// The node name is `config.name`, or a random 16-hex-digit name.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidConfig` if the configuration is invalid
    /// or the name is already taken on `network`.
    pub fn on_memory(network: &MemoryNetwork, mut config: EndpointConfig) -> Result<Self> {
        config.validate()?;
        let name = config.name.clone().unwrap_or_else(random_name);
        let attachment = network
            .attach(&name)
            .map_err(|e| MessengerError::InvalidConfig(e.to_string().into()))?;
        config.name = Some(name);
        Self::new(config, attachment.transport, attachment.events)
    }

    fn lock(&self) -> MutexGuard<'_, EndpointInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_fresh(&self) -> MutexGuard<'_, EndpointInner> {
        let mut inner = self.lock();
        inner.drain_events(&self.events);
        inner
    }

    /// Endpoint name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address peers use to reach this endpoint
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    /// Whether the endpoint is started
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lifecycle() == Lifecycle::Started
    }

    /// Start the endpoint. Starting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidState` if the transport is closed.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock_fresh();
        if inner.transport.is_closed() {
            return Err(MessengerError::invalid_state("transport is closed"));
        }
        if inner.lifecycle != Lifecycle::Started {
            info!("Endpoint {} started", self.name);
            inner.lifecycle = Lifecycle::Started;
        }
        Ok(())
    }

    /// Stop the endpoint.
    ///
    /// Admitted deliveries stay tracked and buffered messages stay buffered;
    /// links stay open.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.lifecycle == Lifecycle::Started {
            info!(
                "Endpoint {} stopped ({} buffered, {} unsettled outgoing, {} unsettled incoming)",
                self.name,
                inner.outbox.len(),
                inner.tracker.unsettled_total(Direction::Outgoing),
                inner.tracker.unsettled_total(Direction::Incoming)
            );
            inner.lifecycle = Lifecycle::Stopped;
        }
    }

    /// Stop the endpoint and close every link.
    ///
    /// Deliveries on the closed links are reclaimed exactly as on disconnect.
    pub fn close(&self) {
        let mut inner = self.lock_fresh();
        inner.lifecycle = Lifecycle::Stopped;
        let links: Vec<LinkHandle> = inner.links.keys().copied().collect();
        for link in links {
            if let Err(e) = inner.transport.close_link(link) {
                debug!("Closing {}: {}", link, e);
            }
            inner.reclaim(link);
        }
        info!("Endpoint {} closed", self.name);
    }

    /// Buffer a message for sending.
    ///
    /// A `reply_to` of `~` (or starting with `~/`) is expanded to this
    /// endpoint's address.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidAddress` if the message has no usable
    /// address and `MessengerError::MessageTooLarge` if the body exceeds
    /// `max_message_size`.
    pub fn put(&self, message: &Message) -> Result<DeliveryHandle> {
        let target = message
            .address()
            .ok_or(MessengerError::invalid_address("message has no address"))?;
        let target = Address::parse(target)?;

        let mut inner = self.lock();
        let max = inner.config.max_message_size;
        if message.body.len() > max {
            return Err(MessengerError::MessageTooLarge {
                size: message.body.len(),
                max,
            });
        }

        let mut message = message.clone();
        if let Some(reply_to) = message.reply_to() {
            if reply_to == "~" {
                message.set_reply_to(self.address.clone());
            } else if let Some(rest) = reply_to.strip_prefix("~/") {
                let expanded = format!("{}/{}", self.address, rest);
                message.set_reply_to(expanded);
            }
        }

        let handle = inner.tracker.reserve();
        debug!("Buffered {} for {}", handle, target);
        inner.outbox.push_back(Outbound {
            handle,
            peer: target.peer(),
            message,
        });
        Ok(handle)
    }

    /// Transfer buffered messages, consuming send credit.
    ///
    /// `request` bounds this call; each link is further held to the credit
    /// its peer advertised. Returns the number of messages transferred.
    /// Messages without credit stay buffered; messages whose peer cannot be
    /// reached become `Aborted`.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidState` unless started, or the transport
    /// error if the transport itself failed before anything was sent.
    pub fn send(&self, request: CreditRequest) -> Result<usize> {
        let mut inner = self.lock_fresh();
        inner.ensure_started()?;
        inner.send(request)
    }

    /// Admit inbound transfers, consuming receive credit.
    ///
    /// Returns the number of messages added to the receive queue. Links whose
    /// backlog drained far enough are granted fresh credit with a `Flow` frame.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidState` unless started.
    pub fn recv(&self, request: CreditRequest) -> Result<usize> {
        let mut inner = self.lock_fresh();
        inner.ensure_started()?;
        Ok(inner.recv(request))
    }

    /// Move the oldest received message into `slot`.
    ///
    /// The returned delivery becomes the target of [`Self::accept`] and
    /// [`Self::reject`].
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::NoMessageAvailable` if the receive queue is empty.
    pub fn get(&self, slot: &mut Message) -> Result<DeliveryHandle> {
        let mut inner = self.lock();
        let (handle, message) = inner
            .received
            .pop_front()
            .ok_or(MessengerError::NoMessageAvailable)?;
        *slot = message;
        inner.current = Some(handle);
        debug!("Got {}", handle);
        Ok(handle)
    }

    /// Accept and settle the delivery last returned by `get`
    pub fn accept(&self) -> Option<DeliveryHandle> {
        self.lock().dispose(Disposition::Accepted)
    }

    /// Reject and settle the delivery last returned by `get`
    pub fn reject(&self) -> Option<DeliveryHandle> {
        self.lock().dispose(Disposition::Rejected)
    }

    /// Settle a delivery by handle.
    ///
    /// Returns false if the handle is unknown or already settled. Settling a
    /// buffered message removes it from the send buffer.
    pub fn settle(&self, handle: DeliveryHandle) -> bool {
        self.lock().settle(handle)
    }

    /// Unsettled deliveries on `link` in `direction`, oldest first
    #[must_use]
    pub fn peek(&self, link: LinkHandle, direction: Direction) -> Vec<DeliveryHandle> {
        self.lock_fresh().tracker.peek(link, direction)
    }

    /// Settle the first `position` deliveries returned by [`Self::peek`].
    ///
    /// Returns how many were settled.
    pub fn settle_all_before(
        &self,
        link: LinkHandle,
        direction: Direction,
        position: usize,
    ) -> usize {
        let mut inner = self.lock();
        let settled = inner.tracker.settle_all_before(link, direction, position);
        for delivery in &settled {
            inner.signal_settled(delivery);
        }
        settled.len()
    }

    /// Local state of a delivery (`None` if the handle was never issued)
    #[must_use]
    pub fn status(&self, handle: DeliveryHandle) -> Option<DeliveryState> {
        self.lock_fresh().tracker.status(handle)
    }

    /// Outcome of a delivery, if known.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::UnknownDeliveryOutcome` if the peer vanished
    /// before the delivery was resolved.
    pub fn disposition(&self, handle: DeliveryHandle) -> Result<Option<Disposition>> {
        let inner = self.lock_fresh();
        match inner.tracker.get(handle) {
            Some(d) if d.state() == DeliveryState::UnknownOutcome => {
                Err(MessengerError::UnknownDeliveryOutcome(handle))
            }
            Some(d) => Ok(d.disposition()),
            None => Ok(None),
        }
    }

    /// Deliveries in `UnknownOutcome` or `Aborted`, waiting for the application to settle them
    #[must_use]
    pub fn unresolved(&self) -> Vec<DeliveryHandle> {
        let inner = self.lock_fresh();
        let mut handles: Vec<DeliveryHandle> = inner
            .tracker
            .iter()
            .filter(|d| {
                matches!(
                    d.state(),
                    DeliveryState::UnknownOutcome | DeliveryState::Aborted
                )
            })
            .map(Delivery::handle)
            .collect();
        handles.sort();
        handles
    }

    /// Drain the deliveries auto-settled by window eviction since the last call.
    ///
    /// Only the newest [`AUTO_SETTLED_REPORT_LIMIT`] handles are kept between
    /// calls; older ones are dropped from the report (the deliveries themselves
    /// are settled either way).
    pub fn take_auto_settled(&self) -> Vec<DeliveryHandle> {
        self.lock().auto_settled.drain(..).collect()
    }

    /// Tear down a link whose peer is gone.
    ///
    /// Incoming deliveries are settled locally; unresolved outgoing ones move
    /// to `UnknownOutcome`. Unknown links are ignored.
    pub fn handle_disconnect(&self, link: LinkHandle) {
        self.lock().reclaim(link);
    }

    /// Apply pending transport events, returning how many were processed
    pub fn process_events(&self) -> usize {
        self.lock().drain_events(&self.events)
    }

    /// Messages buffered by `put` and not yet sent
    #[must_use]
    pub fn outgoing(&self) -> usize {
        self.lock().outbox.len()
    }

    /// Received messages waiting for `get`
    #[must_use]
    pub fn incoming(&self) -> usize {
        self.lock().received.len()
    }

    /// Open links
    #[must_use]
    pub fn links(&self) -> Vec<LinkHandle> {
        self.lock_fresh().links.keys().copied().collect()
    }

    /// Link currently used for the peer of `address`
    #[must_use]
    pub fn link_to(&self, address: &str) -> Option<LinkHandle> {
        let peer = Address::parse(address).ok()?.peer().to_string();
        self.lock_fresh().by_peer.get(&peer).copied()
    }

    /// Diagnostics for one link
    #[must_use]
    pub fn link_stats(&self, link: LinkHandle) -> Option<LinkStats> {
        self.lock_fresh().link_stats(link)
    }

    /// Counters of the underlying transport
    #[must_use]
    pub fn transport_stats(&self) -> TransportStats {
        self.lock().transport.stats()
    }

    /// Change the outgoing window.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidState` once the endpoint is started.
    pub fn set_outgoing_window(&self, window: Option<usize>) -> Result<()> {
        self.lock().set_window(Direction::Outgoing, window)
    }

    /// Change the incoming window.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidState` once the endpoint is started.
    pub fn set_incoming_window(&self, window: Option<usize>) -> Result<()> {
        self.lock().set_window(Direction::Incoming, window)
    }

    /// Configured window for `direction` (`None` = unbounded)
    #[must_use]
    pub fn window(&self, direction: Direction) -> Option<usize> {
        self.lock().tracker.bound(direction)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl EndpointInner {
    fn ensure_started(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Started => Ok(()),
            Lifecycle::Created => Err(MessengerError::invalid_state("endpoint not started")),
            Lifecycle::Stopped => Err(MessengerError::invalid_state("endpoint stopped")),
        }
    }

    fn set_window(&mut self, direction: Direction, window: Option<usize>) -> Result<()> {
        if self.lifecycle == Lifecycle::Started {
            return Err(MessengerError::invalid_state(
                "windows can only change before start",
            ));
        }
        match direction {
            Direction::Outgoing => self.config.outgoing_window = window,
            Direction::Incoming => self.config.incoming_window = window,
        }
        self.tracker.set_bound(direction, window);
        Ok(())
    }

    // ===== Transport events =====

    fn drain_events(&mut self, events: &EventReceiver) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
            count += 1;
        }
        count
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { link, peer } => self.on_opened(link, &peer),
            TransportEvent::FrameIn { link, frame } => self.on_frame(link, &frame),
            TransportEvent::Disconnected { link } => self.reclaim(link),
        }
    }

    fn on_opened(&mut self, link: LinkHandle, peer: &str) {
        let peer = match Address::parse(peer) {
            Ok(addr) => addr.peer(),
            Err(e) => {
                warn!("Ignoring {} from unparsable peer: {}", link, e);
                return;
            }
        };

        let entry = self
            .links
            .entry(link)
            .or_insert_with(|| Link::new(link, peer.clone()));
        for result in [
            entry.transition_local(EndpointState::Active),
            entry.transition_remote(EndpointState::Active),
        ] {
            if let Err(e) = result {
                debug!("{}: {}", link, e);
            }
        }
        self.by_peer.insert(peer.to_string(), link);
        info!("Accepted {} from {}", link, peer);
        self.advertise_prefetch(link);
    }

    fn on_frame(&mut self, link: LinkHandle, bytes: &[u8]) {
        let Some(entry) = self.links.get_mut(&link) else {
            warn!("Dropping frame on unknown {}", link);
            return;
        };
        entry.record_received();
        if let Err(e) = entry.transition_remote(EndpointState::Active) {
            debug!("{}: {}", link, e);
        }

        let frame = match WireFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable frame on {}: {}", link, e);
                return;
            }
        };

        match frame {
            WireFrame::Transfer {
                delivery_id,
                message,
            } => {
                entry.push_backlog(delivery_id, message);
            }
            WireFrame::Flow { received, credit } => {
                entry.apply_flow(received, credit);
            }
            WireFrame::Disposition {
                delivery_id,
                outcome,
                settled,
            } => {
                let handle = DeliveryHandle::new(Direction::Outgoing, delivery_id);
                if let Some(delivery) = self.outgoing_on(link, handle) {
                    delivery.set_disposition(outcome);
                    if settled {
                        delivery.mark_remote_settled();
                    }
                    debug!("Peer resolved {} as {:?}", handle, outcome);
                }
            }
            WireFrame::Settle {
                delivery_id,
                from_receiver: true,
            } => {
                let handle = DeliveryHandle::new(Direction::Outgoing, delivery_id);
                if let Some(delivery) = self.outgoing_on(link, handle) {
                    delivery.mark_remote_settled();
                    debug!("Peer settled {}", handle);
                }
            }
            WireFrame::Settle {
                delivery_id,
                from_receiver: false,
            } => {
                if let Some(handle) = self.tracker.find_incoming(link, delivery_id) {
                    self.tracker.settle(handle);
                    debug!("Sender settled {}", handle);
                }
            }
        }
    }

    fn outgoing_on(&mut self, link: LinkHandle, handle: DeliveryHandle) -> Option<&mut Delivery> {
        self.tracker
            .get_mut(handle)
            .filter(|d| d.link() == Some(link))
    }

    /// Release everything tied to a lost link
    fn reclaim(&mut self, link: LinkHandle) {
        let Some(mut entry) = self.links.remove(&link) else {
            return;
        };
        let dropped = entry.close();
        let key = entry.peer().to_string();
        if self.by_peer.get(&key) == Some(&link) {
            self.by_peer.remove(&key);
        }
        self.ledger.remove_link(link);

        let reclaim = self.tracker.reclaim_link(link);
        for handle in &reclaim.unknown {
            debug!("{} has unknown outcome", handle);
        }
        warn!(
            "Lost {} to {}: {} deliveries reclaimed, {} with unknown outcome, {} unreceived transfers dropped",
            link,
            entry.peer(),
            reclaim.settled.len(),
            reclaim.unknown.len(),
            dropped
        );
    }

    // ===== Sending =====

    fn link_for(&mut self, peer: &Address) -> std::result::Result<LinkHandle, TransportError> {
        let key = peer.to_string();
        if let Some(&link) = self.by_peer.get(&key) {
            return Ok(link);
        }

        let link = self.transport.open_link(peer)?;
        let entry = self
            .links
            .entry(link)
            .or_insert_with(|| Link::new(link, peer.clone()));
        if let Err(e) = entry.transition_local(EndpointState::Active) {
            debug!("{}: {}", link, e);
        }
        self.by_peer.insert(key, link);
        info!("Opened {} to {}", link, peer);
        self.advertise_prefetch(link);
        Ok(link)
    }

    fn send(&mut self, request: CreditRequest) -> Result<usize> {
        let limit = request.call_limit();
        let mut sent = 0;
        let mut topped_up = HashSet::new();
        let mut blocked = HashSet::new();
        let mut failure = None;

        let pending = std::mem::take(&mut self.outbox);
        let mut rest = VecDeque::with_capacity(pending.len());

        for outbound in pending {
            if sent >= limit || failure.is_some() || blocked.contains(&outbound.peer) {
                rest.push_back(outbound);
                continue;
            }

            let link = match self.link_for(&outbound.peer) {
                Ok(link) => link,
                Err(e @ (TransportError::PeerUnreachable(_) | TransportError::InvalidAddress(_))) => {
                    self.abort(outbound.handle, &e);
                    continue;
                }
                Err(e) => {
                    failure = Some(e);
                    rest.push_back(outbound);
                    continue;
                }
            };

            if topped_up.insert(link) {
                self.ledger.request_send_credit(link, request);
            }
            if self.links.get(&link).map_or(0, Link::peer_credit) == 0 {
                debug!("Peer gave no credit on {}, {} stays buffered", link, outbound.handle);
                blocked.insert(outbound.peer.clone());
                rest.push_back(outbound);
                continue;
            }
            if self.ledger.consume(link, Direction::Outgoing, 1).is_err() {
                debug!("No send credit on {}, {} stays buffered", link, outbound.handle);
                blocked.insert(outbound.peer.clone());
                rest.push_back(outbound);
                continue;
            }

            let Outbound {
                handle, message, ..
            } = outbound;
            let frame = WireFrame::Transfer {
                delivery_id: handle.id(),
                message,
            };
            let bytes = match frame.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.abort(handle, &e);
                    continue;
                }
            };

            if let Err(e) = self.transport.transfer_out(link, bytes) {
                self.abort(handle, &e);
                if e.is_link_lost() {
                    self.reclaim(link);
                }
                continue;
            }

            if let Some(entry) = self.links.get_mut(&link) {
                entry.record_transfer();
            }
            if let Some(evicted) = self.tracker.admit_outgoing(handle, link) {
                self.auto_settle(evicted);
            }
            debug!("Sent {} on {}", handle, link);
            sent += 1;
        }

        self.outbox = rest;
        self.ledger.end_call();

        match failure {
            Some(e) if sent == 0 => Err(e.into()),
            Some(e) => {
                warn!("Send stopped after {} transfer(s): {}", sent, e);
                Ok(sent)
            }
            None => Ok(sent),
        }
    }

    fn abort(&mut self, handle: DeliveryHandle, reason: &dyn fmt::Display) {
        if self.tracker.abort(handle) {
            warn!("Aborted {}: {}", handle, reason);
        }
    }

    // ===== Receiving =====

    fn recv(&mut self, request: CreditRequest) -> usize {
        let limit = request.call_limit();
        let links: Vec<LinkHandle> = self.links.keys().copied().collect();
        for &link in &links {
            self.ledger.request_recv_credit(link, request);
        }

        let mut moved = 0;
        'rounds: while moved < limit {
            let mut progress = false;
            for &link in &links {
                if moved >= limit {
                    break 'rounds;
                }
                let Some(entry) = self.links.get_mut(&link) else {
                    continue;
                };
                if entry.backlog_len() == 0
                    || self.ledger.consume(link, Direction::Incoming, 1).is_err()
                {
                    continue;
                }
                let Some((remote_id, message)) = entry.pop_backlog() else {
                    continue;
                };

                let admission = self.tracker.admit_incoming(link, remote_id);
                self.received.push_back((admission.handle, message));
                self.auto_settle(admission.evicted);
                moved += 1;
                progress = true;
            }
            if !progress {
                break;
            }
        }

        self.ledger.end_call();
        for &link in &links {
            self.replenish(link);
        }
        if moved > 0 {
            debug!("Received {} message(s)", moved);
        }
        moved
    }

    // ===== Link credit =====

    /// Tell a new peer how far it may run ahead, if not the default it assumes
    fn advertise_prefetch(&mut self, link: LinkHandle) {
        let prefetch = self.config.link_prefetch;
        if prefetch == DEFAULT_LINK_CREDIT {
            return;
        }
        let Some(entry) = self.links.get_mut(&link) else {
            return;
        };
        let received = entry.transfers_received();
        let credit = entry.reset_credit(prefetch);
        self.notify(link, WireFrame::Flow { received, credit });
    }

    /// Grant the peer room for what `recv` drained from the backlog
    fn replenish(&mut self, link: LinkHandle) {
        let prefetch = self.config.link_prefetch;
        let leftover = self.ledger.available(link, Direction::Incoming);
        let Some(entry) = self.links.get_mut(&link) else {
            return;
        };
        let room = prefetch
            .max(leftover)
            .saturating_sub(entry.backlog_len() as u64);
        let Some(credit) = entry.credit_update(room, (prefetch / 2).max(1)) else {
            return;
        };
        let received = entry.transfers_received();
        debug!("Granting {} credit on {}", credit, link);
        self.notify(link, WireFrame::Flow { received, credit });
    }

    // ===== Settlement =====

    fn dispose(&mut self, outcome: Disposition) -> Option<DeliveryHandle> {
        let handle = self.current.take()?;
        if let Some(delivery) = self.tracker.settle(handle) {
            if let Some(link) = delivery.link() {
                self.notify(
                    link,
                    WireFrame::Disposition {
                        delivery_id: delivery.wire_id(),
                        outcome,
                        settled: true,
                    },
                );
            }
            debug!("{:?} {}", outcome, handle);
        }
        Some(handle)
    }

    fn settle(&mut self, handle: DeliveryHandle) -> bool {
        let Some(delivery) = self.tracker.settle(handle) else {
            return false;
        };
        if delivery.state() == DeliveryState::Pending {
            self.outbox.retain(|o| o.handle != handle);
        }
        if self.current == Some(handle) {
            self.current = None;
        }
        self.signal_settled(&delivery);
        true
    }

    /// Tell the peer that we settled `delivery`
    fn signal_settled(&mut self, delivery: &Delivery) {
        let Some(link) = delivery.link() else {
            return;
        };
        match delivery.state() {
            DeliveryState::Sent if !delivery.is_remote_settled() => self.notify(
                link,
                WireFrame::Settle {
                    delivery_id: delivery.wire_id(),
                    from_receiver: false,
                },
            ),
            DeliveryState::Received => self.notify(
                link,
                WireFrame::Settle {
                    delivery_id: delivery.wire_id(),
                    from_receiver: true,
                },
            ),
            _ => {}
        }
    }

    fn auto_settle(&mut self, evicted: Vec<Delivery>) {
        for delivery in evicted {
            let handle = delivery.handle();
            warn!("Window full, auto-settled {}", handle);
            if self.auto_settled.len() == AUTO_SETTLED_REPORT_LIMIT {
                self.auto_settled.pop_front();
            }
            self.auto_settled.push_back(handle);

            let Some(link) = delivery.link() else {
                continue;
            };
            match delivery.direction() {
                Direction::Outgoing if !delivery.is_remote_settled() => self.notify(
                    link,
                    WireFrame::Settle {
                        delivery_id: delivery.wire_id(),
                        from_receiver: false,
                    },
                ),
                Direction::Outgoing => {}
                Direction::Incoming => self.notify(
                    link,
                    WireFrame::Disposition {
                        delivery_id: delivery.wire_id(),
                        outcome: delivery.disposition().unwrap_or(Disposition::Accepted),
                        settled: true,
                    },
                ),
            }
        }
    }

    /// Best-effort control frame; a lost link shows up as a transport event
    fn notify(&mut self, link: LinkHandle, frame: WireFrame) {
        let Some(entry) = self.links.get_mut(&link) else {
            return;
        };
        let result = frame
            .encode()
            .map_err(MessengerError::from)
            .and_then(|bytes| Ok(self.transport.transfer_out(link, bytes)?));
        match result {
            Ok(()) => entry.record_sent(),
            Err(e) => debug!("Could not notify {}: {}", link, e),
        }
    }

    // ===== Diagnostics =====

    fn link_stats(&self, link: LinkHandle) -> Option<LinkStats> {
        let entry = self.links.get(&link)?;
        let queued = self
            .outbox
            .iter()
            .filter(|o| self.by_peer.get(&o.peer.to_string()) == Some(&link))
            .count();

        Some(LinkStats {
            peer: entry.peer().to_string(),
            local_state: entry.local_state(),
            remote_state: entry.remote_state(),
            send_credit: self.ledger.available(link, Direction::Outgoing),
            recv_credit: self.ledger.available(link, Direction::Incoming),
            queued,
            backlog: entry.backlog_len(),
            unsettled_outgoing: self.tracker.unsettled(link, Direction::Outgoing),
            unsettled_incoming: self.tracker.unsettled(link, Direction::Incoming),
            send_blocked: self.ledger.is_blocked(link, Direction::Outgoing),
            recv_blocked: self.ledger.is_blocked(link, Direction::Incoming),
            frames_sent: entry.frames_sent(),
            frames_received: entry.frames_received(),
            peer_credit: entry.peer_credit(),
            advertised_credit: entry.advertised_credit(),
            idle: entry.idle_time(),
        })
    }
}
