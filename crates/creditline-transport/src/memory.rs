//! In-process network.
//!
//! `MemoryNetwork` connects any number of named nodes. Each node receives its
//! inbound traffic as [`TransportEvent`]s on an unbounded channel, so frames
//! are buffered by the transport until the owning endpoint drains them.
//!
//! [`MemoryNetwork::crash`] removes a node without any close handshake: every
//! peer it was linked to simply observes `Disconnected`, the same thing a real
//! transport reports when a process dies mid-exchange.

use crate::address::{Address, MEMORY_SCHEME};
use crate::transport::{
    EventReceiver, LinkHandle, Transport, TransportError, TransportEvent, TransportResult,
    TransportStats,
};
use crossbeam_channel::{Sender, unbounded};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

/// Inbound traffic counters, bumped by whichever node delivers the frame
#[derive(Default)]
struct ReceiveCounters {
    bytes: AtomicU64,
    frames: AtomicU64,
}

/// Registry entry for one attached node
struct NodeEntry {
    events: Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
    received: Arc<ReceiveCounters>,
}

/// The two ends of an open link
#[derive(Debug, Clone)]
struct LinkEnds {
    opener: String,
    acceptor: String,
}

impl LinkEnds {
    fn involves(&self, name: &str) -> bool {
        self.opener == name || self.acceptor == name
    }

    fn other(&self, name: &str) -> &str {
        if self.opener == name {
            &self.acceptor
        } else {
            &self.opener
        }
    }
}

#[derive(Default)]
struct NetworkInner {
    nodes: DashMap<String, NodeEntry>,
    links: DashMap<LinkHandle, LinkEnds>,
    next_link: AtomicU64,
}

/// Shared in-memory network. Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

/// Result of attaching a node: its transport and its inbound event channel
pub struct MemoryAttachment {
    /// Transport used by the node's endpoint
    pub transport: Arc<MemoryTransport>,
    /// Inbound events for the node
    pub events: EventReceiver,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node under `name`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AddressInUse` if a live node already uses the name.
    pub fn attach(&self, name: &str) -> TransportResult<MemoryAttachment> {
        let (tx, rx) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let received = Arc::new(ReceiveCounters::default());

        match self.inner.nodes.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::AddressInUse(name.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(NodeEntry {
                    events: tx,
                    closed: Arc::clone(&closed),
                    received: Arc::clone(&received),
                });
            }
        }

        info!("Attached node {} to memory network", name);

        Ok(MemoryAttachment {
            transport: Arc::new(MemoryTransport {
                network: self.clone(),
                name: name.to_string(),
                closed,
                received,
                bytes_sent: AtomicU64::new(0),
                frames_sent: AtomicU64::new(0),
                send_errors: AtomicU64::new(0),
                links_opened: AtomicU64::new(0),
            }),
            events: rx,
        })
    }

    /// Check if a node is attached
    #[must_use]
    pub fn is_attached(&self, name: &str) -> bool {
        self.inner.nodes.contains_key(name)
    }

    /// Number of open links
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }

    /// Remove a node abruptly.
    ///
    /// Every peer linked to it observes `Disconnected`; nothing is flushed and
    /// no close handshake takes place. Unknown names are ignored.
    pub fn crash(&self, name: &str) {
        let Some((_, entry)) = self.inner.nodes.remove(name) else {
            return;
        };
        entry.closed.store(true, Ordering::Release);

        let lost: Vec<(LinkHandle, LinkEnds)> = self
            .inner
            .links
            .iter()
            .filter(|l| l.value().involves(name))
            .map(|l| (*l.key(), l.value().clone()))
            .collect();

        for (link, ends) in &lost {
            self.inner.links.remove(link);
            let peer = ends.other(name);
            if peer != name {
                self.notify(peer, TransportEvent::Disconnected { link: *link });
            }
        }

        info!("Node {} vanished, {} link(s) lost", name, lost.len());
    }

    /// Tear down a single link, notifying both ends.
    ///
    /// Unknown links are ignored.
    pub fn disconnect(&self, link: LinkHandle) {
        let Some((_, ends)) = self.inner.links.remove(&link) else {
            return;
        };
        self.notify(&ends.opener, TransportEvent::Disconnected { link });
        if ends.acceptor != ends.opener {
            self.notify(&ends.acceptor, TransportEvent::Disconnected { link });
        }
        debug!("Link {} disconnected", link);
    }

    fn notify(&self, name: &str, event: TransportEvent) -> bool {
        match self.inner.nodes.get(name) {
            Some(node) => node.events.send(event).is_ok(),
            None => false,
        }
    }

    /// Hand a frame to `name`, counting it against the receiver
    fn deliver(&self, name: &str, link: LinkHandle, frame: Vec<u8>) -> bool {
        let Some(node) = self.inner.nodes.get(name) else {
            return false;
        };
        let len = frame.len() as u64;
        if node.events.send(TransportEvent::FrameIn { link, frame }).is_err() {
            return false;
        }
        node.received.bytes.fetch_add(len, Ordering::Relaxed);
        node.received.frames.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn find_link(&self, a: &str, b: &str) -> Option<LinkHandle> {
        self.inner
            .links
            .iter()
            .find(|l| {
                let ends = l.value();
                (ends.opener == a && ends.acceptor == b) || (ends.opener == b && ends.acceptor == a)
            })
            .map(|l| *l.key())
    }
}

/// Transport half handed to one node of a [`MemoryNetwork`].
///
/// Dropping the last reference removes the node from the network exactly like
/// [`MemoryNetwork::crash`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    name: String,
    closed: Arc<AtomicBool>,
    received: Arc<ReceiveCounters>,
    bytes_sent: AtomicU64,
    frames_sent: AtomicU64,
    send_errors: AtomicU64,
    links_opened: AtomicU64,
}

impl MemoryTransport {
    /// Node name on the network
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Transport for MemoryTransport {
    fn local_address(&self) -> String {
        Address::memory(&self.name).to_string()
    }

    fn open_link(&self, address: &Address) -> TransportResult<LinkHandle> {
        self.ensure_open()?;

        if address.scheme() != MEMORY_SCHEME {
            return Err(TransportError::InvalidAddress(format!(
                "{address}: unsupported scheme"
            )));
        }

        let peer = address.host();
        if !self.network.is_attached(peer) {
            return Err(TransportError::PeerUnreachable(address.peer().to_string()));
        }

        if let Some(existing) = self.network.find_link(&self.name, peer) {
            return Ok(existing);
        }

        let link = LinkHandle::new(self.network.inner.next_link.fetch_add(1, Ordering::Relaxed) + 1);
        self.network.inner.links.insert(
            link,
            LinkEnds {
                opener: self.name.clone(),
                acceptor: peer.to_string(),
            },
        );
        self.links_opened.fetch_add(1, Ordering::Relaxed);

        let opened = TransportEvent::Opened {
            link,
            peer: self.local_address(),
        };
        if !self.network.notify(peer, opened) {
            self.network.inner.links.remove(&link);
            return Err(TransportError::PeerUnreachable(address.peer().to_string()));
        }

        debug!("{} opened {} to {}", self.name, link, peer);
        Ok(link)
    }

    fn transfer_out(&self, link: LinkHandle, frame: Vec<u8>) -> TransportResult<()> {
        self.ensure_open()?;

        let peer = match self.network.inner.links.get(&link) {
            Some(ends) if ends.involves(&self.name) => ends.other(&self.name).to_string(),
            _ => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                return Err(TransportError::UnknownLink(link));
            }
        };

        let len = frame.len();
        if !self.network.deliver(&peer, link, frame) {
            self.send_errors.fetch_add(1, Ordering::Relaxed);
            self.network.inner.links.remove(&link);
            return Err(TransportError::Closed);
        }

        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close_link(&self, link: LinkHandle) -> TransportResult<()> {
        let Some((_, ends)) = self.network.inner.links.remove(&link) else {
            return Err(TransportError::UnknownLink(link));
        };
        let peer = ends.other(&self.name);
        if peer != self.name {
            self.network
                .notify(peer, TransportEvent::Disconnected { link });
        }
        debug!("{} closed {}", self.name, link);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.received.bytes.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.received.frames.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            links_opened: self.links_opened.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.network.crash(&self.name);
        }
    }
}
