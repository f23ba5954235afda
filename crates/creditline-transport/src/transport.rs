//! Transport trait abstraction for the delivery engine.
//!
//! The engine never touches sockets. It opens links by address, hands encoded
//! frames to [`Transport::transfer_out`], and consumes [`TransportEvent`]s from
//! a channel. Events may be produced on any thread; the engine drains them
//! under its own lock.

use crate::address::Address;
use std::fmt;

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// No peer is reachable at the address
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// The link is not (or no longer) known to the transport
    #[error("Unknown link: {0}")]
    UnknownLink(LinkHandle),

    /// Address could not be parsed or resolved
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Another node is already attached under this name
    #[error("Address in use: {0}")]
    AddressInUse(String),

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Returns true if the error means the link (or the whole transport) is gone
    #[must_use]
    pub fn is_link_lost(&self) -> bool {
        matches!(
            self,
            TransportError::Closed
                | TransportError::UnknownLink(_)
                | TransportError::PeerUnreachable(_)
        )
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Opaque identifier of one peer relationship.
///
/// Both ends of a link observe the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkHandle(u64);

impl LinkHandle {
    /// Create a handle from its raw value
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Inbound notification from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote peer opened a link towards us
    Opened {
        /// Link handle shared by both ends
        link: LinkHandle,
        /// Address of the remote peer
        peer: String,
    },
    /// An encoded frame arrived on a link
    FrameIn {
        /// Link the frame arrived on
        link: LinkHandle,
        /// Encoded frame bytes
        frame: Vec<u8>,
    },
    /// The link is gone. No close handshake is implied.
    Disconnected {
        /// Link that was lost
        link: LinkHandle,
    },
}

impl TransportEvent {
    /// Link the event refers to
    #[must_use]
    pub fn link(&self) -> LinkHandle {
        match self {
            TransportEvent::Opened { link, .. }
            | TransportEvent::FrameIn { link, .. }
            | TransportEvent::Disconnected { link } => *link,
        }
    }
}

/// Receiving half of a transport's event channel
pub type EventReceiver = crossbeam_channel::Receiver<TransportEvent>;

/// Connection layer used by an endpoint.
///
/// Implementations must be non-blocking: `transfer_out` either queues the
/// frame for the peer or reports that the link is gone.
pub trait Transport: Send + Sync {
    /// Address under which remote peers reach this transport
    fn local_address(&self) -> String;

    /// Open (or reuse) a link to the peer at `address`.
    ///
    /// # Errors
    /// Returns `TransportError::PeerUnreachable` if nobody listens there and
    /// `TransportError::Closed` if this transport is closed.
    fn open_link(&self, address: &Address) -> TransportResult<LinkHandle>;

    /// Hand an encoded frame to the link.
    ///
    /// # Errors
    /// Returns `TransportError::UnknownLink` or `TransportError::Closed` when
    /// the link can no longer carry frames.
    fn transfer_out(&self, link: LinkHandle, frame: Vec<u8>) -> TransportResult<()>;

    /// Close a link gracefully. The peer observes `Disconnected`.
    ///
    /// # Errors
    /// Returns `TransportError::UnknownLink` if the link is not open.
    fn close_link(&self, link: LinkHandle) -> TransportResult<()>;

    /// Check if the transport is closed.
    fn is_closed(&self) -> bool;

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total frames sent
    pub frames_sent: u64,
    /// Total frames received
    pub frames_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Links opened by this side
    pub links_opened: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Closed;
        assert_eq!(err.to_string(), "Transport is closed");

        let err = TransportError::PeerUnreachable("mem://gone".to_string());
        assert!(err.to_string().contains("mem://gone"));

        let err = TransportError::UnknownLink(LinkHandle::new(7));
        assert_eq!(err.to_string(), "Unknown link: link-7");

        let err = TransportError::Other("test error".to_string());
        assert_eq!(err.to_string(), "Transport error: test error");
    }

    #[test]
    fn test_link_lost_classification() {
        assert!(TransportError::Closed.is_link_lost());
        assert!(TransportError::UnknownLink(LinkHandle::new(1)).is_link_lost());
        assert!(TransportError::PeerUnreachable("x".into()).is_link_lost());
        assert!(!TransportError::InvalidAddress("x".into()).is_link_lost());
        assert!(!TransportError::AddressInUse("x".into()).is_link_lost());
    }

    #[test]
    fn test_event_link_accessor() {
        let link = LinkHandle::new(3);
        let events = [
            TransportEvent::Opened {
                link,
                peer: "mem://a".into(),
            },
            TransportEvent::FrameIn {
                link,
                frame: vec![1, 2, 3],
            },
            TransportEvent::Disconnected { link },
        ];
        for event in &events {
            assert_eq!(event.link(), link);
        }
    }
}
