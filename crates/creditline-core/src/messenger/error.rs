//! Error types for the endpoint API.
//!
//! Failures are always scoped: a credit or queue condition concerns one call,
//! a link failure concerns one peer, and nothing here aborts the endpoint.
//!
//! # Error Categories
//!
//! - **Transient**: the same call may succeed later (no credit yet, empty queue, link hiccup)
//! - **Permanent**: retrying will not help (bad address, bad config, wrong lifecycle state)
//! - **Link-scoped**: only the affected peer is unusable; other links keep working
//!
//! # Example
//!
//! ```no_run
//! use creditline_core::messenger::{Endpoint, MessengerError};
//! use creditline_core::Message;
//!
//! fn drain(endpoint: &Endpoint) {
//!     let mut slot = Message::default();
//!     loop {
//!         match endpoint.get(&mut slot) {
//!             Ok(_) => println!("{:?}", slot.body_text()),
//!             Err(MessengerError::NoMessageAvailable) => break,
//!             Err(e) => {
//!                 eprintln!("get failed: {e}");
//!                 break;
//!             }
//!         }
//!     }
//! }
//! ```

use crate::delivery::DeliveryHandle;
use crate::error::{CreditError, FrameError};
use creditline_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors returned by endpoint operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessengerError {
    // ============ Flow Control ============
    /// Not enough credit for the requested operation
    #[error("Insufficient credit: requested {requested}, available {available}")]
    InsufficientCredit {
        /// Units requested
        requested: u64,
        /// Units available
        available: u64,
    },

    /// The receive queue is empty
    #[error("No message available")]
    NoMessageAvailable,

    // ============ Delivery Errors ============
    /// The peer vanished before the delivery was settled
    #[error("Unknown delivery outcome: {0}")]
    UnknownDeliveryOutcome(DeliveryHandle),

    // ============ Link & Transport Errors ============
    /// The link to this peer is gone; other links are unaffected
    #[error("Link closed: {0}")]
    LinkClosed(Cow<'static, str>),

    /// Transport operation failed
    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    /// Frame could not be encoded or decoded
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    // ============ Input, Configuration & State Errors ============
    /// Message address missing or unparsable
    #[error("Invalid address: {0}")]
    InvalidAddress(Cow<'static, str>),

    /// Message body exceeds the configured limit
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Body size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),
}

impl MessengerError {
    /// Returns true if the same call may succeed later
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MessengerError::InsufficientCredit { .. }
                | MessengerError::NoMessageAvailable
                | MessengerError::Transport(_)
        )
    }

    /// Returns true if retrying will not help
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MessengerError::InvalidAddress(_)
                | MessengerError::MessageTooLarge { .. }
                | MessengerError::InvalidConfig(_)
                | MessengerError::InvalidState(_)
                | MessengerError::Frame(_)
        )
    }

    /// Returns true if the failure concerns a single link or delivery
    #[must_use]
    pub fn is_link_scoped(&self) -> bool {
        matches!(
            self,
            MessengerError::LinkClosed(_) | MessengerError::UnknownDeliveryOutcome(_)
        )
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        MessengerError::InvalidState(Cow::Borrowed(context))
    }

    /// Create an invalid config error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        MessengerError::InvalidConfig(Cow::Borrowed(context))
    }

    /// Create an invalid address error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_address(context: &'static str) -> Self {
        MessengerError::InvalidAddress(Cow::Borrowed(context))
    }
}

impl From<CreditError> for MessengerError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::InsufficientCredit {
                requested,
                available,
            } => MessengerError::InsufficientCredit {
                requested,
                available,
            },
        }
    }
}

impl From<TransportError> for MessengerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidAddress(addr) => MessengerError::InvalidAddress(addr.into()),
            TransportError::PeerUnreachable(peer) => MessengerError::LinkClosed(peer.into()),
            TransportError::UnknownLink(link) => MessengerError::LinkClosed(link.to_string().into()),
            other => MessengerError::Transport(other.to_string().into()),
        }
    }
}

/// Result type for endpoint operations
pub type Result<T> = std::result::Result<T, MessengerError>;
