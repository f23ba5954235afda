//! # Creditline Core
//!
//! Credit-flow delivery engine for request/reply messaging.
//!
//! This crate provides:
//! - Credit ledger gating sends and receives per link and direction
//! - Receiver-advertised link credit holding back senders
//! - Sliding window tracker bounding unsettled deliveries
//! - Delivery lifecycle and settlement, including reclaim on disconnect
//! - Frame encoding and decoding (zero-copy header parsing)
//! - The messenger [`Endpoint`] composing all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Endpoint                                 │
//! │   (put/send/recv/get/accept/settle, lifecycle, link table)      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              Credit Ledger      │      Window Tracker            │
//! │   (granted/used per link & dir) │ (unsettled deliveries, evict)  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Frames                                   │
//! │   (transfer, disposition, settle, flow over any Transport)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod credit;
pub mod delivery;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod messenger;
pub mod window;

pub use config::EndpointConfig;
pub use credit::{CreditEntry, CreditLedger, CreditRequest, UNBOUNDED_CREDIT};
pub use delivery::{Delivery, DeliveryHandle, DeliveryState, Direction, Disposition};
pub use error::{CreditError, FrameError, LinkError};
pub use frame::{Frame, FrameBuilder, FrameFlags, FrameType, WireFrame};
pub use link::{DEFAULT_LINK_CREDIT, EndpointState, Link, LinkStats};
pub use message::Message;
pub use messenger::{AUTO_SETTLED_REPORT_LIMIT, Endpoint, Lifecycle, MessengerError};
pub use window::{Admission, Reclaim, WindowTracker};

/// Fixed frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 16;
