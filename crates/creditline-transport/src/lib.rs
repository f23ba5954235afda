//! # Creditline Transport
//!
//! The connection layer consumed by the Creditline delivery engine.
//!
//! This crate provides:
//! - The [`Transport`] trait (`open_link`, `transfer_out`, `close_link`)
//! - Inbound [`TransportEvent`]s (`FrameIn`, `Disconnected`) delivered over a
//!   channel that any thread may feed
//! - Address parsing (`mem://host/node`)
//! - [`MemoryNetwork`], an in-process network used by tests and the CLI to
//!   wire endpoints together and to synthesize ungraceful disconnects

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod memory;
pub mod transport;

pub use address::{Address, MEMORY_SCHEME};
pub use memory::{MemoryAttachment, MemoryNetwork, MemoryTransport};
pub use transport::{
    EventReceiver, LinkHandle, Transport, TransportError, TransportEvent, TransportResult,
    TransportStats,
};
