//! Error types for the Creditline delivery engine building blocks.
//!
//! Endpoint-level failures live in [`crate::messenger::MessengerError`].

use thiserror::Error;

/// Frame-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Invalid frame type byte
    #[error("invalid frame type: 0x{0:02X}")]
    InvalidFrameType(u8),

    /// Reserved frame type used
    #[error("reserved frame type used")]
    ReservedFrameType,

    /// Payload length exceeds the buffer (or the 32-bit length field)
    #[error("payload length exceeds frame size")]
    PayloadOverflow,

    /// Bytes left over after the declared payload
    #[error("{0} trailing byte(s) after payload")]
    TrailingBytes(usize),

    /// Disposition byte does not name a known outcome
    #[error("invalid outcome: 0x{0:02X}")]
    InvalidOutcome(u8),

    /// Message body could not be encoded or decoded
    #[error("message body: {0}")]
    Body(String),
}

/// Credit ledger errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreditError {
    /// Not enough credit granted to cover the request
    #[error("insufficient credit: requested {requested}, available {available}")]
    InsufficientCredit {
        /// Units requested
        requested: u64,
        /// Units still available
        available: u64,
    },
}

/// Link state machine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Invalid state for the requested transition
    #[error("invalid link state transition: {from:?} -> {to:?}")]
    InvalidState {
        /// State before the attempted transition
        from: crate::link::EndpointState,
        /// Requested state
        to: crate::link::EndpointState,
    },
}
