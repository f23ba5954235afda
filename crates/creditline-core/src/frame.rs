//! Frame encoding and decoding for the Creditline wire format.
//!
//! Every frame starts with a fixed 16-byte header. All multi-byte fields are
//! big-endian (network byte order):
//!
//! ```text
//!  0        1        2                 4                                12               16
//! +--------+--------+-----------------+--------------------------------+----------------+
//! |  type  | flags  |    reserved     |          delivery id           |  payload len   |
//! +--------+--------+-----------------+--------------------------------+----------------+
//! |                                payload (payload len bytes)                           |
//! +--------------------------------------------------------------------------------------+
//! ```
//!
//! A `Flow` frame reuses the delivery id field for the number of transfers
//! the receiver has seen on the link, and carries the granted credit as an
//! 8-byte payload.
//!
//! [`Frame`] is a zero-copy view used for validation; [`WireFrame`] is the
//! typed form the endpoint works with.

use crate::FRAME_HEADER_SIZE;
use crate::delivery::Disposition;
use crate::error::FrameError;
use crate::message::Message;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Reserved (invalid)
    Reserved = 0x00,
    /// Message transfer; payload is the encoded message
    Transfer = 0x01,
    /// Outcome of a delivery; payload is one outcome byte
    Disposition = 0x02,
    /// Settlement notice; no payload
    Settle = 0x03,
    /// Link credit advertisement; payload is the credit as a u64
    Flow = 0x04,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Err(FrameError::ReservedFrameType),
            0x01 => Ok(Self::Transfer),
            0x02 => Ok(Self::Disposition),
            0x03 => Ok(Self::Settle),
            0x04 => Ok(Self::Flow),
            0x05..=0x0F => Err(FrameError::ReservedFrameType),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

/// Frame flags bitmap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// The sender of this frame has settled its side of the delivery
    pub const SETTLED: u8 = 0b0000_0001;
    /// Frame comes from the receiving side; the id is the sender's outgoing id
    pub const RECEIVER: u8 = 0b0000_0010;

    /// Create new empty flags
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Add SETTLED flag
    #[must_use]
    pub fn with_settled(mut self) -> Self {
        self.0 |= Self::SETTLED;
        self
    }

    /// Add RECEIVER flag
    #[must_use]
    pub fn with_receiver(mut self) -> Self {
        self.0 |= Self::RECEIVER;
        self
    }

    /// Check if SETTLED is set
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.0 & Self::SETTLED != 0
    }

    /// Check if RECEIVER is set
    #[must_use]
    pub fn is_receiver(&self) -> bool {
        self.0 & Self::RECEIVER != 0
    }

    /// Get raw byte value
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// Zero-copy frame view into a received buffer
#[derive(Debug)]
pub struct Frame<'a> {
    raw: &'a [u8],
    frame_type: FrameType,
    flags: FrameFlags,
    delivery_id: u64,
    payload_len: usize,
}

impl<'a> Frame<'a> {
    /// Parse a frame from raw bytes (zero-copy).
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the header is truncated, the type is unknown,
    /// or the buffer length disagrees with the declared payload length.
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let frame_type = FrameType::try_from(data[0])?;
        let flags = FrameFlags(data[1]);
        let delivery_id = u64::from_be_bytes([
            data[4], data[5], data[6], data[7],
            data[8], data[9], data[10], data[11],
        ]);
        let payload_len = u32::from_be_bytes([data[12], data[13], data[14], data[15]]) as usize;

        let end = FRAME_HEADER_SIZE
            .checked_add(payload_len)
            .ok_or(FrameError::PayloadOverflow)?;
        if end > data.len() {
            return Err(FrameError::PayloadOverflow);
        }
        if end < data.len() {
            return Err(FrameError::TrailingBytes(data.len() - end));
        }

        Ok(Self {
            raw: data,
            frame_type,
            flags,
            delivery_id,
            payload_len,
        })
    }

    /// Get the frame type
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Get the frame flags
    #[must_use]
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Get the delivery id
    #[must_use]
    pub fn delivery_id(&self) -> u64 {
        self.delivery_id
    }

    /// Get the payload slice (zero-copy)
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.raw[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + self.payload_len]
    }
}

/// Builder for constructing frames
#[derive(Debug, Default)]
pub struct FrameBuilder {
    frame_type: Option<FrameType>,
    flags: FrameFlags,
    delivery_id: u64,
    payload: Vec<u8>,
}

impl FrameBuilder {
    /// Create a new frame builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame type
    #[must_use]
    pub fn frame_type(mut self, ft: FrameType) -> Self {
        self.frame_type = Some(ft);
        self
    }

    /// Set the flags
    #[must_use]
    pub fn flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the delivery id
    #[must_use]
    pub fn delivery_id(mut self, id: u64) -> Self {
        self.delivery_id = id;
        self
    }

    /// Set the payload
    #[must_use]
    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    /// Build the frame into a byte buffer.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::PayloadOverflow` if the payload does not fit the
    /// 32-bit length field.
    pub fn build(self) -> Result<Vec<u8>, FrameError> {
        let frame_type = self.frame_type.unwrap_or(FrameType::Transfer);
        let payload_len =
            u32::try_from(self.payload.len()).map_err(|_| FrameError::PayloadOverflow)?;

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.push(frame_type as u8);
        buf.push(self.flags.as_u8());
        buf.extend_from_slice(&[0u8; 2]); // Reserved
        buf.extend_from_slice(&self.delivery_id.to_be_bytes());
        buf.extend_from_slice(&payload_len.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        Ok(buf)
    }
}

/// Typed frame exchanged between endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// A message, identified by the sender's outgoing delivery id
    Transfer {
        /// Sender's delivery id
        delivery_id: u64,
        /// The message
        message: Message,
    },
    /// Receiver's outcome for one of the sender's deliveries
    Disposition {
        /// Sender's delivery id
        delivery_id: u64,
        /// Outcome
        outcome: Disposition,
        /// The receiver has settled its side
        settled: bool,
    },
    /// One side has settled a delivery
    Settle {
        /// Sender's delivery id
        delivery_id: u64,
        /// Sent by the receiving side
        from_receiver: bool,
    },
    /// Receiver's credit for the link
    Flow {
        /// Transfers the receiver has seen on the link
        received: u64,
        /// Further transfers it will take
        credit: u64,
    },
}

impl WireFrame {
    /// Delivery id carried by the frame; `Flow` concerns the whole link
    #[must_use]
    pub fn delivery_id(&self) -> Option<u64> {
        match self {
            WireFrame::Transfer { delivery_id, .. }
            | WireFrame::Disposition { delivery_id, .. }
            | WireFrame::Settle { delivery_id, .. } => Some(*delivery_id),
            WireFrame::Flow { .. } => None,
        }
    }

    /// Encode into wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Body` if the message cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            WireFrame::Transfer {
                delivery_id,
                message,
            } => {
                let body =
                    bincode::serialize(message).map_err(|e| FrameError::Body(e.to_string()))?;
                FrameBuilder::new()
                    .frame_type(FrameType::Transfer)
                    .delivery_id(*delivery_id)
                    .payload(body)
                    .build()
            }
            WireFrame::Disposition {
                delivery_id,
                outcome,
                settled,
            } => {
                let mut flags = FrameFlags::new().with_receiver();
                if *settled {
                    flags = flags.with_settled();
                }
                FrameBuilder::new()
                    .frame_type(FrameType::Disposition)
                    .flags(flags)
                    .delivery_id(*delivery_id)
                    .payload(vec![*outcome as u8])
                    .build()
            }
            WireFrame::Settle {
                delivery_id,
                from_receiver,
            } => {
                let mut flags = FrameFlags::new().with_settled();
                if *from_receiver {
                    flags = flags.with_receiver();
                }
                FrameBuilder::new()
                    .frame_type(FrameType::Settle)
                    .flags(flags)
                    .delivery_id(*delivery_id)
                    .build()
            }
            WireFrame::Flow { received, credit } => FrameBuilder::new()
                .frame_type(FrameType::Flow)
                .flags(FrameFlags::new().with_receiver())
                .delivery_id(*received)
                .payload(credit.to_be_bytes().to_vec())
                .build(),
        }
    }

    /// Decode wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the header is malformed, a disposition payload
    /// is not exactly one known outcome byte, a flow payload is not exactly
    /// eight bytes, or the message body cannot be deserialized.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let frame = Frame::parse(data)?;
        let delivery_id = frame.delivery_id();

        match frame.frame_type() {
            FrameType::Transfer => {
                let message = bincode::deserialize(frame.payload())
                    .map_err(|e| FrameError::Body(e.to_string()))?;
                Ok(WireFrame::Transfer {
                    delivery_id,
                    message,
                })
            }
            FrameType::Disposition => match frame.payload() {
                [byte] => Ok(WireFrame::Disposition {
                    delivery_id,
                    outcome: Disposition::try_from(*byte)?,
                    settled: frame.flags().is_settled(),
                }),
                [] => Err(FrameError::TooShort {
                    expected: FRAME_HEADER_SIZE + 1,
                    actual: data.len(),
                }),
                [_, rest @ ..] => Err(FrameError::TrailingBytes(rest.len())),
            },
            FrameType::Settle => {
                if !frame.payload().is_empty() {
                    return Err(FrameError::TrailingBytes(frame.payload().len()));
                }
                Ok(WireFrame::Settle {
                    delivery_id,
                    from_receiver: frame.flags().is_receiver(),
                })
            }
            FrameType::Flow => {
                let payload = frame.payload();
                let credit: [u8; 8] = payload.try_into().map_err(|_| {
                    if payload.len() < 8 {
                        FrameError::TooShort {
                            expected: FRAME_HEADER_SIZE + 8,
                            actual: data.len(),
                        }
                    } else {
                        FrameError::TrailingBytes(payload.len() - 8)
                    }
                })?;
                Ok(WireFrame::Flow {
                    received: delivery_id,
                    credit: u64::from_be_bytes(credit),
                })
            }
            FrameType::Reserved => Err(FrameError::ReservedFrameType),
        }
    }
}
