//! Messenger API for Creditline
//!
//! An [`Endpoint`] composes the credit ledger, the sliding window tracker and
//! the link table into the operations applications use:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Endpoint                            │
//! │  put · send · recv · get · accept · reject · settle · stop   │
//! ├───────────────────┬────────────────────┬─────────────────────┤
//! │   Credit Ledger   │   Window Tracker   │       Links         │
//! │ (per link & dir)  │ (per link & dir)   │ (state, backlog)    │
//! ├───────────────────┴────────────────────┴─────────────────────┤
//! │                  Transport (open/transfer/events)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use creditline_core::messenger::Endpoint;
//! use creditline_core::{CreditRequest, EndpointConfig, Message};
//! use creditline_transport::MemoryNetwork;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let net = MemoryNetwork::new();
//!     let server = Endpoint::on_memory(&net, EndpointConfig::named("server"))?;
//!     let client = Endpoint::on_memory(&net, EndpointConfig::named("client"))?;
//!     server.start()?;
//!     client.start()?;
//!
//!     client.put(&Message::new("mem://server").with_text("ping").with_reply_to("~"))?;
//!     client.send(CreditRequest::Exact(1))?;
//!
//!     server.recv(CreditRequest::Exact(1))?;
//!     let mut request = Message::default();
//!     server.get(&mut request)?;
//!     server.accept();
//!     Ok(())
//! }
//! ```

pub mod endpoint;
pub mod error;

pub use endpoint::{AUTO_SETTLED_REPORT_LIMIT, Endpoint, Lifecycle};
pub use error::{MessengerError, Result};
