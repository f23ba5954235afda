//! Application messages.

use serde::{Deserialize, Serialize};

/// A discrete message.
///
/// Optional fields are explicit `Option`s. Once handed to `put` the endpoint
/// owns its own copy; a message returned by `get` is a fresh value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Destination address (`scheme://host[/node]`)
    pub address: Option<String>,
    /// Where replies should go; `~` stands for the sending endpoint
    pub reply_to: Option<String>,
    /// Free-form subject line
    pub subject: Option<String>,
    /// Correlation metadata for request/reply matching
    pub correlation_id: Option<String>,
    /// Opaque payload
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message addressed to `address`
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Set a UTF-8 body
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = text.into().into_bytes();
        self
    }

    /// Set a binary body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the reply-to address
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set the subject
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Destination address, if set
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Reply-to address, if set
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Change the destination address
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = Some(address.into());
    }

    /// Change the reply-to address
    pub fn set_reply_to(&mut self, reply_to: impl Into<String>) {
        self.reply_to = Some(reply_to.into());
    }

    /// Body decoded as UTF-8, if it is valid UTF-8
    #[must_use]
    pub fn body_text(&self) -> Option<String> {
        String::from_utf8(self.body.clone()).ok()
    }

    /// Reset every field, keeping the allocation of the body
    pub fn clear(&mut self) {
        self.address = None;
        self.reply_to = None;
        self.subject = None;
        self.correlation_id = None;
        self.body.clear();
    }
}
