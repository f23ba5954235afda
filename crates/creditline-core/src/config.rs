//! Endpoint configuration

use crate::link::DEFAULT_LINK_CREDIT;
use crate::messenger::MessengerError;
use creditline_transport::Address;
use serde::{Deserialize, Serialize};

/// Endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint name; a random one is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Maximum unsettled outgoing deliveries per link (`None` or 0 = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_window: Option<usize>,

    /// Maximum unsettled incoming deliveries per link (`None` or 0 = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_window: Option<usize>,

    /// Upper bound on credit available per link and direction (`None` = negotiate per call)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_credit_cap: Option<u64>,

    /// Transfers each peer may send ahead of `recv` on a link
    #[serde(default = "default_link_prefetch")]
    pub link_prefetch: u64,

    /// Largest message body accepted by `put`
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_link_prefetch() -> u64 {
    DEFAULT_LINK_CREDIT
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: None,
            outgoing_window: None,
            incoming_window: None,
            link_credit_cap: None,
            link_prefetch: default_link_prefetch(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl EndpointConfig {
    /// Configuration for an endpoint called `name`
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the outgoing window
    #[must_use]
    pub fn with_outgoing_window(mut self, window: usize) -> Self {
        self.outgoing_window = Some(window);
        self
    }

    /// Set the incoming window
    #[must_use]
    pub fn with_incoming_window(mut self, window: usize) -> Self {
        self.incoming_window = Some(window);
        self
    }

    /// Set the link prefetch
    #[must_use]
    pub fn with_link_prefetch(mut self, prefetch: u64) -> Self {
        self.link_prefetch = prefetch;
        self
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::InvalidConfig` if the name cannot be used as
    /// an address host, or if the message size limit, the credit cap or the
    /// link prefetch is zero.
    pub fn validate(&self) -> Result<(), MessengerError> {
        if let Some(name) = &self.name {
            let valid = Address::parse(&format!("mem://{name}"))
                .is_ok_and(|addr| addr.host() == name && addr.node().is_none());
            if !valid {
                return Err(MessengerError::InvalidConfig(
                    format!("endpoint name '{name}' is not a valid host").into(),
                ));
            }
        }

        if self.max_message_size == 0 {
            return Err(MessengerError::invalid_config(
                "max_message_size must be greater than zero",
            ));
        }

        if self.link_credit_cap == Some(0) {
            return Err(MessengerError::invalid_config(
                "link_credit_cap must be greater than zero",
            ));
        }

        if self.link_prefetch == 0 {
            return Err(MessengerError::invalid_config(
                "link_prefetch must be greater than zero",
            ));
        }

        Ok(())
    }
}
