//! Endpoint addresses.
//!
//! Addresses take the form `scheme://host[/node]`. The host selects the peer
//! (and therefore the link); the node names a target inside that peer and is
//! carried along with the message untouched.

use crate::transport::{TransportError, TransportResult};
use std::fmt;
use url::Url;

/// Scheme used by [`crate::MemoryNetwork`]
pub const MEMORY_SCHEME: &str = "mem";

/// A parsed peer address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: String,
    host: String,
    node: Option<String>,
}

impl Address {
    /// Parse an address string.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` if the string is not a URL or
    /// has no host component.
    pub fn parse(input: &str) -> TransportResult<Self> {
        let url = Url::parse(input)
            .map_err(|e| TransportError::InvalidAddress(format!("{input}: {e}")))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidAddress(format!("{input}: missing host")))?
            .to_string();

        let node = url.path().trim_start_matches('/');
        let node = (!node.is_empty()).then(|| node.to_string());

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            node,
        })
    }

    /// Address of the in-memory endpoint named `name`
    #[must_use]
    pub fn memory(name: &str) -> Self {
        Self {
            scheme: MEMORY_SCHEME.to_string(),
            host: name.to_string(),
            node: None,
        }
    }

    /// URL scheme
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host part, which identifies the peer
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Node inside the peer, if any
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// Same address with the node stripped (identifies the link)
    #[must_use]
    pub fn peer(&self) -> Self {
        Self {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            node: None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(node) = &self.node {
            write!(f, "/{node}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
