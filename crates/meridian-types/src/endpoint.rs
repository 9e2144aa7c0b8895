//! Physical replica addresses.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Transport protocol a replica address speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// The custom binary protocol (`mrtp://` addresses).
    Binary,
    /// The HTTP fallback (`http://` / `https://` addresses).
    Http,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Binary => write!(f, "binary"),
            Protocol::Http => write!(f, "http"),
        }
    }
}

/// Identity of a physical server, independent of which partitions it hosts.
///
/// Used to invalidate every cache entry that references a rediscovered
/// server without knowing which partitions it served.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerKey(String);

impl ServerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A physical replica address.
///
/// Health state is tracked separately (per server key, in the routing
/// layer); an `Endpoint` is an immutable value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub protocol: Protocol,
    pub is_primary: bool,
    pub is_public: bool,
}

impl Endpoint {
    /// Parses an address URI of the form `scheme://host:port/path`.
    ///
    /// `mrtp` maps to [`Protocol::Binary`]; `http`/`https` map to
    /// [`Protocol::Http`].
    pub fn parse(uri: &str) -> Result<Self, EndpointParseError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| EndpointParseError::MissingScheme(uri.to_owned()))?;

        let protocol = match scheme {
            "mrtp" => Protocol::Binary,
            "http" | "https" => Protocol::Http,
            other => return Err(EndpointParseError::UnknownScheme(other.to_owned())),
        };

        let (authority, path) = match rest.split_once('/') {
            Some((a, p)) => (a, format!("/{p}")),
            None => (rest, String::new()),
        };

        let (host, port) = authority
            .split_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(uri.to_owned()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointParseError::InvalidPort(port.to_owned()))?;

        if host.is_empty() {
            return Err(EndpointParseError::MissingHost(uri.to_owned()));
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            host: host.to_owned(),
            port,
            path,
            protocol,
            is_primary: false,
            is_public: true,
        })
    }

    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    pub fn with_public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    /// The physical server this address belongs to, ignoring scheme and path.
    pub fn server_key(&self) -> ServerKey {
        ServerKey::new(format!("{}:{}", self.host, self.port))
    }

    pub fn uri(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// Errors from [`Endpoint::parse`].
#[derive(Debug, thiserror::Error)]
pub enum EndpointParseError {
    #[error("address has no scheme: {0}")]
    MissingScheme(String),

    #[error("unknown address scheme: {0}")]
    UnknownScheme(String),

    #[error("address has no host: {0}")]
    MissingHost(String),

    #[error("address has no port: {0}")]
    MissingPort(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),
}
