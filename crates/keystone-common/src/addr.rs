//! Network addresses accepted on the command line
//!
//! Operators may pass an address as `host`, `host:port`, or a full URL. Each
//! address field has its own default scheme and port, and remembers whether
//! the operator supplied it explicitly: defaulting decisions during bootstrap
//! branch on that flag, never on the value itself.

use std::fmt;

use thiserror::Error;
use url::Url;

/// Errors produced while parsing an address
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrError {
    /// The address had no host component
    #[error("address {0:?} has no host")]
    MissingHost(String),

    /// The port was not a valid u16
    #[error("address {value:?} has an invalid port {port:?}")]
    InvalidPort {
        /// Full address text
        value: String,
        /// Port text that failed to parse
        port: String,
    },

    /// A path was given but the field does not accept one
    #[error("address {0:?} may not include a path")]
    UnexpectedPath(String),

    /// The assembled URL was rejected
    #[error("address {value:?} is not a valid URL: {reason}")]
    InvalidUrl {
        /// Full address text
        value: String,
        /// Parser error
        reason: String,
    },
}

/// An address with a default scheme and port and a `provided` flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    default_scheme: &'static str,
    default_port: u16,
    allow_prefix: bool,
    provided: bool,
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl Addr {
    /// Create an empty, not-provided address with the given defaults
    pub fn unset(default_scheme: &'static str, default_port: u16) -> Self {
        Self {
            default_scheme,
            default_port,
            allow_prefix: false,
            provided: false,
            scheme: default_scheme.to_string(),
            host: String::new(),
            port: default_port,
            path: String::new(),
        }
    }

    /// Allow a URL path prefix (e.g., `https://host:8443/cluster`)
    pub fn allow_prefix(mut self) -> Self {
        self.allow_prefix = true;
        self
    }

    /// Fill in a default value without marking the address as provided
    pub fn with_default(mut self, value: &str) -> Result<Self, AddrError> {
        self.apply(value)?;
        self.provided = false;
        Ok(self)
    }

    /// Set an operator-supplied (or negotiated) value and mark it provided
    pub fn set(&mut self, value: &str) -> Result<(), AddrError> {
        self.apply(value)?;
        self.provided = true;
        Ok(())
    }

    /// Return a copy with `value` applied and marked provided
    pub fn provided_with(&self, value: &str) -> Result<Self, AddrError> {
        let mut addr = self.clone();
        addr.set(value)?;
        Ok(addr)
    }

    fn apply(&mut self, value: &str) -> Result<(), AddrError> {
        let value = value.trim();
        let (scheme, rest) = match value.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => (self.default_scheme.to_string(), value),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].trim_end_matches('/')),
            None => (rest, ""),
        };
        if !path.is_empty() && !self.allow_prefix {
            return Err(AddrError::UnexpectedPath(value.to_string()));
        }

        let (host, port) = split_host_port(authority);
        if host.is_empty() {
            return Err(AddrError::MissingHost(value.to_string()));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| AddrError::InvalidPort {
                value: value.to_string(),
                port: p.to_string(),
            })?,
            None => self.default_port,
        };

        let candidate = Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
            ..self.clone()
        };
        Url::parse(&candidate.url()).map_err(|e| AddrError::InvalidUrl {
            value: value.to_string(),
            reason: e.to_string(),
        })?;

        *self = candidate;
        Ok(())
    }

    /// Whether the operator (or negotiation) supplied this address
    pub fn provided(&self) -> bool {
        self.provided
    }

    /// Whether a host has been filled in
    pub fn is_set(&self) -> bool {
        !self.host.is_empty()
    }

    /// URL scheme (`http` or `https` in practice)
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host name or IP literal, without brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulted when absent from the value
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port this field falls back to
    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Whether the scheme selects encrypted transport
    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn host_port(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// Full URL: `scheme://host:port[/prefix]`
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host_port(), self.path)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            f.write_str(&self.url())
        } else {
            f.write_str("<unset>")
        }
    }
}

/// Join a host and port, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    if let Some(rest) = authority.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':')),
            None => (rest, None),
        };
    }
    // A bare IPv6 literal has more than one colon and no port
    if authority.matches(':').count() > 1 {
        return (authority, None);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> Addr {
        Addr::unset("https", 8443).allow_prefix()
    }

    #[test]
    fn bare_host_gets_default_scheme_and_port() {
        let mut addr = master();
        addr.set("10.0.0.5").unwrap();
        assert_eq!(addr.url(), "https://10.0.0.5:8443");
        assert!(addr.provided());
        assert!(addr.is_tls());
    }

    #[test]
    fn host_port_keeps_explicit_port() {
        let mut addr = master();
        addr.set("203.0.113.9:9443").unwrap();
        assert_eq!(addr.host(), "203.0.113.9");
        assert_eq!(addr.port(), 9443);
        assert_eq!(addr.scheme(), "https");
    }

    #[test]
    fn explicit_scheme_wins() {
        let mut addr = Addr::unset("http", 4001);
        addr.set("https://store.example.com").unwrap();
        assert_eq!(addr.url(), "https://store.example.com:4001");
    }

    #[test]
    fn default_value_is_not_provided() {
        let addr = master().with_default("localhost:8443").unwrap();
        assert!(!addr.provided());
        assert_eq!(addr.host(), "localhost");
    }

    #[test]
    fn ipv6_literals_are_bracketed() {
        let mut addr = Addr::unset("http", 4001);
        addr.set("[fd00::1]:2379").unwrap();
        assert_eq!(addr.host(), "fd00::1");
        assert_eq!(addr.port(), 2379);
        assert_eq!(addr.host_port(), "[fd00::1]:2379");

        addr.set("fd00::2").unwrap();
        assert_eq!(addr.host(), "fd00::2");
        assert_eq!(addr.port(), 4001);
    }

    #[test]
    fn prefix_only_where_allowed() {
        let mut addr = master();
        addr.set("https://master:8443/api/").unwrap();
        assert_eq!(addr.url(), "https://master:8443/api");

        let mut store = Addr::unset("http", 4001);
        assert!(matches!(
            store.set("http://store:4001/v2"),
            Err(AddrError::UnexpectedPath(_))
        ));
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut addr = master();
        assert!(matches!(addr.set(""), Err(AddrError::MissingHost(_))));
        assert!(matches!(
            addr.set("host:99999"),
            Err(AddrError::InvalidPort { .. })
        ));
        assert!(matches!(
            addr.set("host:abc"),
            Err(AddrError::InvalidPort { .. })
        ));
        // A failed set leaves the previous value untouched
        assert!(!addr.is_set());
        assert!(!addr.provided());
    }

    #[test]
    fn display_of_unset_address() {
        assert_eq!(Addr::unset("https", 8443).to_string(), "<unset>");
    }
}
