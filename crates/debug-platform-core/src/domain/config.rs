//! Listen endpoint, process model and verbosity.
//!
//! # Listen specification syntax
//!
//! ```text
//! 127.0.0.1:5000     host and port
//! [::1]:5000         IPv6 literal in brackets
//! *:5000             every interface (0.0.0.0)
//! :5000  or  5000    loopback only (127.0.0.1)
//! ```
//!
//! Port `0` is allowed: the OS picks a free port and the broker reports the
//! address it actually bound.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Host used when the specification names no host.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";

/// Host used for the `*` wildcard.
pub const WILDCARD_LISTEN_HOST: &str = "0.0.0.0";

/// Error type for [`ListenEndpoint::parse`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("empty listen specification")]
    Empty,

    #[error("invalid port in listen specification {spec:?}")]
    InvalidPort { spec: String },

    /// An IPv6 literal without brackets, or an unterminated bracket.
    #[error("malformed host in listen specification {spec:?}")]
    MalformedHost { spec: String },
}

/// The client-facing address the broker binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenEndpoint {
    host: String,
    port: u16,
}

impl ListenEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `host:port` specification (see the module docs for the
    /// accepted forms).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] when the text is empty, the port is not a
    /// `u16`, or the host is malformed.
    pub fn parse(spec: &str) -> Result<Self, EndpointError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (host, port) = if let Some(rest) = spec.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                EndpointError::MalformedHost {
                    spec: spec.to_string(),
                }
            })?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| EndpointError::InvalidPort {
                    spec: spec.to_string(),
                })?;
            (host, port)
        } else if let Some((host, port)) = spec.rsplit_once(':') {
            if host.contains(':') {
                return Err(EndpointError::MalformedHost {
                    spec: spec.to_string(),
                });
            }
            (host, port)
        } else {
            ("", spec)
        };

        let port: u16 = port.parse().map_err(|_| EndpointError::InvalidPort {
            spec: spec.to_string(),
        })?;

        let host = match host {
            "" => DEFAULT_LISTEN_HOST,
            "*" => WILDCARD_LISTEN_HOST,
            other => other,
        };

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for ListenEndpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// How accepted connections are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessModel {
    /// Serve exactly one connection, then exit.
    #[default]
    SingleShot,
    /// Fork one worker per connection; the parent keeps accepting.
    Forking,
}

impl ProcessModel {
    /// `--server` selects [`ProcessModel::Forking`].
    pub fn from_server_flag(server: bool) -> Self {
        if server {
            ProcessModel::Forking
        } else {
            ProcessModel::SingleShot
        }
    }
}

/// Diagnostic verbosity.  Has no effect on broker behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    /// `--debug` wins over `--verbose`.
    pub fn from_flags(debug: bool, verbose: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// Default `tracing` filter directive when `RUST_LOG` is not set.
    pub fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Debug => "trace",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let ep = ListenEndpoint::parse("127.0.0.1:5000").unwrap();
        assert_eq!(ep.host(), "127.0.0.1");
        assert_eq!(ep.port(), 5000);
    }

    #[test]
    fn test_parse_bare_port_defaults_to_loopback() {
        assert_eq!(
            ListenEndpoint::parse("5000").unwrap(),
            ListenEndpoint::new("127.0.0.1", 5000)
        );
        assert_eq!(
            ListenEndpoint::parse(":5000").unwrap(),
            ListenEndpoint::new("127.0.0.1", 5000)
        );
    }

    #[test]
    fn test_parse_wildcard_host() {
        let ep = ListenEndpoint::parse("*:5000").unwrap();
        assert_eq!(ep.host(), "0.0.0.0");
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let ep = ListenEndpoint::parse("[::1]:5000").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.to_string(), "[::1]:5000");
    }

    #[test]
    fn test_parse_hostname_is_kept_verbatim() {
        let ep: ListenEndpoint = "localhost:1234".parse().unwrap();
        assert_eq!(ep.host(), "localhost");
        assert_eq!(ep.to_string(), "localhost:1234");
    }

    #[test]
    fn test_parse_port_zero_is_allowed() {
        assert_eq!(ListenEndpoint::parse("127.0.0.1:0").unwrap().port(), 0);
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(matches!(
            ListenEndpoint::parse("127.0.0.1:http"),
            Err(EndpointError::InvalidPort { .. })
        ));
        assert!(matches!(
            ListenEndpoint::parse("127.0.0.1:70000"),
            Err(EndpointError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unbracketed_ipv6() {
        assert!(matches!(
            ListenEndpoint::parse("::1:5000"),
            Err(EndpointError::MalformedHost { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(ListenEndpoint::parse("  "), Err(EndpointError::Empty));
    }

    #[test]
    fn test_process_model_from_server_flag() {
        assert_eq!(ProcessModel::from_server_flag(true), ProcessModel::Forking);
        assert_eq!(ProcessModel::from_server_flag(false), ProcessModel::SingleShot);
        assert_eq!(ProcessModel::default(), ProcessModel::SingleShot);
    }

    #[test]
    fn test_verbosity_debug_wins_over_verbose() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, false).default_filter(), "info");
    }
}
