//! Broker configuration: layered raw settings in, one immutable
//! [`BrokerConfig`] out.
//!
//! Settings arrive as raw text from two places, the optional config file and
//! the command line.  [`BrokerSettings::overlay`] merges them (command line on
//! top) and [`BrokerSettings::into_config`] validates the result in one pass,
//! collecting every problem rather than stopping at the first:
//!
//! ```text
//! file settings ──┐
//!                 ├─ overlay ─► BrokerSettings ─ into_config ─► BrokerConfig
//! CLI settings ───┘                                   │
//!                                                     └─► Vec<ConfigError>
//! ```
//!
//! Port values are parsed like C `strtoul(…, 0)`: decimal, `0x` hex or
//! leading-zero octal.  Each error maps to its own exit status through
//! [`ConfigError::exit_status`]; when several occur the last one decides.

use debug_platform_core::{
    parse_port_value, PortAllocator, PortError, PortValueError, ProcessModel, StubPortSpec,
    Verbosity, HIGH_PORT, LOW_PORT,
};
use thiserror::Error;

use crate::exit::BrokerExit;

/// Listen backlog used unless the config file overrides it.
///
/// Test harnesses may open many connections nearly at once; the OS default
/// of a handful causes spurious connection-refused errors.
pub const DEFAULT_BACKLOG: i32 = 100;

/// One rejected setting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No listen address was given anywhere.  Shows usage.
    #[error("no listen address given (use --listen)")]
    MissingListen,

    #[error("invalid port offset string {0}")]
    OffsetNotNumeric(String),

    #[error("port offset {value} is not in the valid user port range of {LOW_PORT} - {HIGH_PORT}")]
    OffsetOutOfRange { value: u64 },

    /// A `--gdbserver-port`, `--min-gdbserver-port` or `--max-gdbserver-port`
    /// value was rejected.
    #[error("{option}: {source}")]
    StubPort {
        option: &'static str,
        #[source]
        source: PortValueError,
    },

    #[error("--min-gdbserver-port ({low}) is greater than --max-gdbserver-port ({high})")]
    InvertedRange { low: u16, high: u16 },

    #[error("{given} requires {missing} as well")]
    IncompleteRange {
        given: &'static str,
        missing: &'static str,
    },

    #[error("listen backlog must be positive, got {0}")]
    InvalidBacklog(i32),
}

impl ConfigError {
    /// Exit status the broker uses when this is the deciding error.
    pub fn exit_status(&self) -> BrokerExit {
        match self {
            ConfigError::MissingListen => BrokerExit::Usage,
            ConfigError::OffsetNotNumeric(_) => BrokerExit::OffsetNotNumeric,
            ConfigError::OffsetOutOfRange { .. } => BrokerExit::OffsetOutOfRange,
            ConfigError::StubPort {
                source: PortValueError::NotNumeric(_),
                ..
            } => BrokerExit::PortNotNumeric,
            ConfigError::StubPort {
                source: PortValueError::OutOfRange { .. },
                ..
            } => BrokerExit::PortOutOfRange,
            ConfigError::InvertedRange { .. } | ConfigError::IncompleteRange { .. } => {
                BrokerExit::InvalidPortRange
            }
            ConfigError::InvalidBacklog(_) => BrokerExit::ConfigFile,
        }
    }

    /// `true` when the operator should be shown the usage text.
    pub fn shows_usage(&self) -> bool {
        !matches!(self, ConfigError::InvalidBacklog(_))
    }

    fn offset(source: PortValueError) -> Self {
        match source {
            PortValueError::NotNumeric(raw) => ConfigError::OffsetNotNumeric(raw),
            PortValueError::OutOfRange { value } => ConfigError::OffsetOutOfRange { value },
        }
    }
}

/// The exit status for a failed validation: the last error that carries a
/// failure status wins; a missing listen address alone exits with usage.
pub fn exit_status_for(errors: &[ConfigError]) -> BrokerExit {
    errors
        .iter()
        .rev()
        .map(ConfigError::exit_status)
        .find(|status| *status != BrokerExit::Usage)
        .unwrap_or(BrokerExit::Usage)
}

// ── Raw settings ──────────────────────────────────────────────────────────────

pub const OPT_PORT_OFFSET: &str = "--port-offset";
pub const OPT_GDBSERVER_PORT: &str = "--gdbserver-port";
pub const OPT_MIN_GDBSERVER_PORT: &str = "--min-gdbserver-port";
pub const OPT_MAX_GDBSERVER_PORT: &str = "--max-gdbserver-port";

/// Where each port value sat on the command line, as argv indices.
///
/// Value errors are reported in this order, so the last bad value typed
/// decides the exit status.  A value without a recorded index (one from the
/// config file, or settings built in code) sorts before every argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentPositions {
    pub port_offset: Option<usize>,
    /// One index per entry of [`BrokerSettings::gdbserver_ports`].
    pub gdbserver_ports: Vec<usize>,
    pub min_gdbserver_port: Option<usize>,
    pub max_gdbserver_port: Option<usize>,
}

/// Unvalidated settings from one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerSettings {
    pub listen: Option<String>,
    pub port_offset: Option<String>,
    pub gdbserver_ports: Vec<String>,
    pub min_gdbserver_port: Option<String>,
    pub max_gdbserver_port: Option<String>,
    pub server: bool,
    pub lldb_commands: Vec<String>,
    pub backlog: Option<i32>,
    pub verbosity: Verbosity,
    pub positions: ArgumentPositions,
}

impl BrokerSettings {
    /// Merges `top` over `self`.
    ///
    /// Single values from `top` replace those in `self`; lists are
    /// concatenated with `self` first; flags are OR-ed.  Positions follow the
    /// value they belong to.
    pub fn overlay(self, top: BrokerSettings) -> BrokerSettings {
        let mut port_positions = self.positions.gdbserver_ports;
        port_positions.resize(self.gdbserver_ports.len(), 0);
        port_positions.extend(top.positions.gdbserver_ports);

        let positions = ArgumentPositions {
            port_offset: pick_position(
                &top.port_offset,
                top.positions.port_offset,
                self.positions.port_offset,
            ),
            gdbserver_ports: port_positions,
            min_gdbserver_port: pick_position(
                &top.min_gdbserver_port,
                top.positions.min_gdbserver_port,
                self.positions.min_gdbserver_port,
            ),
            max_gdbserver_port: pick_position(
                &top.max_gdbserver_port,
                top.positions.max_gdbserver_port,
                self.positions.max_gdbserver_port,
            ),
        };

        BrokerSettings {
            listen: top.listen.or(self.listen),
            port_offset: top.port_offset.or(self.port_offset),
            gdbserver_ports: [self.gdbserver_ports, top.gdbserver_ports].concat(),
            min_gdbserver_port: top.min_gdbserver_port.or(self.min_gdbserver_port),
            max_gdbserver_port: top.max_gdbserver_port.or(self.max_gdbserver_port),
            server: self.server || top.server,
            lldb_commands: [self.lldb_commands, top.lldb_commands].concat(),
            backlog: top.backlog.or(self.backlog),
            verbosity: self.verbosity.max(top.verbosity),
            positions,
        }
    }

    /// Validates every setting and builds the broker configuration.
    ///
    /// # Errors
    ///
    /// Returns every [`ConfigError`] found.  Bad port values come first, in
    /// command-line order; then the range check, the backlog and the listen
    /// address.
    pub fn into_config(self) -> Result<BrokerConfig, Vec<ConfigError>> {
        let mut value_errors: Vec<(usize, ConfigError)> = Vec::new();
        let mut ports = PortAllocator::new();
        let positions = &self.positions;

        if let Some(raw) = &self.port_offset {
            let at = positions.port_offset.unwrap_or(0);
            match parse_port_value(raw).map(StubPortSpec::FixedOffset) {
                Ok(spec) => {
                    if let Err(e) = ports.configure(spec) {
                        value_errors.push((at, rejected(e, OPT_PORT_OFFSET)));
                    }
                }
                Err(e) => value_errors.push((at, ConfigError::offset(e))),
            }
        }

        for (i, raw) in self.gdbserver_ports.iter().enumerate() {
            let at = positions.gdbserver_ports.get(i).copied().unwrap_or(0);
            match parse_port_value(raw) {
                Ok(port) => {
                    if let Err(e) = ports.configure(StubPortSpec::ExplicitSet([port].into())) {
                        value_errors.push((at, rejected(e, OPT_GDBSERVER_PORT)));
                    }
                }
                Err(source) => value_errors.push((
                    at,
                    ConfigError::StubPort {
                        option: OPT_GDBSERVER_PORT,
                        source,
                    },
                )),
            }
        }

        let low = parse_bound(
            &self.min_gdbserver_port,
            OPT_MIN_GDBSERVER_PORT,
            positions.min_gdbserver_port,
            &mut value_errors,
        );
        let high = parse_bound(
            &self.max_gdbserver_port,
            OPT_MAX_GDBSERVER_PORT,
            positions.max_gdbserver_port,
            &mut value_errors,
        );

        value_errors.sort_by_key(|(at, _)| *at);
        let mut errors: Vec<ConfigError> = value_errors.into_iter().map(|(_, e)| e).collect();

        match (low, high) {
            (Bound::Valid(low), Bound::Valid(high)) => {
                if let Err(e) = ports.configure(StubPortSpec::Range { low, high }) {
                    errors.push(rejected(e, OPT_MIN_GDBSERVER_PORT));
                }
            }
            (Bound::Valid(_), Bound::Absent) => errors.push(ConfigError::IncompleteRange {
                given: OPT_MIN_GDBSERVER_PORT,
                missing: OPT_MAX_GDBSERVER_PORT,
            }),
            (Bound::Absent, Bound::Valid(_)) => errors.push(ConfigError::IncompleteRange {
                given: OPT_MAX_GDBSERVER_PORT,
                missing: OPT_MIN_GDBSERVER_PORT,
            }),
            _ => {}
        }

        let backlog = self.backlog.unwrap_or(DEFAULT_BACKLOG);
        if backlog < 1 {
            errors.push(ConfigError::InvalidBacklog(backlog));
        }

        let listen = self.listen.filter(|listen| !listen.trim().is_empty());
        if listen.is_none() {
            errors.push(ConfigError::MissingListen);
        }

        match listen {
            Some(listen) if errors.is_empty() => Ok(BrokerConfig {
                listen,
                ports,
                process_model: ProcessModel::from_server_flag(self.server),
                startup_commands: self.lldb_commands,
                verbosity: self.verbosity,
                backlog,
            }),
            _ => Err(errors),
        }
    }
}

fn pick_position<T>(top: &Option<T>, top_at: Option<usize>, base_at: Option<usize>) -> Option<usize> {
    if top.is_some() {
        top_at
    } else {
        base_at
    }
}

enum Bound {
    Absent,
    Invalid,
    Valid(u16),
}

fn parse_bound(
    raw: &Option<String>,
    option: &'static str,
    at: Option<usize>,
    errors: &mut Vec<(usize, ConfigError)>,
) -> Bound {
    let Some(raw) = raw else {
        return Bound::Absent;
    };
    match parse_port_value(raw) {
        Ok(port) => Bound::Valid(port),
        Err(source) => {
            errors.push((at.unwrap_or(0), ConfigError::StubPort { option, source }));
            Bound::Invalid
        }
    }
}

fn rejected(error: PortError, option: &'static str) -> ConfigError {
    match error {
        PortError::InvalidPortValue(source) if option == OPT_PORT_OFFSET => {
            ConfigError::offset(source)
        }
        PortError::InvalidPortValue(source) => ConfigError::StubPort { option, source },
        PortError::InvalidPortRange { low, high } => ConfigError::InvertedRange { low, high },
    }
}

// ── Validated configuration ───────────────────────────────────────────────────

/// Everything the broker needs, validated once at startup and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    listen: String,
    ports: PortAllocator,
    process_model: ProcessModel,
    startup_commands: Vec<String>,
    verbosity: Verbosity,
    backlog: i32,
}

impl BrokerConfig {
    /// The listen specification as given.  Parsed when the listener binds.
    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn process_model(&self) -> ProcessModel {
        self.process_model
    }

    pub fn startup_commands(&self) -> &[String] {
        &self.startup_commands
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
