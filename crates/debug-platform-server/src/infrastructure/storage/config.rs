//! TOML config file for the broker.
//!
//! Every key is optional and mirrors a command-line option:
//!
//! ```toml
//! listen = "*:1234"
//! server = true
//! port_offset = 1000
//! gdbserver_ports = [6000, "0x1771"]
//! min_gdbserver_port = 7000
//! max_gdbserver_port = 7010
//! lldb_commands = ["log enable gdb-remote packets"]
//! backlog = 100
//! ```
//!
//! Port values may be TOML integers or strings; strings go through the same
//! `strtoul`-style parsing as the command line, so `"0x1771"` is accepted.
//! Unknown keys are rejected so that a typo does not silently drop a setting.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::application::config::BrokerSettings;
use crate::exit::BrokerExit;

/// Error type for config file loading.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigFileError {
    pub fn exit_status(&self) -> BrokerExit {
        BrokerExit::ConfigFile
    }
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// A port value as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

impl PortValue {
    /// Text handed to the shared port parser.  Negative numbers stay
    /// negative so they are rejected as non-numeric, like on the command line.
    fn into_raw(self) -> String {
        match self {
            PortValue::Number(n) => n.to_string(),
            PortValue::Text(text) => text,
        }
    }
}

/// On-disk broker settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerFile {
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub server: bool,
    #[serde(default)]
    pub port_offset: Option<PortValue>,
    #[serde(default)]
    pub gdbserver_ports: Vec<PortValue>,
    #[serde(default)]
    pub min_gdbserver_port: Option<PortValue>,
    #[serde(default)]
    pub max_gdbserver_port: Option<PortValue>,
    #[serde(default)]
    pub lldb_commands: Vec<String>,
    #[serde(default)]
    pub backlog: Option<i32>,
}

impl BrokerFile {
    pub fn into_settings(self) -> BrokerSettings {
        BrokerSettings {
            listen: self.listen,
            port_offset: self.port_offset.map(PortValue::into_raw),
            gdbserver_ports: self
                .gdbserver_ports
                .into_iter()
                .map(PortValue::into_raw)
                .collect(),
            min_gdbserver_port: self.min_gdbserver_port.map(PortValue::into_raw),
            max_gdbserver_port: self.max_gdbserver_port.map(PortValue::into_raw),
            server: self.server,
            lldb_commands: self.lldb_commands,
            backlog: self.backlog,
            ..BrokerSettings::default()
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the config file at `path`.
///
/// The file was named explicitly, so a missing file is an error rather than
/// an empty configuration.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] if the file cannot be read and
/// [`ConfigFileError::Parse`] if the TOML is malformed or has unknown keys.
pub fn load_config_file(path: &Path) -> Result<BrokerFile, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
