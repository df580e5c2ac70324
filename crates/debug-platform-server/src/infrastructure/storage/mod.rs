//! Storage infrastructure: the optional broker config file.
//!
//! The `config` sub-module reads a TOML file holding the same settings as
//! the command line and converts it into `BrokerSettings`, which the
//! application layer merges with the command-line values.

pub mod config;
