//! debug-platform: remote-debugging platform connection broker.
//!
//! Listens on a TCP endpoint, accepts debugger clients and serves each one
//! with a protocol engine that can hand out debug-stub ports from a
//! configured pool.
//!
//! # Usage
//!
//! ```text
//! debug-platform --listen <HOST:PORT> [OPTIONS]
//!
//! Options:
//!   -L, --listen <HOST:PORT>              Client-facing address (required)
//!   -p, --port-offset <N>                 Stub port = listen port + N
//!   -P, --gdbserver-port <PORT>           Add PORT to the stub port pool (repeatable)
//!   -m, --min-gdbserver-port <PORT>       First port of a stub port range
//!   -M, --max-gdbserver-port <PORT>       End (exclusive) of a stub port range
//!   -c, --lldb-command <CMD>              Run CMD once at startup (repeatable)
//!       --server                          Fork a worker per connection and keep listening
//!       --debug / --verbose               More diagnostics
//!       --config <PATH>                   TOML file with the same settings
//!       --log-file <PATH>                 Append diagnostics here instead of stderr
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Option     |
//! |-------------------------|------------|
//! | `DEBUG_PLATFORM_LISTEN` | `--listen` |
//! | `DEBUG_PLATFORM_CONFIG` | `--config` |
//! | `RUST_LOG`              | log filter, overrides `--debug`/`--verbose` |
//!
//! # Output streams
//!
//! stdout carries the operator progress lines (`Listening for a connection
//! from …`, `Connection established.`, echoed startup commands).  Every
//! diagnostic, including errors, goes to stderr or the `--log-file`.
//!
//! Exit statuses are listed in [`debug_platform_server::exit`].

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use clap::{ArgMatches, Command, CommandFactory, FromArgMatches, Parser};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use debug_platform_core::{ProcessModel, Verbosity};
use debug_platform_server::application::config::{
    exit_status_for, ArgumentPositions, BrokerConfig, BrokerSettings,
};
use debug_platform_server::application::startup_commands::{
    run_startup_commands, DetachedInterpreter,
};
use debug_platform_server::application::supervisor::{PlatformEngineFactory, SessionSupervisor};
use debug_platform_server::exit::BrokerExit;
use debug_platform_server::infrastructure::listener::ConnectionListener;
use debug_platform_server::infrastructure::signals;
use debug_platform_server::infrastructure::spawner::ForkSpawner;
use debug_platform_server::infrastructure::storage::config::load_config_file;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Remote-debugging platform connection broker.
///
/// Port values are kept as text here and validated later, so that each kind
/// of bad value can exit with its own status.
#[derive(Debug, Parser)]
#[command(
    name = "debug-platform",
    about = "Remote-debugging platform connection broker",
    version
)]
struct Cli {
    /// Client-facing address: `host:port`, `[v6]:port`, `*:port` or `port`.
    #[arg(long, short = 'L', value_name = "HOST:PORT", env = "DEBUG_PLATFORM_LISTEN")]
    listen: Option<String>,

    /// Default stub port is the listen port plus this offset.
    #[arg(long, short = 'p', value_name = "N", allow_hyphen_values = true)]
    port_offset: Option<String>,

    /// Adds one port to the stub port pool.  May be repeated.
    #[arg(long, short = 'P', value_name = "PORT", allow_hyphen_values = true)]
    gdbserver_port: Vec<String>,

    /// First port of a stub port range.
    #[arg(long, short = 'm', value_name = "PORT", allow_hyphen_values = true)]
    min_gdbserver_port: Option<String>,

    /// End of a stub port range (not included).
    #[arg(long, short = 'M', value_name = "PORT", allow_hyphen_values = true)]
    max_gdbserver_port: Option<String>,

    /// Debugger command run once at startup.  May be repeated.
    #[arg(long, short = 'c', value_name = "CMD")]
    lldb_command: Vec<String>,

    /// Serve every connection in its own forked worker and keep listening.
    #[arg(long)]
    server: bool,

    /// Trace-level diagnostics.
    #[arg(long)]
    debug: bool,

    /// Debug-level diagnostics.
    #[arg(long)]
    verbose: bool,

    /// TOML file with default settings; command-line values take precedence.
    #[arg(long, value_name = "PATH", env = "DEBUG_PLATFORM_CONFIG")]
    config: Option<PathBuf>,

    /// Append diagnostics to this file instead of stderr.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(skip)]
    positions: ArgumentPositions,
}

impl Cli {
    /// Parses `args` with `command`, keeping the argv index of every port
    /// value so errors can be reported in the order they were typed.
    fn try_parse_with_positions<I, T>(command: Command, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command.try_get_matches_from(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;
        cli.positions = argument_positions(&matches);
        Ok(cli)
    }

    fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.debug, self.verbose)
    }

    /// The command-line layer of the settings.
    fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            listen: self.listen.clone(),
            port_offset: self.port_offset.clone(),
            gdbserver_ports: self.gdbserver_port.clone(),
            min_gdbserver_port: self.min_gdbserver_port.clone(),
            max_gdbserver_port: self.max_gdbserver_port.clone(),
            server: self.server,
            lldb_commands: self.lldb_command.clone(),
            backlog: None,
            verbosity: self.verbosity(),
            positions: self.positions.clone(),
        }
    }

    /// Loads the config file (if any), overlays the command line and
    /// validates the result.
    ///
    /// Every problem is reported before returning.
    ///
    /// # Errors
    ///
    /// The [`BrokerExit`] the process should exit with.
    fn into_broker_config(self) -> Result<BrokerConfig, BrokerExit> {
        let base = match &self.config {
            Some(path) => match load_config_file(path) {
                Ok(file) => file.into_settings(),
                Err(e) => {
                    error!("error: {e}");
                    return Err(e.exit_status());
                }
            },
            None => BrokerSettings::default(),
        };

        base.overlay(self.settings()).into_config().map_err(|errors| {
            for e in &errors {
                error!("error: {e}");
            }
            if errors.iter().any(|e| e.shows_usage()) {
                print_usage();
            }
            exit_status_for(&errors)
        })
    }
}

fn argument_positions(matches: &ArgMatches) -> ArgumentPositions {
    ArgumentPositions {
        port_offset: matches.index_of("port_offset"),
        gdbserver_ports: matches
            .indices_of("gdbserver_port")
            .map(Iterator::collect)
            .unwrap_or_default(),
        min_gdbserver_port: matches.index_of("min_gdbserver_port"),
        max_gdbserver_port: matches.index_of("max_gdbserver_port"),
    }
}

fn print_usage() {
    eprintln!("{}", Cli::command().render_usage());
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows `--debug` /
/// `--verbose`.
fn init_logging(verbosity: Verbosity, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. The command line is parsed.  `--help`, `--version` and unknown options
///    print their text and exit 0.
/// 2. Logging is initialised and `SIGPIPE` / `SIGHUP` dispositions installed.
/// 3. The config file and command line are merged and validated; any error
///    exits before a socket is opened.
/// 4. Startup commands run, the listener binds and the supervisor takes over.
fn main() -> ExitCode {
    let cli = match Cli::try_parse_with_positions(Cli::command(), std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return BrokerExit::Usage.into();
        }
    };

    if let Err(e) = init_logging(cli.verbosity(), cli.log_file.as_deref()) {
        eprintln!("error: {e:#}");
        return BrokerExit::ConfigFile.into();
    }

    if let Err(e) = signals::ignore_broken_pipe() {
        warn!("could not ignore SIGPIPE: {e}");
    }
    if let Err(e) = signals::exit_immediately_on_hangup() {
        warn!("could not install SIGHUP handler: {e}");
    }

    let exit = match cli.into_broker_config() {
        Ok(config) => serve(&config),
        Err(exit) => exit,
    };
    exit.into()
}

/// Runs the broker with a validated configuration.
fn serve(config: &BrokerConfig) -> BrokerExit {
    let mut stdout = io::stdout();
    if let Err(e) = run_startup_commands(
        &mut DetachedInterpreter::new(),
        config.startup_commands(),
        &mut stdout,
    ) {
        warn!("could not echo startup commands: {e}");
    }

    let listener = match ConnectionListener::bind_spec(config.listen(), false, config.backlog()) {
        Ok(listener) => listener,
        Err(e) => {
            error!("error: {e}");
            return e.exit_status();
        }
    };
    if let Err(e) = writeln!(stdout, "Listening for a connection from {}...", listener.local_addr())
        .and_then(|()| stdout.flush())
    {
        warn!("could not write progress line: {e}");
    }
    info!(
        listen = %listener.local_addr(),
        model = ?config.process_model(),
        "broker ready"
    );

    if config.process_model() == ProcessModel::Forking {
        if let Err(e) = signals::reap_workers_on_exit() {
            warn!("could not install SIGCHLD handler: {e}");
        }
    }

    let mut supervisor = SessionSupervisor::new(
        listener,
        ForkSpawner::new(),
        PlatformEngineFactory,
        config.ports().context(),
        config.process_model(),
    );
    match supervisor.run() {
        Ok(report) => {
            debug!(session = %report.id, peer = %report.peer, "exiting");
            BrokerExit::Success
        }
        Err(e) => {
            error!("error: {e}");
            e.exit_status()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
