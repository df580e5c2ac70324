//! Commands run once at startup, before the listener is bound.
//!
//! Each `--lldb-command` value is handed to a [`CommandInterpreter`] in the
//! order given.  The command is echoed to the operator as `(lldb) <cmd>`,
//! followed by whatever output the interpreter produced.

use std::io::{self, Write};

use tracing::debug;

/// Executes one debugger command and returns its output.
pub trait CommandInterpreter {
    fn execute(&mut self, command: &str) -> String;
}

/// Interpreter used when no debugger is attached to the broker.
///
/// Records each command at debug level and produces no output.
#[derive(Debug, Default)]
pub struct DetachedInterpreter {
    executed: Vec<String>,
}

impl DetachedInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

impl CommandInterpreter for DetachedInterpreter {
    fn execute(&mut self, command: &str) -> String {
        debug!(command, "startup command has no debugger to run in");
        self.executed.push(command.to_string());
        String::new()
    }
}

/// Feeds `commands` to `interpreter` and echoes them to `out`.
///
/// # Errors
///
/// Only write failures on `out` are reported.
pub fn run_startup_commands(
    interpreter: &mut dyn CommandInterpreter,
    commands: &[String],
    out: &mut impl Write,
) -> io::Result<()> {
    for command in commands {
        writeln!(out, "(lldb) {command}")?;
        let output = interpreter.execute(command);
        if !output.is_empty() {
            out.write_all(output.as_bytes())?;
            if !output.ends_with('\n') {
                writeln!(out)?;
            }
        }
    }
    out.flush()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
