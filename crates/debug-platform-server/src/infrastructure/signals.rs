//! Process-wide signal dispositions.
//!
//! | signal    | disposition                                               |
//! |-----------|-----------------------------------------------------------|
//! | `SIGPIPE` | ignored; a write to a vanished peer fails with `EPIPE`    |
//! | `SIGHUP`  | one line on stderr, then `_exit(129)` with no teardown    |
//! | `SIGCHLD` | (Forking only) collect finished workers immediately       |
//!
//! `SIGHUP` skips destructors and `atexit` hooks on purpose: tearing down
//! process-wide state while a session is still running on it is unsafe.
//! Every handler body sticks to async-signal-safe calls.

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::exit::BrokerExit;

const HANGUP_MESSAGE: &[u8] = b"debug-platform: SIGHUP received, exiting\n";

/// Ignores `SIGPIPE` for the whole process.
///
/// # Errors
///
/// Returns the `sigaction` errno if the disposition could not be changed.
pub fn ignore_broken_pipe() -> nix::Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal::sigaction(Signal::SIGPIPE, &ignore) }?;
    Ok(())
}

/// Makes `SIGHUP` terminate the process immediately with status 129.
///
/// # Errors
///
/// Returns the `sigaction` errno if the handler could not be installed.
pub fn exit_immediately_on_hangup() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_hangup),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: `on_hangup` only calls write(2) and _exit(2).
    unsafe { signal::sigaction(Signal::SIGHUP, &action) }?;
    Ok(())
}

/// Collects finished workers as soon as they exit, so none lingers as a
/// zombie while the parent is blocked in `accept`.
///
/// `SA_RESTART` keeps the blocked `accept` from failing with `EINTR` on most
/// platforms; the listener retries it anyway.
///
/// # Errors
///
/// Returns the `sigaction` errno if the handler could not be installed.
pub fn reap_workers_on_exit() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_child_exit),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    // SAFETY: `on_child_exit` only calls waitpid(2) and touches errno.
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
    Ok(())
}

extern "C" fn on_hangup(_: libc::c_int) {
    // SAFETY: write(2) and _exit(2) are async-signal-safe.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            HANGUP_MESSAGE.as_ptr().cast(),
            HANGUP_MESSAGE.len(),
        );
        libc::_exit(i32::from(BrokerExit::Hangup.code()));
    }
}

extern "C" fn on_child_exit(_: libc::c_int) {
    let saved = Errno::last_raw();
    // SAFETY: waitpid(2) is async-signal-safe; a null status pointer is allowed.
    while unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) } > 0 {}
    Errno::set_raw(saved);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
//
// Only dispositions that do not change how this test process handles its
// own children are exercised here; SIGHUP and SIGCHLD are covered by the
// binary tests in `tests/`.
