//! ForkSpawner: one worker process per connection via `fork(2)`.

use std::io;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, warn};

use crate::application::supervisor::{SpawnRole, WorkerSpawner};

/// Spawns workers with `fork` and reaps them with `waitpid(-1, WNOHANG)`.
#[derive(Debug, Default)]
pub struct ForkSpawner;

impl ForkSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerSpawner for ForkSpawner {
    fn reap_finished(&mut self) -> usize {
        let mut reaped = 0;
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return reaped,
                Ok(status) => {
                    debug!(?status, "worker finished");
                    reaped += 1;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("waitpid failed: {e}");
                    return reaped;
                }
            }
        }
    }

    fn spawn(&mut self) -> io::Result<SpawnRole> {
        // SAFETY: the broker runs a single thread, so the child cannot
        // inherit a lock held by some other thread mid-operation.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(SpawnRole::Parent {
                worker: child.as_raw().unsigned_abs(),
            }),
            ForkResult::Child => Ok(SpawnRole::Worker),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
