//! Runs enforcement hook commands under a deadline.
//!
//! Hooks are fire-and-forget from the gate's point of view: their stdout is
//! discarded and only stderr is kept, for the log line when a hook fails.

use std::io::Read;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use usbgate_core::error::{GateError, GateResult};

const FIRST_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// An argv plus the deadline it has to finish within.
#[derive(Debug, Clone)]
pub struct HookCommand {
    argv: Vec<String>,
    timeout: Duration,
}

/// What a finished hook left behind.
#[derive(Debug)]
pub struct HookOutput {
    /// Exit code, or `None` when the hook was ended by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl HookOutput {
    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }
}

impl HookCommand {
    /// Returns `None` for an empty argv.
    pub fn new(argv: Vec<String>, timeout: Duration) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self { argv, timeout })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Start the hook with `env` added to its environment and wait for it.
    pub fn run(&self, env: &[(&str, &str)]) -> GateResult<HookOutput> {
        let mut child = Command::new(self.program())
            .args(&self.argv[1..])
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                GateError::Enforcement(format!("failed to spawn {}: {err}", self.program()))
            })?;

        let stderr = collect_stderr(child.stderr.take());
        // A killed hook may have left children holding the pipe open, so its
        // reader is left to finish on its own.
        let Some(status) = self.wait_until_deadline(&mut child)? else {
            return Err(GateError::Enforcement(format!(
                "{} killed after exceeding {:?}",
                self.program(),
                self.timeout
            )));
        };
        let stderr = stderr
            .join()
            .map_err(|_| GateError::Enforcement("hook stderr reader panicked".into()))?;

        Ok(HookOutput {
            code: status.code(),
            stderr,
        })
    }

    /// Poll with a growing back-off. Returns `None` after killing an overrunning hook.
    fn wait_until_deadline(&self, child: &mut Child) -> GateResult<Option<ExitStatus>> {
        let deadline = Instant::now() + self.timeout;
        let mut backoff = FIRST_BACKOFF;

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

/// Read stderr to the end on a helper thread so a noisy hook cannot fill the
/// pipe and stall. Read errors just truncate what is reported.
fn collect_stderr(pipe: Option<ChildStderr>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
