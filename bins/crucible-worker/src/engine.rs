/// Sandbox Engine - Constrained Subprocess Execution
///
/// **Core Responsibility:**
/// Run exactly one child process under resource limits and return its raw
/// captured outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to confine and observe a child (rlimits, process
///   groups, output caps, wall clock)
/// - Engine does NOT know verdict rules
/// - Engine does NOT know the job lifecycle
///
/// **Safety Guarantees:**
/// - Hard timeout: wall-clock timer armed at spawn, SIGKILL to the whole
///   process group on expiry
/// - Bounded capture: each stream is drained into a capped buffer; a child
///   crossing the cap is killed, buffered bytes are kept
/// - Guaranteed teardown: the process group is SIGKILLed on every exit
///   path, so double-forked descendants cannot outlive the call
///
/// **Why This Exists:**
/// Every invocation (compile or run) goes through the same chokepoint, so
/// limits and cleanup cannot be forgotten at individual call sites.

use crucible_common::error::JudgeError;
use crucible_common::types::RunResult;
use crucible_common::Settings;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Read granularity for stream draining.
const READ_CHUNK: usize = 8192;

/// One subprocess invocation: which script to run, as whom, with what.
#[derive(Debug, Clone)]
pub struct SandboxCall {
    pub exe: PathBuf,
    pub argv: Vec<String>,
    pub timeout_ms: u64,
    pub stdin: String,
    /// Child environment; replaces the parent environment entirely.
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

/// Subprocess sandbox around `prlimit`/`bash` with per-call limits.
#[derive(Debug, Clone)]
pub struct Sandbox {
    max_process_count: u32,
    max_open_files: u32,
    output_max_size: usize,
    disable_networking: bool,
}

impl Sandbox {
    pub fn new(settings: &Settings) -> Self {
        Self {
            max_process_count: settings.max_process_count,
            max_open_files: settings.max_open_files,
            output_max_size: settings.output_max_size,
            disable_networking: settings.disable_networking,
        }
    }

    /// Arguments placed between `prlimit` and the wrapped command.
    fn wrapper_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--nproc={}", self.max_process_count),
            format!("--nofile={}", self.max_open_files),
        ];
        if self.disable_networking {
            args.push("nosocket".to_string());
        }
        args
    }

    /// Execute one child to completion.
    ///
    /// The full command line is
    /// `prlimit --nproc=<P> --nofile=<F> [nosocket] bash <exe> <argv...>`,
    /// run with the given cwd, uid and gid, as the leader of a fresh
    /// process group.
    ///
    /// ## Returns
    /// The captured `RunResult` on any child outcome (including kills);
    /// `JudgeError::Spawn` only when the child could not be started or
    /// reaped at all.
    pub async fn safe_call(&self, call: SandboxCall) -> Result<RunResult, JudgeError> {
        trace!(
            exe = %call.exe.display(),
            argv = ?call.argv,
            uid = call.uid,
            gid = call.gid,
            "spawn"
        );

        let mut cmd = Command::new("prlimit");
        cmd.args(self.wrapper_args())
            .arg("bash")
            .arg(&call.exe)
            .args(&call.argv)
            .env_clear()
            .envs(&call.env)
            .current_dir(&call.cwd)
            .uid(call.uid)
            .gid(call.gid)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The child becomes its own process-group leader so one killpg
        // reaches everything it forks.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| JudgeError::spawn(e.to_string()))?;
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

        // Feed the whole payload, then drop the handle to close the stream.
        if let Some(mut stdin) = child.stdin.take() {
            let payload = call.stdin.clone().into_bytes();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    trace!(error = %e, "stdin write aborted");
                }
            });
        }

        // Both streams are drained concurrently; draining one at a time
        // deadlocks once the other fills its pipe buffer.
        let cap = self.output_max_size;
        let stdout_task = tokio::spawn(drain_capped(child.stdout.take(), cap, pgid));
        let stderr_task = tokio::spawn(drain_capped(child.stderr.take(), cap, pgid));

        let mut timed_out = false;
        let wait_result = tokio::select! {
            status = child.wait() => status,
            _ = tokio::time::sleep(Duration::from_millis(call.timeout_ms)) => {
                timed_out = true;
                debug!(
                    exe = %call.exe.display(),
                    timeout_ms = call.timeout_ms,
                    "Wall clock expired, killing process group"
                );
                kill_group(pgid);
                child.wait().await
            }
        };

        let (stdout, stdout_capped) = stdout_task.await.unwrap_or((Vec::new(), false));
        let (stderr, stderr_capped) = stderr_task.await.unwrap_or((Vec::new(), false));

        // Teardown on every exit path; a kill aimed at an already-dead
        // group is swallowed.
        kill_group(pgid);

        if stdout_capped || stderr_capped {
            warn!(
                exe = %call.exe.display(),
                output_max_size = cap,
                "Output cap exceeded, child killed"
            );
        }

        // A failed wait still reports whatever the drain tasks captured.
        let status = match wait_result {
            Ok(status) => status,
            Err(e) => {
                return Err(JudgeError::Spawn {
                    message: e.to_string(),
                    stdout,
                    stderr,
                });
            }
        };

        let signal = if timed_out {
            Some(Signal::SIGKILL.as_str().to_string())
        } else {
            status.signal().map(signal_name)
        };

        Ok(RunResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
            signal,
            stdin: call.stdin,
        })
    }
}

/// Accumulate a stream into a bounded buffer.
///
/// Crossing `cap` kills the process group and returns what was buffered
/// before the crossing chunk, flagged as capped.
async fn drain_capped<R>(pipe: Option<R>, cap: usize, pgid: Option<Pid>) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = Vec::new();
    let Some(mut pipe) = pipe else {
        return (buffer, false);
    };

    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => return (buffer, false),
            Ok(n) => {
                if buffer.len() + n > cap {
                    kill_group(pgid);
                    return (buffer, true);
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// SIGKILL an entire process group. The child is spawned as its group
/// leader, so its pid doubles as the pgid.
fn kill_group(pgid: Option<Pid>) {
    if let Some(pgid) = pgid {
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("SIG{}", signal),
    }
}
