//! Predictor process execution.
//!
//! Flow:
//! 1. Build the invocation from the request (argv is a pure function of it)
//! 2. Spawn the predictor in its own process group, cwd = job directory
//! 3. Drain stdout/stderr concurrently while waiting under a deadline
//! 4. On exit or timeout: SIGKILL the process group so no descendant outlives
//!    the job, then reap the direct child
//!
//! If the run future is dropped mid-flight the group is killed as well.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::request::PredictionRequest;
use crate::serializer::INPUT_FILE;
use crate::store::OUTPUT_DIR;

/// Structure format requested from the predictor.
pub const OUTPUT_FORMAT: &str = "pdb";

/// Flag asking the predictor to compute alignments with its remote service.
pub const MSA_SERVER_FLAG: &str = "--use_msa_server";

/// Exact argv used to run the predictor for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictorInvocation {
    argv: Vec<String>,
}

impl PredictorInvocation {
    /// `<predictor...> predict boltz_input.yaml --out_dir boltz_output
    /// [--use_msa_server] --output_format pdb`.
    ///
    /// `predictor` is the base command, e.g. `["boltz"]`. Remote alignment is
    /// requested only when no entity brings its own MSA.
    pub fn for_request(predictor: &[String], request: &PredictionRequest) -> Self {
        let mut argv = predictor.to_vec();
        argv.extend(
            ["predict", INPUT_FILE, "--out_dir", OUTPUT_DIR]
                .into_iter()
                .map(String::from),
        );
        if !request.has_msa() {
            argv.push(MSA_SERVER_FLAG.to_string());
        }
        argv.extend(["--output_format", OUTPUT_FORMAT].into_iter().map(String::from));
        Self { argv }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn uses_msa_server(&self) -> bool {
        self.argv.iter().any(|a| a == MSA_SERVER_FLAG)
    }

    /// Space-joined form recorded in the job record.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// How the predictor process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited before the deadline. `code` is -1 if killed by a signal.
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Still running at the deadline; killed, output discarded.
    TimedOut { after: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("predictor command is empty")]
    EmptyCommand,
    #[error("failed to spawn predictor `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for predictor: {0}")]
    Wait(#[source] std::io::Error),
}

/// Runs a predictor invocation to completion or timeout.
///
/// Lets the job lifecycle be tested without a real predictor binary.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &PredictorInvocation,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutcome, RunnerError>;
}

/// Runs the predictor as a tokio child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessRunner;

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(
        &self,
        invocation: &PredictorInvocation,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutcome, RunnerError> {
        let (program, args) = invocation
            .argv()
            .split_first()
            .ok_or(RunnerError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| RunnerError::Spawn {
            program: program.clone(),
            source: e,
        })?;
        let pid = child.id();
        let mut group = GroupGuard(pid);
        tracing::debug!(pid, cwd = %cwd.display(), "Spawned predictor");

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                // The leader is gone; anything left in its group is a leak.
                group.kill();
                let code = status.code().unwrap_or(-1);
                tracing::debug!(pid, code, "Predictor exited");
                Ok(ProcessOutcome::Exited {
                    code,
                    stdout: collect(stdout).await,
                    stderr: collect(stderr).await,
                })
            }
            Ok(Err(e)) => {
                terminate(&mut child, &mut group).await;
                stdout.abort();
                stderr.abort();
                Err(RunnerError::Wait(e))
            }
            Err(_) => {
                tracing::warn!(pid, timeout_secs = timeout.as_secs_f64(), "Predictor timed out, killing");
                terminate(&mut child, &mut group).await;
                stdout.abort();
                stderr.abort();
                Ok(ProcessOutcome::TimedOut { after: timeout })
            }
        }
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader
            && let Err(e) = reader.read_to_end(&mut buf).await
        {
            tracing::warn!(error = %e, "Failed to read predictor output");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn collect(handle: JoinHandle<String>) -> String {
    handle.await.unwrap_or_default()
}

/// Kills the predictor's process group once, at the latest when dropped.
struct GroupGuard(Option<u32>);

impl GroupGuard {
    fn kill(&mut self) {
        kill_group(self.0.take());
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the whole process group, then kill and reap the direct child.
async fn terminate(child: &mut Child, group: &mut GroupGuard) {
    group.kill();
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Predictor already gone");
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "Failed to kill predictor process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
