//! Stage runner
//!
//! Executes one stage against a workspace: external commands are spawned
//! with a timeout and killed on expiry, in-process stages run on a blocking
//! thread. The exit status alone decides success; output is captured for
//! the log file and a bounded tail is kept for reporting.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::defaults::OUTPUT_TAIL_BYTES;
use crate::core::stage::{millis, Stage, StageAction, StageCommand, StageContext, StageRecord, StageStatus};
use crate::error::{ExitInfo, StageError};
use crate::infra::filesystem;

/// How long to keep reading output after the process has exited or been killed
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs stages and writes their logs
#[derive(Debug, Clone)]
pub struct StageRunner {
    log_dir: PathBuf,
    dev: bool,
    tail_bytes: usize,
}

impl StageRunner {
    /// Create a runner writing full logs to `log_dir`
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            dev: false,
            tail_bytes: OUTPUT_TAIL_BYTES,
        }
    }

    /// Enable development mode
    #[must_use]
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Override how much output is kept in records
    #[must_use]
    pub fn with_tail_bytes(mut self, tail_bytes: usize) -> Self {
        self.tail_bytes = tail_bytes;
        self
    }

    /// Log file for a stage
    pub fn log_path(&self, stage: &Stage) -> PathBuf {
        self.log_dir.join(format!("{}.log", stage.name))
    }

    /// Run a stage to completion, failure, or timeout.
    ///
    /// `started_after` is the stage's offset from the beginning of the run,
    /// recorded as-is.
    pub async fn run(
        &self,
        stage: &Stage,
        workspace: &Path,
        started_after: Duration,
    ) -> Result<StageRecord, StageError> {
        let ctx = stage.context(workspace, self.dev);
        info!(stage = %stage.name, "running stage");
        let started = Instant::now();

        let (exit_code, output) = match &stage.action {
            StageAction::Command(command) => self.run_command(stage, command, &ctx).await?,
            StageAction::InProcess(f) => {
                let f = f.clone();
                let task_ctx = ctx.clone();
                let handle = tokio::task::spawn_blocking(move || f(&task_ctx));
                match tokio::time::timeout(stage.timeout, handle).await {
                    Err(_) => {
                        // The blocking thread cannot be interrupted; its result is discarded
                        warn!(stage = %stage.name, "in-process stage timed out");
                        return Err(StageError::StageTimeout {
                            stage: stage.name,
                            timeout: stage.timeout,
                        });
                    }
                    Ok(Err(join_error)) => {
                        return Err(self.failure(stage, ExitInfo::Internal(join_error.to_string()), ""));
                    }
                    Ok(Ok(Err(message))) => {
                        return Err(self.failure(stage, ExitInfo::Internal(message.clone()), &message));
                    }
                    Ok(Ok(Ok(()))) => (None, String::new()),
                }
            }
        };

        let duration = started.elapsed();
        debug!(stage = %stage.name, elapsed_ms = millis(duration), "stage succeeded");

        Ok(StageRecord {
            name: stage.name,
            status: StageStatus::Succeeded,
            started_after_ms: millis(started_after),
            duration_ms: millis(duration),
            exit_code,
            output: tail(&output, self.tail_bytes),
            log: matches!(stage.action, StageAction::Command(_)).then(|| self.log_path(stage)),
        })
    }

    async fn run_command(
        &self,
        stage: &Stage,
        command: &StageCommand,
        ctx: &StageContext,
    ) -> Result<(Option<i32>, String), StageError> {
        let program = resolve_program(&command.program, &ctx.workspace).map_err(|error| {
            StageError::Spawn {
                stage: stage.name,
                program: command.program.clone(),
                error,
            }
        })?;
        let args: Vec<String> = command
            .args_for(ctx.dev)
            .iter()
            .map(|a| substitute_env_vars(a))
            .collect();

        debug!(stage = %stage.name, program = %program.display(), ?args, "spawning process");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(&ctx.workspace)
            .env("KILN_STAGE", stage.name.as_str())
            .env("KILN_WORKSPACE", &ctx.workspace)
            .env("KILN_DEV", if ctx.dev { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(input) = &ctx.input {
            cmd.env("KILN_INPUT", input);
        }
        if let Some(output) = &ctx.output {
            cmd.env("KILN_OUTPUT", output);
        }

        let mut child = cmd.spawn().map_err(|e| StageError::Spawn {
            stage: stage.name,
            program: command.program.clone(),
            error: e.to_string(),
        })?;

        // Both pipes feed one buffer line by line, so the log keeps the order
        // in which the process wrote to stdout and stderr
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain_lines(stdout, Arc::clone(&captured))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain_lines(stderr, Arc::clone(&captured))));
        }

        let status = match tokio::time::timeout(stage.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                join_readers(readers).await;
                let combined = take_output(&captured).await;
                self.write_log(stage, &combined);
                return Err(self.failure(stage, ExitInfo::Internal(e.to_string()), &combined));
            }
            Err(_) => {
                warn!(stage = %stage.name, timeout_secs = stage.timeout.as_secs(), "stage timed out, killing process");
                if let Err(e) = child.kill().await {
                    debug!(stage = %stage.name, error = %e, "failed to kill timed-out process");
                }
                join_readers(readers).await;
                let mut combined = take_output(&captured).await;
                if !combined.is_empty() && !combined.ends_with('\n') {
                    combined.push('\n');
                }
                combined.push_str(&format!(
                    "[kiln] stage timed out after {:.1}s; process killed\n",
                    stage.timeout.as_secs_f64()
                ));
                self.write_log(stage, &combined);
                return Err(StageError::StageTimeout {
                    stage: stage.name,
                    timeout: stage.timeout,
                });
            }
        };

        join_readers(readers).await;
        let combined = take_output(&captured).await;
        self.write_log(stage, &combined);

        if !status.success() {
            let exit = status.code().map_or(ExitInfo::Signal, ExitInfo::Code);
            return Err(self.failure(stage, exit, &combined));
        }

        Ok((status.code(), combined))
    }

    fn failure(&self, stage: &Stage, exit: ExitInfo, output: &str) -> StageError {
        let log = self.log_path(stage);
        if matches!(stage.action, StageAction::InProcess(_)) {
            self.write_log(stage, output);
        }
        StageError::StageFailure {
            stage: stage.name,
            exit,
            log,
            output: tail(output, self.tail_bytes),
        }
    }

    fn write_log(&self, stage: &Stage, content: &str) {
        let path = self.log_path(stage);
        if let Err(e) = filesystem::write_file(&path, content.as_bytes()) {
            warn!(stage = %stage.name, error = %e, "failed to write stage log");
        }
    }
}

/// Copy `reader` into `sink` one line at a time until EOF
async fn drain_lines<R>(reader: R, sink: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => sink.lock().await.extend_from_slice(&line),
            Err(e) => {
                debug!(error = %e, "stopped reading process output");
                break;
            }
        }
    }
}

/// Wait for the output readers, giving up on pipes still held open by
/// orphaned grandchildren
async fn join_readers(readers: Vec<JoinHandle<()>>) {
    let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_GRACE;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

async fn take_output(captured: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *captured.lock().await);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Find a program the way a shell would, also accepting workspace-relative paths
fn resolve_program(program: &str, workspace: &Path) -> Result<PathBuf, String> {
    which::which_in(program, std::env::var_os("PATH"), workspace).map_err(|e| e.to_string())
}

/// Last `limit` bytes of `s`, cut on a character boundary
pub fn tail(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}

/// Substitute environment variables in a string using `${VAR}` syntax.
///
/// Unset variables expand to the empty string.
pub fn substitute_env_vars(input: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap_or_else(|_| unreachable!())
    });

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
