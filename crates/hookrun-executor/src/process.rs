//! Shared process runner for local executors.

use hookrun_core::executor::{ActionContext, JobLog, LogStream};
use hookrun_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Name of the event file written next to the repository checkout.
pub(crate) const EVENT_FILE: &str = "event.json";

/// Apply the working directory and hookrun environment to `cmd`.
pub(crate) async fn prepare(cmd: &mut Command, ctx: &ActionContext<'_>) -> Result<()> {
    let event_path = event_file_path(ctx.repository_dir);
    let event_json = serde_json::to_vec_pretty(ctx.event)
        .map_err(|e| Error::Internal(format!("serializing event: {}", e)))?;
    tokio::fs::write(&event_path, event_json).await?;

    cmd.current_dir(ctx.repository_dir)
        .envs(&ctx.action.env)
        .env("HOOKRUN_JOB_ID", ctx.job_id.to_string())
        .env("HOOKRUN_ACTION", &ctx.action.name)
        .env("HOOKRUN_EVENT_ID", &ctx.event.id)
        .env("HOOKRUN_EVENT_KIND", &ctx.event.kind)
        .env("HOOKRUN_EVENT_PATH", &event_path);
    Ok(())
}

fn event_file_path(repository_dir: &Path) -> PathBuf {
    repository_dir
        .parent()
        .unwrap_or(repository_dir)
        .join(EVENT_FILE)
}

/// Spawn `cmd`, stream its output into `log` and fail on a non-zero exit.
pub(crate) async fn run(mut cmd: Command, label: &str, log: &JobLog) -> Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::ExecutionFailed(format!("spawning {}: {}", label, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Both streams must be drained concurrently or the child can block on a
    // full pipe.
    let (status, (), ()) = tokio::join!(
        child.wait(),
        forward(stdout, LogStream::Stdout, log),
        forward(stderr, LogStream::Stderr, log),
    );
    let status = status?;

    let code = status.code().unwrap_or(-1);
    info!(label, exit_code = code, success = status.success(), "Process exited");
    log.system(format!("process exited with code {}", code))?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::ExecutionFailed(format!("exit code {}", code)))
    }
}

async fn forward<R>(reader: Option<R>, stream: LogStream, log: &JobLog)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    // Output is read as raw bytes; a non-UTF-8 line must not stop draining
    // the pipe.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                debug!(?stream, "{}", line);
                if let Err(e) = log.line(stream, line) {
                    warn!(error = %e, "Failed to write job log");
                }
            }
            Err(e) => {
                warn!(error = %e, ?stream, "Failed to read process output");
                break;
            }
        }
    }
}
