//! Shell command executor.

use async_trait::async_trait;
use hookrun_core::action::ActionSpec;
use hookrun_core::executor::{ActionContext, ActionExecutor, JobLog};
use hookrun_core::{Error, Result};
use tokio::process::Command;
use tracing::info;

use crate::process;

/// Runs `shell` actions with `sh -c` in the job's repository checkout.
#[derive(Debug, Default, Clone)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    fn command_line<'a>(ctx: &ActionContext<'a>) -> Result<&'a str> {
        match &ctx.action.spec {
            ActionSpec::Shell { command } => Ok(command),
            other => Err(Error::InvalidInput(format!(
                "shell executor cannot run {} action '{}'",
                other.kind(),
                ctx.action.name
            ))),
        }
    }
}

#[async_trait]
impl ActionExecutor for ShellExecutor {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(&self, ctx: ActionContext<'_>, log: &JobLog) -> Result<()> {
        let command_line = Self::command_line(&ctx)?;
        info!(job_id = %ctx.job_id, action = %ctx.action.name, "Running shell action");
        log.system(format!("$ {}", command_line))?;

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command_line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command_line);
            c
        };
        process::prepare(&mut cmd, &ctx).await?;
        process::run(cmd, &ctx.action.name, log).await
    }

    async fn execute_dry_run(&self, ctx: ActionContext<'_>, log: &JobLog) -> Result<()> {
        let command_line = Self::command_line(&ctx)?;
        log.system(format!(
            "[dry run] would run in {}: {}",
            ctx.repository_dir.display(),
            command_line
        ))?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use hookrun_core::{ActionConfig, Event, JobId};
    use serde_json::json;
    use std::collections::HashMap;

    fn action(command: &str) -> ActionConfig {
        ActionConfig {
            name: "test-action".to_string(),
            spec: ActionSpec::Shell {
                command: command.to_string(),
            },
            env: HashMap::from([("GREETING".to_string(), "hello".to_string())]),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        repository: std::path::PathBuf,
        log: JobLog,
        event: Event,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repository = dir.path().join("issue-42").join("repository");
        std::fs::create_dir_all(&repository).unwrap();
        let log = JobLog::create(dir.path().join("logs").join("run.log")).unwrap();
        let event = Event::new("evt-1", "issues", json!({"issue": {"number": 42}}));
        Fixture {
            _dir: dir,
            repository,
            log,
            event,
        }
    }

    #[tokio::test]
    async fn test_shell_success_streams_output() {
        let f = fixture();
        let action = action("echo \"$GREETING $HOOKRUN_JOB_ID\"; echo err >&2; pwd");
        let ctx = ActionContext {
            job_id: JobId::new(7),
            action: &action,
            event: &f.event,
            repository_dir: &f.repository,
        };

        ShellExecutor::new().execute(ctx, &f.log).await.unwrap();

        let content = std::fs::read_to_string(f.log.path()).unwrap();
        assert!(content.contains("[ ] hello 7"));
        assert!(content.contains("[!] err"));
        assert!(content.contains("repository"));
        assert!(content.contains("exited with code 0"));
    }

    #[tokio::test]
    async fn test_shell_non_zero_exit_fails() {
        let f = fixture();
        let action = action("exit 3");
        let ctx = ActionContext {
            job_id: JobId::new(1),
            action: &action,
            event: &f.event,
            repository_dir: &f.repository,
        };

        let err = ShellExecutor::new().execute(ctx, &f.log).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(ref m) if m == "exit code 3"));
    }

    #[tokio::test]
    async fn test_event_file_written_to_work_dir() {
        let f = fixture();
        let action = action("cat \"$HOOKRUN_EVENT_PATH\"");
        let ctx = ActionContext {
            job_id: JobId::new(1),
            action: &action,
            event: &f.event,
            repository_dir: &f.repository,
        };

        ShellExecutor::new().execute(ctx, &f.log).await.unwrap();

        let event_path = f.repository.parent().unwrap().join("event.json");
        let stored: Event =
            serde_json::from_slice(&std::fs::read(event_path).unwrap()).unwrap();
        assert_eq!(stored, f.event);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_execute() {
        let f = fixture();
        let marker = f.repository.join("touched");
        let action = action(&format!("touch {}", marker.display()));
        let ctx = ActionContext {
            job_id: JobId::new(1),
            action: &action,
            event: &f.event,
            repository_dir: &f.repository,
        };

        ShellExecutor::new().execute_dry_run(ctx, &f.log).await.unwrap();

        assert!(!marker.exists());
        let content = std::fs::read_to_string(f.log.path()).unwrap();
        assert!(content.contains("[dry run]"));
    }

    #[tokio::test]
    async fn test_rejects_other_action_kinds() {
        let f = fixture();
        let action = ActionConfig {
            name: "agent".to_string(),
            spec: ActionSpec::Agent {
                prompt: "hi".to_string(),
            },
            env: HashMap::new(),
        };
        let ctx = ActionContext {
            job_id: JobId::new(1),
            action: &action,
            event: &f.event,
            repository_dir: &f.repository,
        };

        let err = ShellExecutor::new().execute(ctx, &f.log).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_drained() {
        let f = fixture();
        let action = action("printf '\\377\\n'; sleep 0.3; echo still-running; exit 0");
        let ctx = ActionContext {
            job_id: JobId::new(3),
            action: &action,
            event: &f.event,
            repository_dir: &f.repository,
        };

        ShellExecutor::new().execute(ctx, &f.log).await.unwrap();

        let content = std::fs::read_to_string(f.log.path()).unwrap();
        assert!(content.contains('\u{FFFD}'));
        assert!(content.contains("still-running"));
        assert!(content.contains("process exited with code 0"));
    }
}
