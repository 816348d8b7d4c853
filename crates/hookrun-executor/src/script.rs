//! Script executor.

use async_trait::async_trait;
use hookrun_core::action::ActionSpec;
use hookrun_core::executor::{ActionContext, ActionExecutor, JobLog};
use hookrun_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use crate::process;

/// Runs `script` actions, optionally through an interpreter, in the job's
/// repository checkout.
///
/// Relative script paths resolve against `script_root`, which defaults to the
/// process working directory.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    script_root: PathBuf,
}

impl ScriptExecutor {
    pub fn new() -> Self {
        Self {
            script_root: PathBuf::from("."),
        }
    }

    /// Resolve relative script paths against `root`, e.g. the directory of the
    /// configuration file.
    pub fn with_script_root(root: impl Into<PathBuf>) -> Self {
        Self {
            script_root: root.into(),
        }
    }

    fn script<'a>(ctx: &ActionContext<'a>) -> Result<(&'a Path, Option<&'a str>)> {
        match &ctx.action.spec {
            ActionSpec::Script { path, interpreter } => Ok((path, interpreter.as_deref())),
            other => Err(Error::InvalidInput(format!(
                "script executor cannot run {} action '{}'",
                other.kind(),
                ctx.action.name
            ))),
        }
    }

    fn resolve(&self, script: &Path) -> Result<PathBuf> {
        let joined = if script.is_absolute() {
            script.to_path_buf()
        } else {
            self.script_root.join(script)
        };
        Ok(std::path::absolute(joined)?)
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for ScriptExecutor {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn execute(&self, ctx: ActionContext<'_>, log: &JobLog) -> Result<()> {
        let (script, interpreter) = Self::script(&ctx)?;
        let script = self.resolve(script)?;
        if !tokio::fs::try_exists(&script).await? {
            return Err(Error::NotFound(format!("script {}", script.display())));
        }

        info!(
            job_id = %ctx.job_id,
            action = %ctx.action.name,
            script = %script.display(),
            "Running script action"
        );

        let mut cmd = match interpreter {
            Some(interpreter) => {
                log.system(format!("$ {} {}", interpreter, script.display()))?;
                let mut c = Command::new(interpreter);
                c.arg(&script);
                c
            }
            None => {
                log.system(format!("$ {}", script.display()))?;
                Command::new(&script)
            }
        };
        process::prepare(&mut cmd, &ctx).await?;
        process::run(cmd, &ctx.action.name, log).await
    }

    async fn execute_dry_run(&self, ctx: ActionContext<'_>, log: &JobLog) -> Result<()> {
        let (script, interpreter) = Self::script(&ctx)?;
        let script = self.resolve(script)?;
        log.system(format!(
            "[dry run] would run in {}: {}{}",
            ctx.repository_dir.display(),
            interpreter.map(|i| format!("{} ", i)).unwrap_or_default(),
            script.display()
        ))?;
        Ok(())
    }
}
