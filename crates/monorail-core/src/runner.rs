//! Process spawning - runs package-manager scripts with inherited stdio

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::Result;

/// Subprocess capability: run `program args..` in `cwd` and report the exit
/// code. Spawn failures propagate as errors; a child killed by a signal
/// reports exit code 1.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, program: &str, args: &[String], cwd: &Path) -> Result<i32>;
}

/// Default spawner; the child inherits the orchestrator's stdio.
pub struct ShellSpawner;

#[async_trait]
impl ProcessSpawner for ShellSpawner {
    async fn spawn(&self, program: &str, args: &[String], cwd: &Path) -> Result<i32> {
        let status = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        Ok(status.code().unwrap_or(1))
    }
}
