//! Compiler and runner collaborator.
//!
//! [`ProcessToolchain`] writes the source into a throwaway workspace,
//! invokes the configured compiler, and optionally runs the produced
//! binary. Every child process runs under a wall-clock limit with a
//! cleared environment, and captured output is truncated.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use quill_protocol::{CompileOutput, RunOutput, ToolchainError, ToolchainPort};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, instrument, warn};

const SOURCE_FILE: &str = "main.c";
const BINARY_FILE: &str = "program";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainLimits {
    pub max_runtime_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for ToolchainLimits {
    fn default() -> Self {
        Self {
            max_runtime_secs: 10,
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    compiler: String,
    flags: Vec<String>,
    limits: ToolchainLimits,
    work_root: PathBuf,
}

/// What one child process produced.
struct Captured {
    success: bool,
    stdout: String,
    stderr: String,
}

impl Default for ProcessToolchain {
    fn default() -> Self {
        Self::new("cc")
    }
}

impl ProcessToolchain {
    pub fn new(compiler: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
            flags: vec!["-Wall".to_owned()],
            limits: ToolchainLimits::default(),
            work_root: std::env::temp_dir(),
        }
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_limits(mut self, limits: ToolchainLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn compiler(&self) -> &str {
        &self.compiler
    }

    fn truncate(output: Vec<u8>, max_output_bytes: usize) -> String {
        let mut output = output;
        if output.len() > max_output_bytes {
            output.truncate(max_output_bytes);
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    async fn prepare(&self, source: &str) -> Result<PathBuf, ToolchainError> {
        let dir = self
            .work_root
            .join(format!("quill-build-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|error| ToolchainError::Workspace(format!("{}: {error}", dir.display())))?;
        tokio::fs::write(dir.join(SOURCE_FILE), source)
            .await
            .map_err(|error| ToolchainError::Workspace(format!("{}: {error}", dir.display())))?;
        Ok(dir)
    }

    async fn cleanup(dir: &Path) {
        if let Err(error) = tokio::fs::remove_dir_all(dir).await {
            warn!(dir = %dir.display(), %error, "failed to remove toolchain workspace");
        }
    }

    #[instrument(skip_all, fields(program = %program, args_count = args.len(), cwd = %cwd.display()))]
    async fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<Captured, ToolchainError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .env_clear()
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        let limit = Duration::from_secs(self.limits.max_runtime_secs.max(1));
        match timeout(limit, command.output()).await {
            Ok(output) => {
                let output = output.map_err(|error| ToolchainError::Spawn {
                    command: program.to_owned(),
                    message: error.to_string(),
                })?;
                debug!(exit_code = output.status.code().unwrap_or(-1), "process finished");
                Ok(Captured {
                    success: output.status.success(),
                    stdout: Self::truncate(output.stdout, self.limits.max_output_bytes),
                    stderr: Self::truncate(output.stderr, self.limits.max_output_bytes),
                })
            }
            Err(_) => {
                warn!(
                    max_runtime_secs = self.limits.max_runtime_secs,
                    "process timed out"
                );
                Ok(Captured {
                    success: false,
                    stdout: String::new(),
                    stderr: format!("timed out after {} seconds", self.limits.max_runtime_secs),
                })
            }
        }
    }

    async fn compile_in(&self, dir: &Path) -> Result<Captured, ToolchainError> {
        let mut args = self.flags.clone();
        args.extend([
            SOURCE_FILE.to_owned(),
            "-o".to_owned(),
            BINARY_FILE.to_owned(),
        ]);
        self.execute(&self.compiler, &args, dir).await
    }

    async fn run_in(&self, dir: &Path) -> Result<RunOutput, ToolchainError> {
        let compiled = self.compile_in(dir).await?;
        if !compiled.success {
            return Ok(RunOutput {
                success: false,
                output: compiled.stdout,
                error: compiled.stderr,
            });
        }
        let binary = dir.join(BINARY_FILE);
        let ran = self.execute(&binary.to_string_lossy(), &[], dir).await?;
        Ok(RunOutput {
            success: ran.success,
            output: ran.stdout,
            error: ran.stderr,
        })
    }
}

#[async_trait]
impl ToolchainPort for ProcessToolchain {
    #[instrument(skip_all, fields(compiler = %self.compiler, source_len = source.len()))]
    async fn compile(&self, source: &str) -> Result<CompileOutput, ToolchainError> {
        let dir = self.prepare(source).await?;
        let result = self.compile_in(&dir).await;
        Self::cleanup(&dir).await;
        let captured = result?;
        Ok(CompileOutput {
            success: captured.success,
            stdout: captured.stdout,
            stderr: captured.stderr,
        })
    }

    #[instrument(skip_all, fields(compiler = %self.compiler, source_len = source.len()))]
    async fn run(&self, source: &str) -> Result<RunOutput, ToolchainError> {
        let dir = self.prepare(source).await?;
        let result = self.run_in(&dir).await;
        Self::cleanup(&dir).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn truncate_caps_output_bytes() {
        assert_eq!(ProcessToolchain::truncate(b"abcdef".to_vec(), 3), "abc");
        assert_eq!(ProcessToolchain::truncate(b"ab".to_vec(), 3), "ab");
    }

    #[tokio::test]
    async fn compiler_exit_status_maps_to_success() -> Result<()> {
        let ok = ProcessToolchain::new("true").with_flags(Vec::new());
        assert!(ok.compile("int main(void) { return 0; }").await?.success);

        let failing = ProcessToolchain::new("false").with_flags(Vec::new());
        let output = failing.compile("int main(void) {").await?;
        assert!(!output.success);

        let ran = failing.run("int main(void) {").await?;
        assert!(!ran.success);
        Ok(())
    }

    #[tokio::test]
    async fn missing_compiler_is_a_spawn_error() {
        let toolchain = ProcessToolchain::new("quill-no-such-compiler");
        let error = toolchain.compile("int main(void) {}").await.unwrap_err();
        assert!(matches!(error, ToolchainError::Spawn { .. }));
    }
}
