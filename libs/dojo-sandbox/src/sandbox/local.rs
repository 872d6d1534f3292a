// Local-process backend: one scratch directory per attempt, one OS process per run

use super::{
    check_file_name, CapturedStream, CommandSpec, ProcessOutput, Program, Sandbox, Workspace,
};
use crate::error::SandboxError;
use async_trait::async_trait;
use dojo_common::types::Language;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs toolchains as plain child processes of the worker.
///
/// Isolation is coarse: a cleared environment, a private scratch directory
/// and a hard kill on deadline. No namespaces, no seccomp.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    scratch_root: PathBuf,
}

impl LocalSandbox {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn open_workspace(
        &self,
        attempt_id: Uuid,
        language: Language,
    ) -> Result<Box<dyn Workspace>, SandboxError> {
        tokio::fs::create_dir_all(&self.scratch_root).await?;

        // Keyed by attempt so concurrent workers never share a scratch path
        let dir = tempfile::Builder::new()
            .prefix(&format!("attempt-{}-", attempt_id))
            .tempdir_in(&self.scratch_root)?;

        debug!(
            attempt_id = %attempt_id,
            language = %language,
            path = %dir.path().display(),
            "Opened local workspace"
        );

        Ok(Box::new(LocalWorkspace { dir }))
    }
}

struct LocalWorkspace {
    dir: TempDir,
}

impl LocalWorkspace {
    fn resolve_program(&self, program: &Program) -> Result<PathBuf, SandboxError> {
        match program {
            Program::Tool(name) => Ok(PathBuf::from(name)),
            Program::Artifact(name) => Ok(self.dir.path().join(check_file_name(name)?)),
        }
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    async fn write_file(&self, name: &str, contents: &str) -> Result<(), SandboxError> {
        let path = self.dir.path().join(check_file_name(name)?);
        tokio::fs::write(&path, contents).await?;
        Ok(())
    }

    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, SandboxError> {
        let program = self.resolve_program(&command.program)?;
        let path_env = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .current_dir(self.dir.path())
            .env_clear()
            .env("PATH", path_env)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        if let (Some(input), Some(mut stdin)) = (command.stdin.clone(), child.stdin.take()) {
            // Fed from a separate task: a child that never reads must not block us
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "Child closed stdin before reading all input");
                }
            });
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), capture(stdout), capture(stderr));
            Ok::<_, std::io::Error>((status?, stdout?, stderr?))
        };
        let waited = tokio::time::timeout(timeout, collect).await;

        match waited {
            Ok(Ok((status, stdout, stderr))) => {
                let mut stderr = stderr.into_text();
                let exit_code = status.code();
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    if let Some(signal) = status.signal() {
                        stderr.push_str(&format!("\n[Process killed by signal {}]", signal));
                    }
                }
                Ok(ProcessOutput {
                    stdout: stdout.into_text(),
                    stderr,
                    exit_code,
                    timed_out: false,
                    elapsed: start.elapsed(),
                })
            }
            Ok(Err(e)) => Err(SandboxError::Io(e)),
            Err(_) => {
                // kill_on_drop would also do this once `child` goes out of scope
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Child already gone at deadline");
                }
                warn!(
                    program = %command.display_name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Process exceeded deadline, killed"
                );
                Ok(ProcessOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    timed_out: true,
                    elapsed: start.elapsed(),
                })
            }
        }
    }
}

/// Read a pipe to EOF, keeping at most `MAX_CAPTURE_BYTES`
async fn capture<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<CapturedStream> {
    let mut captured = CapturedStream::default();
    let Some(mut pipe) = pipe else {
        return Ok(captured);
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(captured);
        }
        captured.push(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MAX_CAPTURE_BYTES;

    fn sandbox() -> (TempDir, LocalSandbox) {
        let root = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(root.path());
        (root, sandbox)
    }

    #[tokio::test]
    async fn test_workspaces_are_namespaced_per_attempt() {
        let (root, sandbox) = sandbox();
        let id = Uuid::new_v4();
        let first = sandbox.open_workspace(id, Language::Cpp).await.unwrap();
        let second = sandbox.open_workspace(id, Language::Cpp).await.unwrap();

        first.write_file("solution.cpp", "first").await.unwrap();
        second.write_file("solution.cpp", "second").await.unwrap();

        let dirs: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(dirs.len(), 2);
        for entry in dirs {
            let name = entry.unwrap().file_name().into_string().unwrap();
            assert!(name.starts_with(&format!("attempt-{}-", id)));
        }
    }

    #[tokio::test]
    async fn test_workspace_removed_on_drop() {
        let (root, sandbox) = sandbox();
        let workspace = sandbox
            .open_workspace(Uuid::new_v4(), Language::Python)
            .await
            .unwrap();
        workspace.write_file("solution.py", "pass").await.unwrap();
        drop(workspace);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_escaping_file_names() {
        let (_root, sandbox) = sandbox();
        let workspace = sandbox
            .open_workspace(Uuid::new_v4(), Language::Python)
            .await
            .unwrap();
        assert!(workspace.write_file("../escape.py", "x").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_and_stdin() {
        let (_root, sandbox) = sandbox();
        let workspace = sandbox
            .open_workspace(Uuid::new_v4(), Language::Python)
            .await
            .unwrap();
        let cmd = CommandSpec::tool("sh")
            .arg("-c")
            .arg("cat; echo oops >&2; exit 3")
            .stdin("hello");
        let output = workspace.run(&cmd, Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("DOJO_LEAK_CHECK", "secret");
        let (_root, sandbox) = sandbox();
        let workspace = sandbox
            .open_workspace(Uuid::new_v4(), Language::Python)
            .await
            .unwrap();
        let cmd = CommandSpec::tool("sh")
            .arg("-c")
            .arg("echo \"${DOJO_LEAK_CHECK:-unset} $EXTRA\"")
            .env("EXTRA", "given");
        let output = workspace.run(&cmd, Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stdout.trim(), "unset given");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_kills_process_promptly() {
        let (_root, sandbox) = sandbox();
        let workspace = sandbox
            .open_workspace(Uuid::new_v4(), Language::Python)
            .await
            .unwrap();
        let cmd = CommandSpec::tool("sh").arg("-c").arg("while :; do :; done");
        let started = Instant::now();
        let output = workspace
            .run(&cmd, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
        assert!(started.elapsed() < Duration::from_millis(300 + 250));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let (_root, sandbox) = sandbox();
        let workspace = sandbox
            .open_workspace(Uuid::new_v4(), Language::Cpp)
            .await
            .unwrap();
        let err = workspace
            .run(&CommandSpec::artifact("solution"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_flooding_stdout_is_capped() {
        let (_root, sandbox) = sandbox();
        let workspace = sandbox
            .open_workspace(Uuid::new_v4(), Language::Python)
            .await
            .unwrap();
        let cmd = CommandSpec::tool("sh")
            .arg("-c")
            .arg("yes xxxxxxxxxxxxxxx | head -c 20000000; echo done >&2");
        let output = workspace.run(&cmd, Duration::from_secs(10)).await.unwrap();
        assert!(!output.timed_out);
        assert_eq!(output.exit_code, Some(0));
        let dropped = 20_000_000 - MAX_CAPTURE_BYTES;
        assert!(output.stdout.len() < MAX_CAPTURE_BYTES + 64);
        assert!(output
            .stdout
            .ends_with(&format!("[output truncated: {} bytes dropped]", dropped)));
        assert_eq!(output.stderr.trim(), "done");
    }
}
