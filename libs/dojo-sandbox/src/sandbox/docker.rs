/// Docker Sandbox - Container-Backed Workspaces
///
/// **Core Responsibility:**
/// Give each attempt one long-lived container and run every compile and
/// test command inside it through `docker exec`.
///
/// **Container Rules:**
/// 1. Language image is pulled on first use (cache miss)
/// 2. Network disabled, CPU/memory limits from languages.json
/// 3. Files are injected base64-encoded through exec, in chunks
/// 4. Each command runs under `timeout --signal=KILL` inside the container,
///    with a host-side deadline as backstop
/// 5. The container is force-removed when the workspace is dropped

use super::{
    check_file_name, CapturedStream, CommandSpec, ProcessOutput, Program, Sandbox, Workspace,
};
use crate::config::LanguageConfigManager;
use crate::error::SandboxError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use dojo_common::types::Language;
use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Host-side slack on top of the in-container deadline (exec round trips)
const HOST_DEADLINE_GRACE: Duration = Duration::from_millis(1000);
/// Budget for bookkeeping execs (file writes)
const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(30);
/// Base64 characters per write exec, well below the kernel's single-argument limit
const WRITE_CHUNK_CHARS: usize = 64 * 1024;
/// Exit status of a process killed by SIGKILL
const SIGKILL_STATUS: i32 = 137;
/// Containers are reaped on drop; this only bounds leaks if the worker dies
const CONTAINER_LIFETIME_SECS: u64 = 3600;
const WORKDIR: &str = "/code";
const STDIN_FILE: &str = ".stdin";

pub struct DockerSandbox {
    docker: Docker,
    config_manager: LanguageConfigManager,
}

impl DockerSandbox {
    /// Connect to the local Docker daemon
    pub fn connect(config_manager: &LanguageConfigManager) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            config_manager: config_manager.clone(),
        })
    }

    fn memory_limit_bytes(&self, language: &Language) -> i64 {
        let limit_mb = self.config_manager.get_memory_limit_mb(language).unwrap_or(256);
        (limit_mb as i64) * 1024 * 1024
    }

    fn nano_cpus(&self, language: &Language) -> i64 {
        let limit = self.config_manager.get_cpu_limit(language).unwrap_or(0.5);
        (limit as f64 * 1_000_000_000.0) as i64
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    #[tracing::instrument(skip_all, fields(attempt_id = %attempt_id, language = %language))]
    async fn open_workspace(
        &self,
        attempt_id: Uuid,
        language: Language,
    ) -> Result<Box<dyn Workspace>, SandboxError> {
        let image = self.config_manager.get_image(&language).ok_or_else(|| {
            SandboxError::Workspace(format!("No Docker image configured for {}", language))
        })?;

        self.ensure_image(&image).await?;

        let container_name = format!("dojo-{}-{}", attempt_id, Uuid::new_v4().simple());
        let config = Config {
            image: Some(image.clone()),
            cmd: Some(vec![
                "sleep".to_string(),
                CONTAINER_LIFETIME_SECS.to_string(),
            ]),
            entrypoint: Some(vec![]),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.memory_limit_bytes(&language)),
                nano_cpus: Some(self.nano_cpus(&language)),
                readonly_rootfs: Some(false),
                ..Default::default()
            }),
            working_dir: Some(WORKDIR.to_string()),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await?;

        // From here on the workspace owns the container and removes it on drop
        let workspace = DockerWorkspace {
            docker: self.docker.clone(),
            container_id: container.id,
        };

        self.docker
            .start_container(&workspace.container_id, None::<StartContainerOptions<String>>)
            .await?;

        info!(container = %container_name, image = %image, "Started attempt container");
        Ok(Box::new(workspace))
    }
}

struct DockerWorkspace {
    docker: Docker,
    container_id: String,
}

impl DockerWorkspace {
    /// Run `bash -c <script>` in the container and collect its output
    async fn exec_script(
        &self,
        script: String,
    ) -> Result<(String, String, Option<i64>), SandboxError> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec!["bash".to_string(), "-c".to_string(), script]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(WORKDIR.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&self.container_id, exec_config)
            .await?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let mut stdout = CapturedStream::default();
        let mut stderr = CapturedStream::default();

        match self.docker.start_exec(&exec.id, Some(start_config)).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg? {
                        // Keep draining past the cap so the exec can finish
                        LogOutput::StdOut { message } => stdout.push(&message),
                        LogOutput::StdErr { message } => stderr.push(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(SandboxError::Workspace(
                    "Failed to attach to exec".to_string(),
                ));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok((stdout.into_text(), stderr.into_text(), inspect.exit_code))
    }

    async fn exec_checked(&self, script: String, what: &str) -> Result<(), SandboxError> {
        let result = tokio::time::timeout(HOUSEKEEPING_TIMEOUT, self.exec_script(script))
            .await
            .map_err(|_| SandboxError::Workspace(format!("{} timed out", what)))??;
        match result {
            (_, _, Some(0)) => Ok(()),
            (_, stderr, code) => Err(SandboxError::Workspace(format!(
                "{} failed (exit {:?}): {}",
                what,
                code,
                stderr.trim()
            ))),
        }
    }

    fn command_line(command: &CommandSpec, timeout: Duration) -> String {
        let program = match &command.program {
            Program::Tool(name) => shell_quote(name),
            Program::Artifact(name) => format!("./{}", shell_quote(name)),
        };

        let mut line = format!(
            "cd {} && exec timeout --signal=KILL {:.3}s",
            WORKDIR,
            timeout.as_secs_f64()
        );
        if !command.env.is_empty() {
            line.push_str(" env");
            for (key, value) in &command.env {
                line.push(' ');
                line.push_str(&shell_quote(&format!("{}={}", key, value)));
            }
        }
        line.push(' ');
        line.push_str(&program);
        for arg in &command.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        if command.stdin.is_some() {
            line.push_str(&format!(" < {}", STDIN_FILE));
        } else {
            line.push_str(" < /dev/null");
        }
        line
    }
}

#[async_trait]
impl Workspace for DockerWorkspace {
    async fn write_file(&self, name: &str, contents: &str) -> Result<(), SandboxError> {
        let name = check_file_name(name)?;
        let encoded = general_purpose::STANDARD.encode(contents);
        let staging = format!(".{}.b64", name);

        // Base64 alphabet is safe inside single quotes
        let mut redirect = ">";
        for chunk in encoded.as_bytes().chunks(WRITE_CHUNK_CHARS) {
            let script = format!(
                "printf '%s' '{}' {} {}/{}",
                String::from_utf8_lossy(chunk),
                redirect,
                WORKDIR,
                shell_quote(&staging)
            );
            self.exec_checked(script, "Staging file").await?;
            redirect = ">>";
        }

        let script = if encoded.is_empty() {
            format!(": > {}/{}", WORKDIR, shell_quote(name))
        } else {
            format!(
                "base64 -d {dir}/{staging} > {dir}/{name} && rm -f {dir}/{staging}",
                dir = WORKDIR,
                staging = shell_quote(&staging),
                name = shell_quote(name)
            )
        };
        self.exec_checked(script, "Writing file").await
    }

    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, SandboxError> {
        if let Some(input) = &command.stdin {
            self.write_file(STDIN_FILE, input).await?;
        }

        let script = Self::command_line(command, timeout);
        let start = Instant::now();
        let host_deadline = timeout + HOST_DEADLINE_GRACE;

        match tokio::time::timeout(host_deadline, self.exec_script(script)).await {
            Ok(Ok((stdout, mut stderr, code))) => {
                let elapsed = start.elapsed();
                let exit_code = code.map(|c| c as i32);
                let timed_out = exit_code == Some(SIGKILL_STATUS) && elapsed >= timeout;
                if exit_code == Some(SIGKILL_STATUS) && !timed_out {
                    stderr.push_str("\n[Process killed: likely exceeded memory limit]");
                } else if exit_code == Some(139) {
                    stderr.push_str("\n[Process killed: segmentation fault]");
                }
                Ok(ProcessOutput {
                    stdout: if timed_out { String::new() } else { stdout },
                    stderr: if timed_out { String::new() } else { stderr },
                    exit_code: if timed_out { None } else { exit_code },
                    timed_out,
                    elapsed,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    container = %self.container_id,
                    program = %command.display_name(),
                    "Exec exceeded host deadline"
                );
                Ok(ProcessOutput {
                    timed_out: true,
                    elapsed: start.elapsed(),
                    ..Default::default()
                })
            }
        }
    }
}

impl Drop for DockerWorkspace {
    fn drop(&mut self) {
        // Best-effort cleanup - cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %container_id, "No runtime available, container left behind");
            return;
        };

        handle.spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker
                .remove_container(&container_id, Some(remove_options))
                .await
            {
                warn!(container = %container_id, error = %e, "Failed to remove container");
            } else {
                debug!(container = %container_id, "Removed attempt container");
            }
        });
    }
}

/// Quote a word for POSIX sh
pub(crate) fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+:,@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
