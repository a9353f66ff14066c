/// Execution Engine - Sandboxed Code Execution
///
/// **Core Responsibility:**
/// Run one untrusted program to completion or to a limit and capture its
/// raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker today)
/// - Engine does NOT grade anything
/// - Candidate faults are data (`SandboxOutput`), only infrastructure
///   failures are `SandboxError`
///
/// Every run gets its own container: no shared working directory, no shared
/// environment, nothing that outlives the run.

use crate::config::{RuntimeConfig, RuntimeRegistry};
use crate::error::SandboxError;
use crate::runner;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StatsOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use gradebox_common::types::Language;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MANAGED_LABEL: &str = "gradebox.managed";
const SANDBOX_USER: &str = "65534:65534";
/// Bytes kept from the end of an oversized stream, after the head
const TAIL_BYTES: usize = 2048;

/// Resource ceilings for a single run
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub timeout: Duration,
    pub memory_limit_mb: u32,
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_limit_mb: 128,
            max_output_bytes: 10 * 1024,
        }
    }
}

/// One program to run
#[derive(Debug, Clone)]
pub struct SandboxJob {
    pub language: Language,
    pub source: String,
    pub stdin: Option<String>,
    pub expression: Option<String>,
    pub marker: String,
    pub limits: Limits,
}

/// Raw result of one run, before any classification
#[derive(Debug, Clone, Default)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub oom_killed: bool,
    pub peak_memory_bytes: Option<u64>,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `job` in a fresh isolated context and tear it down afterwards,
    /// whatever the outcome.
    async fn run(&self, job: &SandboxJob) -> Result<SandboxOutput, SandboxError>;
}

/// Byte-capped capture buffer. Keeps the first `limit` bytes plus a short
/// tail so the final lines (and the harness result line) survive truncation.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    head: Vec<u8>,
    tail: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl OutputBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            head: Vec::new(),
            tail: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.head.len()).min(bytes.len());
        let (head, rest) = bytes.split_at(room);
        self.head.extend_from_slice(head);
        if rest.is_empty() {
            return;
        }
        self.tail.extend_from_slice(rest);
        if self.tail.len() > TAIL_BYTES {
            let excess = self.tail.len() - TAIL_BYTES;
            self.tail.drain(..excess);
            self.dropped += excess;
        }
    }

    pub(crate) fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.head).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!("\n[... {} bytes truncated ...]\n", self.dropped));
        }
        text.push_str(&String::from_utf8_lossy(&self.tail));
        text
    }
}

/// Force-removes a container. Implemented by the Docker client; the seam
/// exists so teardown ordering can be exercised without a daemon.
#[async_trait]
pub(crate) trait ContainerRemover: Clone + Send + Sync + 'static {
    async fn remove(&self, container_id: &str) -> Result<(), bollard::errors::Error>;
}

#[async_trait]
impl ContainerRemover for Docker {
    async fn remove(&self, container_id: &str) -> Result<(), bollard::errors::Error> {
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.remove_container(container_id, Some(remove_options)).await
    }
}

/// Container cleanup guard.
///
/// The normal path calls `release`, which awaits removal and disarms the
/// guard. Dropping an armed guard (panic, cancelled task, failed removal)
/// falls back to a background removal on the current runtime.
pub(crate) struct ContainerGuard<R: ContainerRemover = Docker> {
    remover: R,
    container_id: String,
}

impl<R: ContainerRemover> ContainerGuard<R> {
    pub(crate) fn new(remover: R, container_id: String) -> Self {
        Self {
            remover,
            container_id,
        }
    }

    /// Remove the container and wait for the daemon to confirm it
    pub(crate) async fn release(mut self) {
        match self.remover.remove(&self.container_id).await {
            Ok(()) => {
                debug!(container_id = %self.container_id, "Container removed");
                self.container_id.clear();
            }
            Err(e) => {
                warn!(container_id = %self.container_id, error = %e, "Failed to remove container, retrying in background");
            }
        }
    }
}

impl<R: ContainerRemover> Drop for ContainerGuard<R> {
    fn drop(&mut self) {
        if self.container_id.is_empty() {
            return;
        }
        let container_id = std::mem::take(&mut self.container_id);
        let remover = self.remover.clone();

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(container_id = %container_id, "No runtime available to remove container");
                return;
            }
        };

        handle.spawn(async move {
            match remover.remove(&container_id).await {
                Ok(()) => debug!(container_id = %container_id, "Container removed"),
                Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove container"),
            }
        });
    }
}

/// Await `work`, then tear the container down before handing back its
/// outcome, success or not.
pub(crate) async fn with_container<R, T, F>(guard: ContainerGuard<R>, work: F) -> T
where
    R: ContainerRemover,
    F: std::future::Future<Output = T>,
{
    let outcome = work.await;
    guard.release().await;
    outcome
}

/// Exit status of a finished run. A run that was not cut off by the timeout
/// but left no status behind is a daemon failure, not a candidate fault.
fn resolve_exit_code(
    timed_out: bool,
    inspected: Option<i64>,
    waited: Option<i64>,
) -> Result<Option<i64>, SandboxError> {
    if timed_out {
        return Ok(None);
    }
    inspected
        .or(waited)
        .map(Some)
        .ok_or_else(|| SandboxError::Crashed("container finished without an exit status".to_string()))
}

/// Build the container definition for one job.
///
/// **Isolation rules:**
/// - no network (`network_mode=none`)
/// - read-only root filesystem, small noexec tmpfs at /tmp
/// - all capabilities dropped, no privilege escalation, unprivileged user
/// - memory == memory+swap ceiling, CPU quota, pid cap
/// - command is an argv vector; candidate code only travels as env data
pub fn container_config(runtime: &RuntimeConfig, job: &SandboxJob) -> Config<String> {
    let memory_bytes = i64::from(job.limits.memory_limit_mb) * 1024 * 1024;

    let mut cmd = runtime.command.clone();
    cmd.push(runner::RUNNER_SCRIPT.to_string());

    let mut tmpfs = HashMap::new();
    tmpfs.insert(
        "/tmp".to_string(),
        format!("rw,noexec,nosuid,size={}m", runtime.tmpfs_mb),
    );

    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    Config {
        image: Some(runtime.image.clone()),
        cmd: Some(cmd),
        entrypoint: Some(vec![]),
        env: Some(runner::harness_env(job)),
        user: Some(SANDBOX_USER.to_string()),
        working_dir: Some("/tmp".to_string()),
        labels: Some(labels),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true),
        host_config: Some(HostConfig {
            memory: Some(memory_bytes),
            memory_swap: Some(memory_bytes),
            nano_cpus: Some(runtime.nano_cpus()),
            pids_limit: Some(runtime.pids_limit),
            readonly_rootfs: Some(true),
            tmpfs: Some(tmpfs),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            network_mode: Some("none".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Track peak memory from the stats stream until the task is aborted or the
/// container goes away. cgroup v1 reports `max_usage`, v2 only `usage`.
async fn sample_memory(docker: Docker, container_id: String, peak: Arc<AtomicU64>) {
    let options = StatsOptions {
        stream: true,
        one_shot: false,
    };
    let mut stats = docker.stats(&container_id, Some(options));
    while let Some(Ok(sample)) = stats.next().await {
        let usage = sample
            .memory_stats
            .max_usage
            .or(sample.memory_stats.usage)
            .unwrap_or(0);
        peak.fetch_max(usage, Ordering::Relaxed);
    }
}

/// Docker-based execution engine
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    runtimes: Arc<RuntimeRegistry>,
}

impl DockerEngine {
    /// Connect to the local Docker daemon
    pub fn connect(runtimes: RuntimeRegistry) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(SandboxError::Unavailable)?;
        Ok(Self {
            docker,
            runtimes: Arc::new(runtimes),
        })
    }

    pub async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(SandboxError::Unavailable)
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
            result.map_err(|source| SandboxError::Image {
                image: image.to_string(),
                source,
            })?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Pull every configured runtime image ahead of the first request
    pub async fn warm_up(&self) -> Result<(), SandboxError> {
        for runtime in self.runtimes.runtimes() {
            self.ensure_image(&runtime.image).await?;
        }
        Ok(())
    }

    /// Remove containers left behind by a previous process (crash, SIGKILL).
    /// Returns how many were removed.
    pub async fn reap_orphans(&self) -> Result<usize, SandboxError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|source| SandboxError::Container { stage: "list", source })?;

        let mut removed = 0;
        for container in containers {
            let Some(id) = container.id else { continue };
            match self.docker.remove(&id).await {
                Ok(_) => removed += 1,
                Err(e) => warn!(container_id = %id, error = %e, "Failed to reap orphaned container"),
            }
        }

        if removed > 0 {
            info!(removed, "Reaped orphaned sandbox containers");
        }
        Ok(removed)
    }

    /// Execute one job with hardened guarantees:
    /// - hard timeout via `tokio::time::timeout`, container killed on expiry
    /// - container removal awaited on every path once it exists
    /// - partial stdout/stderr kept on timeout
    /// - OOM and exit status taken from container inspection
    #[tracing::instrument(skip(self, job), fields(language = %job.language, timeout_ms = job.limits.timeout.as_millis() as u64))]
    async fn run_to_completion(&self, job: SandboxJob) -> Result<SandboxOutput, SandboxError> {
        let runtime = self
            .runtimes
            .get(&job.language)
            .map_err(|e| SandboxError::Crashed(e.to_string()))?
            .clone();

        self.ensure_image(&runtime.image).await?;

        let container_name = format!("gradebox-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), container_config(&runtime, &job))
            .await
            .map_err(|source| SandboxError::Container { stage: "create", source })?;

        let guard = ContainerGuard::new(self.docker.clone(), container.id.clone());
        with_container(guard, self.drive(&container.id, &job)).await
    }

    /// Start a created container and follow it to the end or to the timeout
    async fn drive(&self, container_id: &str, job: &SandboxJob) -> Result<SandboxOutput, SandboxError> {
        let start_time = Instant::now();

        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|source| SandboxError::Container { stage: "start", source })?;

        let peak = Arc::new(AtomicU64::new(0));
        let sampler = tokio::spawn(sample_memory(
            self.docker.clone(),
            container_id.to_string(),
            peak.clone(),
        ));

        let mut stdout = OutputBuffer::new(job.limits.max_output_bytes);
        let mut stderr = OutputBuffer::new(job.limits.max_output_bytes);

        let execution_future = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(container_id, logs_options);
            while let Some(output) = logs_stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
            match wait_stream.next().await {
                Some(Ok(response)) => Some(response.status_code),
                // bollard reports non-zero exits as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to wait for container");
                    None
                }
                None => None,
            }
        };

        let outcome = tokio::time::timeout(job.limits.timeout, execution_future).await;

        let (timed_out, waited_code) = match outcome {
            Ok(code) => (false, code),
            Err(_) => {
                warn!(container_id = %container_id, "Execution timed out, killing container");
                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                (true, None)
            }
        };

        let elapsed = start_time.elapsed();
        sampler.abort();

        let state = match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect.state,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to inspect container");
                None
            }
        };

        let oom_killed = state.as_ref().and_then(|s| s.oom_killed).unwrap_or(false);
        let exit_code = resolve_exit_code(
            timed_out,
            state.as_ref().and_then(|s| s.exit_code),
            waited_code,
        )?;

        let peak_bytes = peak.load(Ordering::Relaxed);

        debug!(
            exit_code = ?exit_code,
            timed_out,
            oom_killed,
            execution_ms = elapsed.as_millis() as u64,
            peak_memory_bytes = peak_bytes,
            "Container finished"
        );

        Ok(SandboxOutput {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code,
            elapsed,
            timed_out,
            oom_killed,
            peak_memory_bytes: (peak_bytes > 0).then_some(peak_bytes),
        })
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    async fn run(&self, job: &SandboxJob) -> Result<SandboxOutput, SandboxError> {
        // Detached so a cancelled caller cannot interrupt container setup
        // halfway; the task always reaches the awaited teardown.
        let engine = self.clone();
        let job = job.clone();
        tokio::spawn(async move { engine.run_to_completion(job).await })
            .await
            .map_err(|e| SandboxError::Crashed(format!("sandbox task failed: {}", e)))?
    }
}
