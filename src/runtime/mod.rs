//! Abstract contract against the container runtime.
//!
//! Livepush never talks to a concrete daemon; callers hand it an
//! implementation of [`ContainerRuntime`] covering the small set of
//! operations the executor needs: inspect, helper-container start,
//! archive upload/download, exec with a demuxable output stream, and
//! kill/start/remove. Keeping the seam here means the whole engine is
//! exercisable against an in-memory fake.

pub mod demux;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::errors::LivepushResult;

/// Runtime state subset the executor cares about.
#[derive(Debug, Clone, Default)]
pub struct ContainerState {
    pub running: bool,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerInspect {
    pub state: ContainerState,
    pub image: String,
}

/// Options for starting an exec session.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cmd: Vec<String>,
    /// `K=V` environment entries.
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

/// Result of inspecting a finished exec session.
#[derive(Debug, Clone, Default)]
pub struct ExecInspect {
    /// Exit code; `None` while the command is still running.
    pub exit_code: Option<i64>,
}

/// The multiplexed output stream of an exec session.
///
/// Frames follow the Docker attach framing (8-byte header: stream id,
/// three zero bytes, big-endian payload length); [`demux`] splits them
/// back into stdout/stderr chunks.
pub type ExecStream = Pin<Box<dyn AsyncRead + Send>>;

/// Handle to a created exec session.
#[async_trait]
pub trait ExecHandle: Send {
    /// Start the session and return its combined output stream.
    async fn start(&mut self) -> LivepushResult<ExecStream>;

    /// Inspect the session. Only meaningful once the output stream has
    /// been drained to completion.
    async fn inspect(&self) -> LivepushResult<ExecInspect>;
}

/// Operations livepush requires from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect_container(&self, container: &str) -> LivepushResult<ContainerInspect>;

    /// Start a helper container from a pre-built stage image with the
    /// given long-running entrypoint. Returns the container id.
    async fn start_container_from_image(
        &self,
        image: &str,
        entrypoint: Vec<String>,
    ) -> LivepushResult<String>;

    /// Upload a tar archive, extracting it at `dest` inside the
    /// container.
    async fn put_archive(
        &self,
        container: &str,
        dest: &str,
        archive: Vec<u8>,
    ) -> LivepushResult<()>;

    /// Download `src` from the container as a tar archive.
    async fn get_archive(&self, container: &str, src: &str) -> LivepushResult<Vec<u8>>;

    /// Create an exec session (not yet started).
    async fn exec(
        &self,
        container: &str,
        options: ExecOptions,
    ) -> LivepushResult<Box<dyn ExecHandle>>;

    async fn kill_container(&self, container: &str) -> LivepushResult<()>;

    async fn start_container(&self, container: &str) -> LivepushResult<()>;

    async fn remove_container(&self, container: &str, force: bool) -> LivepushResult<()>;
}

/// Shared handle to a runtime implementation.
pub type SharedRuntime = Arc<dyn ContainerRuntime>;
