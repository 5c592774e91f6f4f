//! Per-stage container executor.
//!
//! One [`Container`] wraps one remote container (a helper for an
//! intermediate stage, or the user's container for the terminal stage)
//! and materializes action groups against it: archive uploads for
//! changed files, `rm -f` for deletions, `/bin/sh -c` execs for
//! commands, and a kill+start restart when a restart-carrying group was
//! applied. Cancellation is cooperative: the flag is checked after every
//! command and between groups; a running remote command can only be
//! waited out.

pub mod archive;
pub mod resolve;
pub mod stage_copy;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::container::resolve::AddOperation;
use crate::errors::{LivepushError, LivepushResult};
use crate::events::{CommandOutput, EventBus, LivepushEvent};
use crate::recipe::groups::{self, ActionGroup, LocalGroup};
use crate::runtime::demux::Demuxer;
use crate::runtime::{ExecOptions, SharedRuntime};

/// Executor for a single stage's container.
pub struct Container {
    container_id: String,
    stage_index: usize,
    context: PathBuf,
    runtime: SharedRuntime,
    events: EventBus,
    /// Helpers never restart; the terminal container restarts unless
    /// suppressed by the caller.
    restart_enabled: bool,
    cancelled: AtomicBool,
    /// Memoized `test -d` probes. Monotonic for the handle's lifetime;
    /// paths created during a run keep their first observed answer.
    dir_cache: Mutex<HashMap<String, bool>>,
    /// `K=V` entries passed as exec env to every command.
    build_args: RwLock<Vec<String>>,
}

impl Container {
    pub(crate) fn new(
        container_id: String,
        stage_index: usize,
        context: PathBuf,
        runtime: SharedRuntime,
        events: EventBus,
        restart_enabled: bool,
    ) -> Self {
        Self {
            container_id,
            stage_index,
            context,
            runtime,
            events,
            restart_enabled,
            cancelled: AtomicBool::new(false),
            dir_cache: Mutex::new(HashMap::new()),
            build_args: RwLock::new(Vec::new()),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub(crate) fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    pub(crate) fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_build_arguments(&self, args: Vec<String>) {
        *self.build_args.write() = args;
    }

    /// Whether the remote container is in the running state.
    pub async fn check_running(&self) -> LivepushResult<bool> {
        let inspect = self.runtime.inspect_container(&self.container_id).await?;
        Ok(inspect.state.running)
    }

    /// Memoized remote `test -d`.
    pub async fn path_is_directory(&self, path: &str) -> LivepushResult<bool> {
        if let Some(known) = self.dir_cache.lock().get(path) {
            return Ok(*known);
        }
        let code = self
            .exec_detached(vec!["test".into(), "-d".into(), path.to_string()])
            .await?;
        let is_dir = code == 0;
        self.dir_cache.lock().insert(path.to_string(), is_dir);
        Ok(is_dir)
    }

    /// Materialize the given action groups against this container.
    ///
    /// `stage_containers` supplies the source containers for stage
    /// copies. A non-zero command exit halts the remaining commands and
    /// groups without raising; callers observe it via `CommandReturn`.
    /// Cancellation returns cleanly at the next check point.
    pub async fn execute_action_groups(
        &self,
        action_groups: &[ActionGroup],
        added: &[String],
        deleted: &[String],
        stage_containers: &HashMap<usize, Container>,
    ) -> LivepushResult<()> {
        if !self.check_running().await? {
            return Err(LivepushError::ContainerNotRunning(
                self.container_id.clone(),
            ));
        }

        let mut any_applied = false;
        let mut restart_wanted = false;
        let mut halted = false;

        'groups: for group in action_groups {
            match group {
                ActionGroup::FromStage(stage_group) => {
                    for copy in &stage_group.copies {
                        let source =
                            stage_containers.get(&copy.source_stage).ok_or_else(|| {
                                LivepushError::Internal(format!(
                                    "stage copy references stage {} with no container",
                                    copy.source_stage
                                ))
                            })?;
                        stage_copy::copy_between(source, self, copy).await?;
                    }
                }
                ActionGroup::Local(local) => {
                    self.apply_local_group(local, added, deleted).await?;
                }
            }
            any_applied = true;
            restart_wanted |= group.restart();

            for command in group.commands() {
                let code = self.execute_command(group.workdir(), command).await?;
                if code != 0 {
                    tracing::warn!(
                        stage = self.stage_index,
                        command = %command,
                        code,
                        "command failed, halting remaining groups"
                    );
                    halted = true;
                    break 'groups;
                }
                if self.is_cancelled() {
                    tracing::debug!(stage = self.stage_index, "cancelled after command");
                    return Ok(());
                }
            }

            if self.is_cancelled() {
                tracing::debug!(stage = self.stage_index, "cancelled between groups");
                return Ok(());
            }
        }

        if any_applied && !halted && restart_wanted && self.restart_enabled {
            self.restart().await?;
        }
        Ok(())
    }

    /// Upload the changed files covered by a local group, then apply its
    /// deletions. Copies land before deletes, deletes before commands.
    async fn apply_local_group(
        &self,
        group: &LocalGroup,
        added: &[String],
        deleted: &[String],
    ) -> LivepushResult<()> {
        let adds = self.resolve_adds(group, added).await?;
        if !adds.is_empty() {
            tracing::debug!(
                stage = self.stage_index,
                files = adds.len(),
                "uploading changed files"
            );
            let tarball = archive::build_local_archive(&self.context, &adds)?;
            self.runtime
                .put_archive(&self.container_id, "/", tarball)
                .await?;
        }

        for path in self.resolve_deletes(group, deleted).await? {
            tracing::debug!(stage = self.stage_index, path = %path, "deleting remote file");
            let code = self
                .exec_detached(vec!["rm".into(), "-f".into(), path.clone()])
                .await?;
            if code != 0 {
                tracing::warn!(path = %path, code, "remote delete failed");
            }
        }
        Ok(())
    }

    async fn resolve_adds(
        &self,
        group: &LocalGroup,
        files: &[String],
    ) -> LivepushResult<Vec<AddOperation>> {
        self.resolve_operations(group, files).await
    }

    async fn resolve_deletes(
        &self,
        group: &LocalGroup,
        files: &[String],
    ) -> LivepushResult<Vec<String>> {
        let ops = self.resolve_operations(group, files).await?;
        Ok(ops.into_iter().map(|op| op.to_path).collect())
    }

    /// Resolve changed files covered by the group to their in-container
    /// destinations. Distinct files collapsing onto one non-directory
    /// destination make the COPY ambiguous and fail the run.
    async fn resolve_operations(
        &self,
        group: &LocalGroup,
        files: &[String],
    ) -> LivepushResult<Vec<AddOperation>> {
        let mut ops = Vec::new();
        for file in files {
            for copy in &group.copies {
                if !groups::copy_source_matches(file, &copy.source) {
                    continue;
                }
                let dest_is_dir = self.destination_is_directory(&copy.dest).await?;
                let src_real = resolve::source_is_real(&self.context, &copy.source, file);
                let to_path = resolve::resolve_destination(
                    &copy.source,
                    &copy.dest,
                    file,
                    dest_is_dir,
                    src_real,
                );
                resolve::record_operation(
                    &mut ops,
                    AddOperation {
                        from_path: file.clone(),
                        to_path,
                    },
                    dest_is_dir,
                )?;
            }
        }
        Ok(ops)
    }

    async fn destination_is_directory(&self, dest: &str) -> LivepushResult<bool> {
        if dest.ends_with('/') {
            return Ok(true);
        }
        self.path_is_directory(dest).await
    }

    /// Run one recipe command through the remote shell, streaming its
    /// demuxed output as events. Returns the exit code.
    async fn execute_command(&self, workdir: &str, command: &str) -> LivepushResult<i64> {
        self.events.publish(LivepushEvent::CommandExecute {
            stage: self.stage_index,
            command: command.to_string(),
        });

        let options = ExecOptions {
            cmd: vec!["/bin/sh".into(), "-c".into(), command.to_string()],
            env: self.build_args.read().clone(),
            working_dir: Some(workdir.to_string()),
            attach_stdout: true,
            attach_stderr: true,
        };
        let mut handle = self.runtime.exec(&self.container_id, options).await?;
        let stream = handle.start().await?;

        let mut demux = Demuxer::new(stream);
        while let Some(chunk) = demux.next_chunk().await? {
            self.events.publish(LivepushEvent::CommandOutput {
                stage: self.stage_index,
                output: CommandOutput {
                    data: chunk.data,
                    is_stderr: chunk.is_stderr,
                },
            });
        }

        // Stream drained to termination; the exit code is final now.
        let inspect = handle.inspect().await?;
        let return_code = inspect.exit_code.ok_or_else(|| {
            LivepushError::Runtime("exec session finished without an exit code".to_string())
        })?;

        self.events.publish(LivepushEvent::CommandReturn {
            stage: self.stage_index,
            return_code,
            command: command.to_string(),
        });
        Ok(return_code)
    }

    /// Run a command without attaching output; returns the exit code.
    pub(crate) async fn exec_detached(&self, cmd: Vec<String>) -> LivepushResult<i64> {
        let options = ExecOptions {
            cmd,
            env: Vec::new(),
            working_dir: None,
            attach_stdout: false,
            attach_stderr: false,
        };
        let mut handle = self.runtime.exec(&self.container_id, options).await?;
        let stream = handle.start().await?;
        let mut demux = Demuxer::new(stream);
        while demux.next_chunk().await?.is_some() {}
        let inspect = handle.inspect().await?;
        inspect.exit_code.ok_or_else(|| {
            LivepushError::Runtime("exec session finished without an exit code".to_string())
        })
    }

    /// Run a command and capture its stdout. Stderr is discarded.
    pub(crate) async fn exec_capture(&self, cmd: Vec<String>) -> LivepushResult<(i64, Vec<u8>)> {
        let options = ExecOptions {
            cmd,
            env: Vec::new(),
            working_dir: None,
            attach_stdout: true,
            attach_stderr: false,
        };
        let mut handle = self.runtime.exec(&self.container_id, options).await?;
        let stream = handle.start().await?;

        let mut stdout = Vec::new();
        let mut demux = Demuxer::new(stream);
        while let Some(chunk) = demux.next_chunk().await? {
            if !chunk.is_stderr {
                stdout.extend_from_slice(&chunk.data);
            }
        }
        let inspect = handle.inspect().await?;
        let code = inspect.exit_code.ok_or_else(|| {
            LivepushError::Runtime("exec session finished without an exit code".to_string())
        })?;
        Ok((code, stdout))
    }

    /// Kill + start: faster than the runtime's own restart.
    async fn restart(&self) -> LivepushResult<()> {
        tracing::info!(container = %self.container_id, "restarting container");
        self.runtime.kill_container(&self.container_id).await?;
        self.runtime.start_container(&self.container_id).await?;
        self.events.publish(LivepushEvent::ContainerRestart {
            container_id: self.container_id.clone(),
        });
        Ok(())
    }
}
