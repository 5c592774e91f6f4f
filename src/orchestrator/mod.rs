//! The livepush orchestrator.
//!
//! Owns one executor per stage of the development recipe: helper
//! containers started from pre-built stage images for every intermediate
//! stage, and the user's running container for the terminal stage.
//! `perform_livepush` walks invalidated stages in ascending index so a
//! stage's container is current before any later stage copies from it.
//!
//! At most one livepush runs at any instant. A second call cancels the
//! in-flight run cooperatively (there is no remote cancel; the current
//! remote command is waited out) and takes its place once the first run
//! acknowledges.

pub mod invalidate;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::container::Container;
use crate::errors::{LivepushError, LivepushResult};
use crate::events::{EventBus, LivepushEvent};
use crate::recipe::groups::ActionGroup;
use crate::recipe::Recipe;
use crate::runtime::SharedRuntime;
use crate::util;

/// How often a cancelling call re-checks the in-flight run.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Orchestrator options.
#[derive(Debug, Clone, Default)]
pub struct LivepushOptions {
    /// Suppress the terminal-container restart after a run.
    pub skip_container_restart: bool,
}

/// Dockerfile-driven live synchronization against a set of running
/// containers.
pub struct Livepush {
    /// The development-mode recipe model.
    recipe: Recipe,
    containers: HashMap<usize, Container>,
    terminal_stage: usize,
    events: EventBus,
    runtime: SharedRuntime,
    running: AtomicBool,
    cancel_requested: AtomicBool,
}

impl std::fmt::Debug for Livepush {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Livepush")
            .field("terminal_stage", &self.terminal_stage)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field(
                "cancel_requested",
                &self.cancel_requested.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl Livepush {
    /// Build the orchestrator.
    ///
    /// Parses `recipe_text`, rewrites it to its development variant,
    /// validates that `stage_images` holds exactly one image per
    /// non-terminal stage, and starts one idle helper container per
    /// intermediate stage. The terminal stage adopts
    /// `terminal_container`.
    pub async fn init(
        recipe_text: &str,
        context: impl Into<PathBuf>,
        terminal_container: &str,
        stage_images: &[String],
        runtime: SharedRuntime,
        options: LivepushOptions,
    ) -> LivepushResult<Self> {
        let recipe = Recipe::parse(recipe_text)?.development()?;
        let stage_count = recipe.stage_count();
        if stage_images.len() != stage_count - 1 {
            return Err(LivepushError::InvalidArgument(format!(
                "expected {} stage images for {} stages, got {}",
                stage_count - 1,
                stage_count,
                stage_images.len()
            )));
        }

        let context: PathBuf = context.into();
        let events = EventBus::default();
        let mut containers = HashMap::new();

        for (index, image) in stage_images.iter().enumerate() {
            tracing::debug!(stage = index, image = %image, "starting helper container");
            let id = runtime
                .start_container_from_image(image, idle_entrypoint())
                .await?;
            containers.insert(
                index,
                Container::new(
                    id,
                    index,
                    context.clone(),
                    Arc::clone(&runtime),
                    events.clone(),
                    // Intermediate containers never restart.
                    false,
                ),
            );
        }

        let terminal_stage = stage_count - 1;
        containers.insert(
            terminal_stage,
            Container::new(
                terminal_container.to_string(),
                terminal_stage,
                context,
                Arc::clone(&runtime),
                events.clone(),
                !options.skip_container_restart,
            ),
        );

        tracing::info!(
            stages = stage_count,
            terminal = %terminal_container,
            "livepush initialized"
        );

        Ok(Self {
            recipe,
            containers,
            terminal_stage,
            events,
            runtime,
            running: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
        })
    }

    /// The development recipe model driving execution.
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Development recipe text, for callers instantiating containers.
    pub fn development_recipe_text(&self) -> &str {
        self.recipe.text()
    }

    /// Subscribe to events from subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<LivepushEvent> {
        self.events.subscribe()
    }

    /// Set the build arguments passed as exec env to every command.
    ///
    /// Must not be changed while a run is in flight.
    pub fn set_build_arguments(&self, args: HashMap<String, String>) {
        let mut entries: Vec<String> =
            args.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        entries.sort();
        for container in self.containers.values() {
            container.set_build_arguments(entries.clone());
        }
    }

    /// Cheap predicate: would `perform_livepush` do anything?
    pub fn livepush_needed(&self, added_or_updated: &[String], deleted: &[String]) -> bool {
        let changed = changed_set(added_or_updated, deleted);
        !invalidate::invalidate(self.recipe.stages(), &changed).is_empty()
    }

    /// Replay the affected recipe portions for the given changed files.
    ///
    /// If a run is already in flight it is cancelled and this call takes
    /// over once the cancellation is acknowledged (bounded by the
    /// longest currently running remote command). Cancellation of THIS
    /// run by a later call is a clean return, not an error.
    pub async fn perform_livepush(
        &self,
        added_or_updated: &[String],
        deleted: &[String],
    ) -> LivepushResult<()> {
        let added = normalize_paths(added_or_updated);
        let deleted = normalize_paths(deleted);
        let changed = union(&added, &deleted);

        let tasks = invalidate::invalidate(self.recipe.stages(), &changed);
        if tasks.is_empty() {
            tracing::debug!("no action groups affected, skipping livepush");
            return Ok(());
        }

        if self.running.load(Ordering::SeqCst) {
            self.cancel_in_flight().await;
        }

        self.running.store(true, Ordering::SeqCst);
        tracing::info!(stages = tasks.len(), files = changed.len(), "starting livepush");
        let result = self.run_stages(&tasks, &added, &deleted).await;
        self.running.store(false, Ordering::SeqCst);
        self.cancel_requested.store(false, Ordering::SeqCst);
        result
    }

    /// Remove every helper container.
    ///
    /// Stages that copy from a helper fail with "container not running"
    /// on any later run.
    pub async fn cleanup_intermediate_containers(&self) -> LivepushResult<()> {
        for (index, container) in &self.containers {
            if *index == self.terminal_stage {
                continue;
            }
            tracing::info!(
                stage = *index,
                container = %container.container_id(),
                "removing helper container"
            );
            self.runtime
                .remove_container(container.container_id(), true)
                .await?;
        }
        Ok(())
    }

    async fn cancel_in_flight(&self) {
        tracing::info!("cancelling in-flight livepush");
        self.cancel_requested.store(true, Ordering::SeqCst);
        for container in self.containers.values() {
            container.request_cancel();
        }
        self.events.publish(LivepushEvent::Cancel);

        // No remote cancel exists; wait for the run to notice the flag.
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        }

        self.cancel_requested.store(false, Ordering::SeqCst);
        for container in self.containers.values() {
            container.clear_cancel();
        }
    }

    async fn run_stages(
        &self,
        tasks: &BTreeMap<usize, Vec<ActionGroup>>,
        added: &[String],
        deleted: &[String],
    ) -> LivepushResult<()> {
        for (stage_index, groups) in tasks {
            if self.cancel_requested.load(Ordering::SeqCst) {
                tracing::debug!(stage = *stage_index, "cancelled between stages");
                break;
            }
            let container = self.containers.get(stage_index).ok_or_else(|| {
                LivepushError::Internal(format!("no container for stage {}", stage_index))
            })?;
            tracing::debug!(
                stage = *stage_index,
                groups = groups.len(),
                "executing stage action groups"
            );
            container
                .execute_action_groups(groups, added, deleted, &self.containers)
                .await?;
        }
        Ok(())
    }
}

/// Long-running entrypoint keeping helper containers alive for exec.
fn idle_entrypoint() -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "sleep infinity".to_string(),
    ]
}

fn changed_set(added: &[String], deleted: &[String]) -> Vec<String> {
    union(&normalize_paths(added), &normalize_paths(deleted))
}

fn normalize_paths(paths: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(paths.len());
    for path in paths {
        let normalized = util::normalize(&util::to_posix(path));
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for path in b {
        if !out.contains(path) {
            out.push(path.clone());
        }
    }
    out
}

// Handles are shared across tasks (watcher loop, cancellers).
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Livepush>;
};
