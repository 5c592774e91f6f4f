//! Livepush keeps a running container in sync with a developer's source
//! tree by interpreting the project's Dockerfile as a dependency graph
//! and replaying only the affected portions inside already-running
//! containers.
//!
//! The flow: a changed-file list goes through the invalidation engine,
//! producing an ordered map of stage index to action groups; the
//! orchestrator walks stages in ascending order, streaming changed files
//! in as archives, running the associated commands, cascading through
//! `COPY --from` links via helper containers, and finally restarting the
//! user's container.
//!
//! The container runtime itself stays behind the [`ContainerRuntime`]
//! trait; callers wire in their client and feed `(added_or_updated,
//! deleted)` path lists from whatever change detection they run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use livepush::{Livepush, LivepushOptions};
//!
//! # async fn example(runtime: livepush::SharedRuntime) -> livepush::LivepushResult<()> {
//! let recipe = std::fs::read_to_string("Dockerfile")?;
//! let push = Livepush::init(
//!     &recipe,
//!     "/project",
//!     "my-app-container",
//!     &[],
//!     Arc::clone(&runtime),
//!     LivepushOptions::default(),
//! )
//! .await?;
//!
//! push.perform_livepush(&["src/index.ts".to_string()], &[]).await?;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod recipe;
pub mod runtime;
pub mod util;

pub use container::Container;
pub use errors::{LivepushError, LivepushResult};
pub use events::{CommandOutput, EventBus, LivepushEvent};
pub use orchestrator::{Livepush, LivepushOptions};
pub use recipe::{ActionGroup, Recipe, Stage};
pub use runtime::{
    ContainerInspect, ContainerRuntime, ContainerState, ExecHandle, ExecInspect, ExecOptions,
    ExecStream, SharedRuntime,
};
