//! Typed livepush events and their fan-out bus.
//!
//! Every observable effect of a run (command launch, output chunk, exit
//! code, container restart, cancellation) is a distinct variant of
//! [`LivepushEvent`]. Events are pushed to live subscribers through a
//! broadcast channel; publishing with no subscribers is not an error.

use tokio::sync::broadcast;

/// One demultiplexed chunk of remote command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub data: Vec<u8>,
    pub is_stderr: bool,
}

/// Events emitted over the lifetime of a livepush run.
///
/// Events observed by a single subscriber arrive in temporal order;
/// ordering across subscribers is not defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivepushEvent {
    /// A command is about to execute inside a stage container.
    CommandExecute { stage: usize, command: String },
    /// A chunk of stdout/stderr from a running command.
    CommandOutput { stage: usize, output: CommandOutput },
    /// A command terminated with the given exit code.
    CommandReturn {
        stage: usize,
        return_code: i64,
        command: String,
    },
    /// The terminal container was restarted (kill + start).
    ContainerRestart { container_id: String },
    /// An in-flight run is being cancelled and replaced.
    Cancel,
}

/// In-process event fan-out based on a tokio broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LivepushEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all active subscribers.
    ///
    /// "No receiver" is swallowed: a run without observers is valid.
    pub fn publish(&self, event: LivepushEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LivepushEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Enough slack for chatty commands before a slow subscriber lags.
        Self::new(1024)
    }
}
