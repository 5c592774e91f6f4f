//! Error types shared across the crate.

use thiserror::Error;

/// Convenience alias used by every fallible operation in the crate.
pub type LivepushResult<T> = Result<T, LivepushError>;

/// Unified error type for recipe parsing, validation and container
/// execution.
///
/// Per-command non-zero exit codes are deliberately NOT represented here;
/// they halt the current run and are reported through
/// [`LivepushEvent::CommandReturn`](crate::events::LivepushEvent).
#[derive(Debug, Error)]
pub enum LivepushError {
    /// The recipe text could not be parsed. Carries the 1-based source
    /// line the failure was detected on.
    #[error("recipe parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// An instruction the engine refuses to interpret (currently `ADD`).
    #[error("unsupported instruction {instruction} at line {line}")]
    UnsupportedInstruction { line: usize, instruction: String },

    /// An executor precondition failed: the target container is not in
    /// the running state (or has been cleaned up).
    #[error("container not running: {0}")]
    ContainerNotRunning(String),

    /// Caller-supplied inputs do not line up (e.g. stage image count).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// States that should be unreachable given a well-formed model, such
    /// as a stage copy referencing a stage with no container.
    #[error("internal inconsistency: {0}")]
    Internal(String),

    /// Post-parse validation and remote-API failures.
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl LivepushError {
    /// Shorthand for a parse error at a known line.
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
