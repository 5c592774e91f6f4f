//! Parsed recipe entry model.
//!
//! A recipe is an ordered list of [`Entry`] values: regular Dockerfile
//! instructions interleaved (by source line) with the typed entries that
//! originate from `#dev-*` comment directives.

/// Classified entry name.
///
/// Instructions the stage builder does not act on (ENV, EXPOSE, LABEL,
/// ...) are carried as [`EntryKind::Other`] so the rewriter can emit them
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    From,
    Copy,
    Run,
    Workdir,
    Cmd,
    /// `#dev-cmd-live=<cmd>`: replaces CMD in the dev recipe and marks
    /// the restart boundary.
    LiveCmd,
    /// `#dev-run=<args>`: a RUN present only in the dev recipe.
    LiveRun,
    /// `#dev-copy=<args>`: a COPY present only in the dev recipe.
    LiveCopy,
    /// `#dev-env=<K=V ...>`: ENV semantics in the dev recipe.
    LiveEnv,
    /// `#livecmd-marker=...`: restart-boundary marker in an already
    /// rewritten recipe.
    LiveCmdMarker,
    /// `#escape=<char>`: line-continuation escape directive.
    Escape,
    /// Any other instruction, kept for verbatim re-emission.
    Other(String),
}

/// Instruction arguments in one of the surface forms the lexer accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Args {
    /// Free text after the instruction name (`WORKDIR /x`, `CMD foo`).
    Text(String),
    /// JSON exec array (`["npm", "start"]`).
    Exec(Vec<String>),
    /// Whitespace-split token list (`COPY`, `FROM`).
    Tokens(Vec<String>),
}

impl Args {
    /// The argument rendered as a single shell-ready string.
    ///
    /// Exec arrays are joined with single spaces; token lists likewise.
    pub fn as_command(&self) -> String {
        match self {
            Args::Text(text) => text.clone(),
            Args::Exec(parts) | Args::Tokens(parts) => parts.join(" "),
        }
    }

    pub fn tokens(&self) -> &[String] {
        match self {
            Args::Exec(parts) | Args::Tokens(parts) => parts,
            Args::Text(_) => &[],
        }
    }
}

/// One parsed recipe entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub args: Args,
    /// 1-based source line. For multi-line instructions this is the line
    /// the instruction ends on.
    pub lineno: usize,
    /// Logical source text (continuations joined), used by the rewriter.
    pub raw: String,
}

impl Entry {
    pub fn is_live_directive(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::LiveCmd | EntryKind::LiveRun | EntryKind::LiveCopy | EntryKind::LiveEnv
        )
    }
}
