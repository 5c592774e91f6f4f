//! Recipe parsing: Dockerfile text to the stage/action-group model.
//!
//! The pipeline is directive scan -> continuation join -> instruction
//! lex -> line-ordered merge -> stage build. [`Recipe`] holds the merged
//! entry list (for the rewriter) and the built stages (for invalidation
//! and execution).

pub mod directives;
pub mod entry;
pub mod groups;
pub mod lexer;
pub mod rewrite;
pub mod stages;

pub use entry::{Args, Entry, EntryKind};
pub use groups::{ActionGroup, LocalCopy, LocalGroup, StageCopy, StageGroup};
pub use stages::Stage;

use crate::errors::LivepushResult;

/// A parsed recipe.
#[derive(Debug, Clone)]
pub struct Recipe {
    text: String,
    entries: Vec<Entry>,
    stages: Vec<Stage>,
}

impl Recipe {
    /// Parse recipe text into the internal model.
    pub fn parse(text: &str) -> LivepushResult<Self> {
        let scan = directives::scan(text)?;
        let raws = lexer::join_lines(&scan.stripped)?;
        let instructions = raws
            .iter()
            .map(lexer::lex)
            .collect::<LivepushResult<Vec<Entry>>>()?;
        let entries = lexer::merge(instructions, scan.entries);
        let stages = stages::build(&entries)?;

        Ok(Self {
            text: text.to_string(),
            entries,
            stages,
        })
    }

    /// The original recipe text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed entries in source order, directives included.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Whether the recipe carries any `#dev-*` directive.
    pub fn has_live_directives(&self) -> bool {
        self.entries.iter().any(|e| e.is_live_directive())
    }

    /// The development-mode recipe text (see [`rewrite`]).
    pub fn development_text(&self) -> String {
        rewrite::development_text(self)
    }

    /// Parse the development-mode variant of this recipe.
    ///
    /// The rewritten text is re-parsed so the returned model reflects
    /// the dev recipe exactly; without live directives this is a clone.
    pub fn development(&self) -> LivepushResult<Self> {
        Self::parse(&self.development_text())
    }
}
