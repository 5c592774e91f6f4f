//! Action groups and the per-stage invalidation queries.
//!
//! An action group bundles copies of one kind (host-context or
//! stage-to-stage) with the commands that follow them, all under a single
//! working directory. Invalidation returns the longest affected suffix of
//! a stage's group list: once a group must re-run, everything after it in
//! the same stage re-runs too.

use globset::GlobBuilder;

use crate::util;

/// A copy from the host build context into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopy {
    /// Context-relative source (may be a glob or a directory).
    pub source: String,
    /// Absolute in-container destination; a trailing `/` marks an
    /// explicit directory destination.
    pub dest: String,
}

/// A copy from an earlier stage's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCopy {
    pub source: String,
    pub dest: String,
    pub source_stage: usize,
}

/// Copies from the host context plus trailing commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalGroup {
    pub workdir: String,
    pub copies: Vec<LocalCopy>,
    pub commands: Vec<String>,
    pub restart: bool,
}

/// Copies from a single earlier stage plus trailing commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup {
    pub workdir: String,
    pub source_stage: usize,
    pub copies: Vec<StageCopy>,
    pub commands: Vec<String>,
    pub restart: bool,
}

/// One executable unit of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionGroup {
    Local(LocalGroup),
    FromStage(StageGroup),
}

impl ActionGroup {
    pub fn workdir(&self) -> &str {
        match self {
            ActionGroup::Local(g) => &g.workdir,
            ActionGroup::FromStage(g) => &g.workdir,
        }
    }

    pub fn commands(&self) -> &[String] {
        match self {
            ActionGroup::Local(g) => &g.commands,
            ActionGroup::FromStage(g) => &g.commands,
        }
    }

    pub fn restart(&self) -> bool {
        match self {
            ActionGroup::Local(g) => g.restart,
            ActionGroup::FromStage(g) => g.restart,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ActionGroup::Local(g) => g.copies.is_empty() && g.commands.is_empty(),
            ActionGroup::FromStage(g) => g.copies.is_empty() && g.commands.is_empty(),
        }
    }
}

/// Whether changed file `file` is covered by copy source `source`.
///
/// Rules, in order:
/// - `.` covers every context-relative path;
/// - absolute sources and sources with a trailing `/` cover strict
///   descendants only;
/// - otherwise a glob match counts, as does being a strict descendant of
///   the source treated as a directory.
pub fn copy_source_matches(file: &str, source: &str) -> bool {
    let file = util::normalize(file);

    if source == "." || source == "./" {
        return !util::is_absolute(&file);
    }

    let dir_only = source.ends_with('/') || util::is_absolute(source);
    let source = util::normalize(source);
    if source == "." {
        return !util::is_absolute(&file);
    }

    if dir_only {
        return util::is_strict_descendant(&source, &file);
    }

    if glob_matches(&source, &file) {
        return true;
    }
    util::is_strict_descendant(&source, &file)
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    // minimatch semantics: `*` does not cross `/`.
    match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher().is_match(path),
        Err(_) => false,
    }
}

/// Longest suffix of `groups` invalidated by the changed files.
///
/// Only host-context copies are consulted; once the first matching group
/// is found at index `k`, every group from `k` on is returned regardless
/// of whether it matches itself.
pub fn suffix_for_changed_files<'a>(
    groups: &'a [ActionGroup],
    files: &[String],
) -> &'a [ActionGroup] {
    let start = groups.iter().position(|group| match group {
        ActionGroup::Local(local) => local
            .copies
            .iter()
            .any(|copy| files.iter().any(|f| copy_source_matches(f, &copy.source))),
        ActionGroup::FromStage(_) => false,
    });
    match start {
        Some(k) => &groups[k..],
        None => &[],
    }
}

/// Longest suffix invalidated by a change to stage `source_stage`.
pub fn suffix_for_changed_stage(groups: &[ActionGroup], source_stage: usize) -> &[ActionGroup] {
    let start = groups.iter().position(|group| match group {
        ActionGroup::FromStage(stage) => stage.source_stage == source_stage,
        ActionGroup::Local(_) => false,
    });
    match start {
        Some(k) => &groups[k..],
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(copies: &[(&str, &str)], commands: &[&str]) -> ActionGroup {
        ActionGroup::Local(LocalGroup {
            workdir: "/".into(),
            copies: copies
                .iter()
                .map(|(s, d)| LocalCopy {
                    source: s.to_string(),
                    dest: d.to_string(),
                })
                .collect(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            restart: true,
        })
    }

    fn from_stage(stage: usize) -> ActionGroup {
        ActionGroup::FromStage(StageGroup {
            workdir: "/".into(),
            source_stage: stage,
            copies: vec![StageCopy {
                source: "/out".into(),
                dest: "/out".into(),
                source_stage: stage,
            }],
            commands: vec![],
            restart: true,
        })
    }

    #[test]
    fn test_dot_matches_any_relative_path() {
        assert!(copy_source_matches("src/a.ts", "."));
        assert!(copy_source_matches("a.ts", "./"));
        assert!(!copy_source_matches("/abs/a.ts", "."));
    }

    #[test]
    fn test_literal_and_glob_matching() {
        assert!(copy_source_matches("a.ts", "a.ts"));
        assert!(copy_source_matches("a.ts", "*.ts"));
        assert!(!copy_source_matches("src/a.ts", "*.ts"));
        assert!(copy_source_matches("src/a.ts", "src/*.ts"));
        assert!(!copy_source_matches("b.js", "*.ts"));
    }

    #[test]
    fn test_directory_prefix_matching() {
        assert!(copy_source_matches("src/deep/a.ts", "src"));
        assert!(copy_source_matches("src/a.ts", "src/"));
        assert!(!copy_source_matches("src", "src"));
        assert!(!copy_source_matches("srcdir/a.ts", "src"));
    }

    #[test]
    fn test_absolute_source_matches_by_prefix_only() {
        assert!(copy_source_matches("/data/a.bin", "/data"));
        assert!(!copy_source_matches("/data", "/data"));
    }

    #[test]
    fn test_suffix_includes_all_following_groups() {
        let groups = vec![
            local(&[("y", "/app/y")], &["cmd"]),
            local(&[("z", "/app/z")], &["cmd2"]),
        ];

        let hit = suffix_for_changed_files(&groups, &["y".to_string()]);
        assert_eq!(hit.len(), 2);

        let tail = suffix_for_changed_files(&groups, &["z".to_string()]);
        assert_eq!(tail.len(), 1);

        let none = suffix_for_changed_files(&groups, &["w".to_string()]);
        assert!(none.is_empty());
    }

    #[test]
    fn test_stage_groups_are_skipped_for_file_changes() {
        let groups = vec![from_stage(0), local(&[("a", "/a")], &[])];
        let hit = suffix_for_changed_files(&groups, &["a".to_string()]);
        assert_eq!(hit.len(), 1);
    }

    #[test]
    fn test_suffix_for_changed_stage() {
        let groups = vec![local(&[("a", "/a")], &[]), from_stage(0), from_stage(1)];
        assert_eq!(suffix_for_changed_stage(&groups, 0).len(), 2);
        assert_eq!(suffix_for_changed_stage(&groups, 1).len(), 1);
        assert!(suffix_for_changed_stage(&groups, 9).is_empty());
    }
}
