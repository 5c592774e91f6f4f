//! Stage construction from the parsed entry stream.
//!
//! Walks entries in source order, opening a stage per `FROM` and
//! coalescing `COPY`/`RUN`/`WORKDIR` sequences into action groups:
//! - `WORKDIR` always starts a fresh group;
//! - consecutive copies of the same kind (and, for stage copies, the
//!   same source stage) share one group;
//! - a copy after any command starts a new group;
//! - commands buffer until the next boundary and land in the group whose
//!   copies precede them.
//!
//! Groups created after the restart boundary (`#dev-cmd-live` or the
//! marker it rewrites to) carry `restart = false`.

use std::collections::{BTreeSet, HashMap};

use crate::errors::{LivepushError, LivepushResult};
use crate::recipe::entry::{Entry, EntryKind};
use crate::recipe::groups::{
    self, ActionGroup, LocalCopy, LocalGroup, StageCopy, StageGroup,
};
use crate::util;

/// A `FROM`-delimited section of the recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub index: usize,
    /// `AS` alias, when present.
    pub name: Option<String>,
    /// Indices of earlier stages this stage copies from.
    pub dependent_on_stages: BTreeSet<usize>,
    pub is_last: bool,
    /// Working directory in effect at the end of the stage.
    pub working_dir: String,
    pub live_cmd_seen: bool,
    groups: Vec<ActionGroup>,
}

impl Stage {
    pub fn action_groups(&self) -> &[ActionGroup] {
        &self.groups
    }

    /// Longest group suffix invalidated by the given changed files.
    pub fn groups_for_changed_files(&self, files: &[String]) -> &[ActionGroup] {
        groups::suffix_for_changed_files(&self.groups, files)
    }

    /// Longest group suffix invalidated by a change to `source_stage`.
    pub fn groups_for_changed_stage(&self, source_stage: usize) -> &[ActionGroup] {
        groups::suffix_for_changed_stage(&self.groups, source_stage)
    }
}

/// Build the stage list for a parsed entry stream.
pub fn build(entries: &[Entry]) -> LivepushResult<Vec<Stage>> {
    let mut builder = StageBuilder::default();
    for entry in entries {
        builder.feed(entry)?;
    }
    builder.finish(entries)
}

#[derive(Default)]
struct StageBuilder {
    stages: Vec<Stage>,
    /// Lowercased alias -> stage index.
    aliases: HashMap<String, usize>,
    current: Option<CurrentStage>,
    live_cmd_seen: bool,
    /// Set once the restart boundary has been crossed anywhere in the
    /// recipe; groups created afterwards do not trigger a restart.
    marker_crossed: bool,
}

struct CurrentStage {
    index: usize,
    name: Option<String>,
    dependent_on_stages: BTreeSet<usize>,
    groups: Vec<ActionGroup>,
    working_dir: String,
    live_cmd_seen: bool,
    ungrouped_commands: Vec<String>,
    last_step_was_copy: bool,
}

impl StageBuilder {
    fn feed(&mut self, entry: &Entry) -> LivepushResult<()> {
        match &entry.kind {
            EntryKind::From => self.on_from(entry),
            EntryKind::Workdir => self.on_workdir(entry),
            EntryKind::Run => self.on_run(entry),
            EntryKind::Copy => self.on_copy(entry),
            EntryKind::Cmd => {
                self.require_stage(entry)?;
                Ok(())
            }
            EntryKind::LiveCmd => {
                if self.live_cmd_seen {
                    return Err(LivepushError::parse(
                        entry.lineno,
                        "duplicate #dev-cmd-live directive",
                    ));
                }
                self.live_cmd_seen = true;
                self.cross_marker();
                Ok(())
            }
            EntryKind::LiveCmdMarker => {
                self.cross_marker();
                Ok(())
            }
            // Inert during stage construction: live run/copy/env only
            // materialize through the rewritten development recipe.
            EntryKind::LiveRun | EntryKind::LiveCopy | EntryKind::LiveEnv => Ok(()),
            EntryKind::Escape | EntryKind::Other(_) => Ok(()),
        }
    }

    fn on_from(&mut self, entry: &Entry) -> LivepushResult<()> {
        let alias = match entry.args.tokens() {
            [_image] => None,
            [_image, kw, alias] if kw.eq_ignore_ascii_case("as") => Some(alias.clone()),
            _ => {
                return Err(LivepushError::parse(
                    entry.lineno,
                    format!("malformed FROM: {}", entry.raw.trim()),
                ));
            }
        };

        self.close_current();
        let index = self.stages.len();
        if let Some(alias) = &alias {
            self.aliases.insert(alias.to_lowercase(), index);
        }
        self.current = Some(CurrentStage {
            index,
            name: alias,
            dependent_on_stages: BTreeSet::new(),
            groups: Vec::new(),
            working_dir: "/".to_string(),
            live_cmd_seen: false,
            ungrouped_commands: Vec::new(),
            last_step_was_copy: false,
        });
        Ok(())
    }

    fn on_workdir(&mut self, entry: &Entry) -> LivepushResult<()> {
        let restart = !self.marker_crossed;
        let current = self.require_stage(entry)?;
        let path = match &entry.args {
            crate::recipe::entry::Args::Text(text) => text.trim(),
            _ => "",
        };
        if path.is_empty() {
            return Err(LivepushError::parse(entry.lineno, "WORKDIR requires a path"));
        }

        current.flush_ungrouped(restart);
        let workdir = util::join(&current.working_dir, path);
        current.groups.push(ActionGroup::Local(LocalGroup {
            workdir: workdir.clone(),
            copies: Vec::new(),
            commands: Vec::new(),
            restart,
        }));
        current.working_dir = workdir;
        current.last_step_was_copy = false;
        Ok(())
    }

    fn on_run(&mut self, entry: &Entry) -> LivepushResult<()> {
        let command = entry.args.as_command();
        let current = self.require_stage(entry)?;
        current.ungrouped_commands.push(command);
        current.last_step_was_copy = false;
        Ok(())
    }

    fn on_copy(&mut self, entry: &Entry) -> LivepushResult<()> {
        let restart = !self.marker_crossed;
        let from_ref = entry
            .args
            .tokens()
            .iter()
            .find_map(|t| t.strip_prefix("--from=").map(str::to_string));
        let source_stage = match &from_ref {
            Some(reference) => Some(self.resolve_stage(reference, entry.lineno)?),
            None => None,
        };

        let current = self.require_stage(entry)?;
        if let Some(source) = source_stage {
            if source >= current.index {
                return Err(LivepushError::parse(
                    entry.lineno,
                    format!("COPY --from references a later stage ({})", source),
                ));
            }
        }

        let paths: Vec<&String> = entry
            .args
            .tokens()
            .iter()
            .filter(|t| !t.starts_with("--"))
            .collect();
        let (dest_token, sources) = match paths.split_last() {
            Some((dest, sources)) if !sources.is_empty() => (dest, sources),
            _ => {
                return Err(LivepushError::parse(
                    entry.lineno,
                    "COPY requires at least one source and a destination",
                ));
            }
        };

        let dir_hint = dest_token.ends_with('/');
        let mut dest = if util::is_absolute(dest_token) {
            util::normalize(dest_token)
        } else {
            util::join(&current.working_dir, dest_token)
        };
        if dir_hint && !dest.ends_with('/') {
            dest.push('/');
        }

        let coalesce = current.last_step_was_copy
            && match (current.groups.last(), source_stage) {
                (Some(ActionGroup::Local(_)), None) => true,
                (Some(ActionGroup::FromStage(tail)), Some(source)) => {
                    tail.source_stage == source
                }
                _ => false,
            };
        if !coalesce {
            current.flush_ungrouped(restart);
            let group = match source_stage {
                None => ActionGroup::Local(LocalGroup {
                    workdir: current.working_dir.clone(),
                    copies: Vec::new(),
                    commands: Vec::new(),
                    restart,
                }),
                Some(source) => ActionGroup::FromStage(StageGroup {
                    workdir: current.working_dir.clone(),
                    source_stage: source,
                    copies: Vec::new(),
                    commands: Vec::new(),
                    restart,
                }),
            };
            current.groups.push(group);
        }

        let tail = current
            .groups
            .last_mut()
            .expect("copy group pushed above");
        match (tail, source_stage) {
            (ActionGroup::Local(local), None) => {
                for source in sources {
                    local.copies.push(LocalCopy {
                        source: util::normalize(source),
                        dest: dest.clone(),
                    });
                }
            }
            (ActionGroup::FromStage(stage), Some(source_stage)) => {
                for source in sources {
                    stage.copies.push(StageCopy {
                        source: util::normalize(source),
                        dest: dest.clone(),
                        source_stage,
                    });
                }
            }
            _ => unreachable!("group kind checked during coalescing"),
        }

        if let Some(source) = source_stage {
            current.dependent_on_stages.insert(source);
        }
        current.last_step_was_copy = true;
        Ok(())
    }

    /// Cross the restart boundary: later groups no longer restart, and
    /// copies on either side of the boundary must not share a group.
    fn cross_marker(&mut self) {
        self.marker_crossed = true;
        if let Some(current) = self.current.as_mut() {
            current.live_cmd_seen = true;
            current.last_step_was_copy = false;
        }
    }

    fn resolve_stage(&self, reference: &str, lineno: usize) -> LivepushResult<usize> {
        if let Some(index) = self.aliases.get(&reference.to_lowercase()) {
            return Ok(*index);
        }
        if let Ok(index) = reference.parse::<usize>() {
            let known = self.current.as_ref().map_or(self.stages.len(), |c| c.index);
            if index < known {
                return Ok(index);
            }
        }
        Err(LivepushError::parse(
            lineno,
            format!("unknown stage in COPY --from: {}", reference),
        ))
    }

    fn require_stage(&mut self, entry: &Entry) -> LivepushResult<&mut CurrentStage> {
        let lineno = entry.lineno;
        self.current.as_mut().ok_or_else(|| {
            LivepushError::parse(lineno, "instruction before the first FROM")
        })
    }

    fn close_current(&mut self) {
        let restart = !self.marker_crossed;
        if let Some(mut current) = self.current.take() {
            current.flush_ungrouped(restart);
            current.groups.retain(|g| !g.is_empty());
            self.stages.push(Stage {
                index: current.index,
                name: current.name,
                dependent_on_stages: current.dependent_on_stages,
                is_last: false,
                working_dir: current.working_dir,
                live_cmd_seen: current.live_cmd_seen,
                groups: current.groups,
            });
        }
    }

    fn finish(mut self, entries: &[Entry]) -> LivepushResult<Vec<Stage>> {
        self.close_current();
        if self.stages.is_empty() {
            let lineno = entries.first().map_or(1, |e| e.lineno);
            return Err(LivepushError::parse(lineno, "recipe contains no stages"));
        }
        if let Some(last) = self.stages.last_mut() {
            last.is_last = true;
        }
        Ok(self.stages)
    }
}

impl CurrentStage {
    /// Move buffered commands into the tail group, creating a bare group
    /// when commands precede any copy.
    fn flush_ungrouped(&mut self, restart: bool) {
        if self.ungrouped_commands.is_empty() {
            return;
        }
        let commands = std::mem::take(&mut self.ungrouped_commands);
        match self.groups.last_mut() {
            Some(ActionGroup::Local(local)) => local.commands.extend(commands),
            Some(ActionGroup::FromStage(stage)) => stage.commands.extend(commands),
            None => self.groups.push(ActionGroup::Local(LocalGroup {
                workdir: self.working_dir.clone(),
                copies: Vec::new(),
                commands,
                restart,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Recipe;

    fn stages_of(text: &str) -> Vec<Stage> {
        Recipe::parse(text).unwrap().stages().to_vec()
    }

    #[test]
    fn test_single_stage_single_copy() {
        let stages = stages_of("FROM alpine\nCOPY a.ts /b.ts\n");
        assert_eq!(stages.len(), 1);
        assert!(stages[0].is_last);
        let groups = stages[0].action_groups();
        assert_eq!(groups.len(), 1);
        match &groups[0] {
            ActionGroup::Local(local) => {
                assert_eq!(local.copies.len(), 1);
                assert_eq!(local.copies[0].source, "a.ts");
                assert_eq!(local.copies[0].dest, "/b.ts");
                assert!(local.commands.is_empty());
                assert!(local.restart);
            }
            other => panic!("unexpected group: {:?}", other),
        }
    }

    #[test]
    fn test_workdir_copy_run_grouping() {
        let stages = stages_of(
            "FROM alpine\nWORKDIR /x\nCOPY y .\nRUN cmd\nCOPY z .\nRUN cmd2\n",
        );
        let groups = stages[0].action_groups();
        assert_eq!(groups.len(), 2);

        match &groups[0] {
            ActionGroup::Local(g) => {
                assert_eq!(g.workdir, "/x");
                assert_eq!(g.copies[0].source, "y");
                assert_eq!(g.copies[0].dest, "/x");
                assert_eq!(g.commands, vec!["cmd".to_string()]);
            }
            other => panic!("unexpected group: {:?}", other),
        }
        match &groups[1] {
            ActionGroup::Local(g) => {
                assert_eq!(g.copies[0].source, "z");
                assert_eq!(g.commands, vec!["cmd2".to_string()]);
            }
            other => panic!("unexpected group: {:?}", other),
        }
    }

    #[test]
    fn test_consecutive_copies_coalesce() {
        let stages = stages_of("FROM alpine\nCOPY a /a\nCOPY b /b\nRUN build\n");
        let groups = stages[0].action_groups();
        assert_eq!(groups.len(), 1);
        match &groups[0] {
            ActionGroup::Local(g) => {
                assert_eq!(g.copies.len(), 2);
                assert_eq!(g.commands, vec!["build".to_string()]);
            }
            other => panic!("unexpected group: {:?}", other),
        }
    }

    #[test]
    fn test_copy_after_run_starts_new_group() {
        let stages = stages_of("FROM alpine\nCOPY a /a\nRUN one\nCOPY b /b\n");
        assert_eq!(stages[0].action_groups().len(), 2);
    }

    #[test]
    fn test_relative_dest_prefixed_with_workdir() {
        let stages = stages_of("FROM alpine\nWORKDIR /usr/src/app\nCOPY pkg lib/\n");
        match &stages[0].action_groups()[0] {
            ActionGroup::Local(g) => assert_eq!(g.copies[0].dest, "/usr/src/app/lib/"),
            other => panic!("unexpected group: {:?}", other),
        }
    }

    #[test]
    fn test_stage_copy_resolution_and_dependencies() {
        let stages = stages_of(
            "FROM node AS build\nCOPY . .\nRUN build\nFROM alpine\nCOPY --from=build /out /out\n",
        );
        assert_eq!(stages.len(), 2);
        assert!(stages[1].dependent_on_stages.contains(&0));
        match &stages[1].action_groups()[0] {
            ActionGroup::FromStage(g) => {
                assert_eq!(g.source_stage, 0);
                assert_eq!(g.copies[0].source, "/out");
            }
            other => panic!("unexpected group: {:?}", other),
        }
    }

    #[test]
    fn test_stage_copy_by_decimal_index() {
        let stages = stages_of("FROM a\nFROM b\nCOPY --from=0 /x /x\n");
        assert!(stages[1].dependent_on_stages.contains(&0));
    }

    #[test]
    fn test_unknown_stage_reference_is_parse_error() {
        let err = Recipe::parse("FROM a\nFROM b\nCOPY --from=missing /x /x\n").unwrap_err();
        assert!(matches!(err, LivepushError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_forward_stage_reference_is_parse_error() {
        let err = Recipe::parse("FROM a\nCOPY --from=1 /x /x\nFROM b\n").unwrap_err();
        assert!(matches!(err, LivepushError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_malformed_from_is_parse_error() {
        let err = Recipe::parse("FROM a b c\n").unwrap_err();
        assert!(matches!(err, LivepushError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_duplicate_dev_cmd_live_is_parse_error() {
        let err =
            Recipe::parse("FROM a\n#dev-cmd-live=x\n#dev-cmd-live=y\nCMD z\n").unwrap_err();
        assert!(matches!(err, LivepushError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_restart_boundary_splits_restart_flags() {
        let stages = stages_of(
            "FROM alpine\nCOPY a /a\nRUN one\n#dev-cmd-live=serve\nCOPY b /b\nRUN two\n",
        );
        let groups = stages[0].action_groups();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].restart());
        assert!(!groups[1].restart());
        assert!(stages[0].live_cmd_seen);
    }

    #[test]
    fn test_restart_boundary_breaks_copy_coalescing() {
        let stages = stages_of("FROM alpine\nCOPY a /a\n#dev-cmd-live=serve\nCOPY b /b\n");
        let groups = stages[0].action_groups();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].restart());
        assert!(!groups[1].restart());
    }

    #[test]
    fn test_commands_without_copies_form_their_own_group() {
        let stages = stages_of("FROM alpine\nRUN prep\nCOPY a /a\n");
        let groups = stages[0].action_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].commands(), ["prep".to_string()]);
        assert!(matches!(&groups[1], ActionGroup::Local(g) if g.copies.len() == 1));
    }

    #[test]
    fn test_empty_groups_are_elided() {
        // The WORKDIR group stays empty and must not survive finalize.
        let stages = stages_of("FROM alpine\nWORKDIR /x\n");
        assert!(stages[0].action_groups().is_empty());
        assert_eq!(stages[0].working_dir, "/x");
    }

    #[test]
    fn test_instruction_before_from_is_parse_error() {
        let err = Recipe::parse("RUN x\nFROM a\n").unwrap_err();
        assert!(matches!(err, LivepushError::Parse { line: 1, .. }));
    }
}
