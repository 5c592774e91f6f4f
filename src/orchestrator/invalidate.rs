//! Two-phase invalidation: changed files to per-stage group suffixes.
//!
//! Phase one matches files against every stage directly. Phase two
//! treats the hit stages as a frontier and expands along stage
//! dependencies: a stage copying from an invalidated stage re-runs from
//! its first affected stage-copy group. When a stage is reached through
//! several paths the longest suffix wins, so repeated expansion is
//! monotone and terminates (dependencies always point at lower
//! indices).

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::recipe::groups::ActionGroup;
use crate::recipe::Stage;

/// Compute the action groups each stage must re-run for the changed
/// files, keyed by stage index (ascending iteration order).
pub fn invalidate(stages: &[Stage], changed: &[String]) -> BTreeMap<usize, Vec<ActionGroup>> {
    // Suffix start index per invalidated stage; smaller start = longer
    // suffix.
    let mut starts: HashMap<usize, usize> = HashMap::new();
    let mut frontier: VecDeque<usize> = VecDeque::new();

    for stage in stages {
        let suffix = stage.groups_for_changed_files(changed);
        if !suffix.is_empty() {
            starts.insert(stage.index, stage.action_groups().len() - suffix.len());
            frontier.push_back(stage.index);
        }
    }

    while let Some(source) = frontier.pop_front() {
        for stage in stages {
            if !stage.dependent_on_stages.contains(&source) {
                continue;
            }
            let suffix = stage.groups_for_changed_stage(source);
            if suffix.is_empty() {
                continue;
            }
            let start = stage.action_groups().len() - suffix.len();
            let longer = starts.get(&stage.index).is_none_or(|known| start < *known);
            if longer {
                starts.insert(stage.index, start);
                frontier.push_back(stage.index);
            }
        }
    }

    starts
        .into_iter()
        .map(|(index, start)| (index, stages[index].action_groups()[start..].to_vec()))
        .collect()
}
