//! Development-recipe generation.
//!
//! Rewrites the parsed recipe into its development-mode variant:
//! `#dev-cmd-live` becomes a restart-boundary marker comment followed by
//! a real `CMD`, `#dev-run`/`#dev-copy`/`#dev-env` become `RUN`/`COPY`/
//! `ENV`, and the original `CMD` is suppressed once a live cmd exists.
//! A live cmd in a non-terminal stage drops every following stage.

use crate::recipe::entry::EntryKind;
use crate::recipe::Recipe;

/// Comment emitted in place of `#dev-cmd-live`; re-parsing it restores
/// the restart boundary.
const MARKER_LINE: &str = "#livecmd-marker=true";

/// Produce the development recipe text.
///
/// A recipe without live directives, or one that already carries the
/// restart-boundary marker, is returned unchanged.
pub fn development_text(recipe: &Recipe) -> String {
    let entries = recipe.entries();

    let already_rewritten = entries
        .iter()
        .any(|e| e.kind == EntryKind::LiveCmdMarker);
    let has_live = entries.iter().any(|e| e.is_live_directive());
    if already_rewritten || !has_live {
        return recipe.text().to_string();
    }

    let has_live_cmd = entries.iter().any(|e| e.kind == EntryKind::LiveCmd);

    let mut out: Vec<String> = Vec::new();
    let mut live_cmd_emitted = false;
    for entry in entries {
        match &entry.kind {
            EntryKind::From => {
                // A live cmd in an earlier stage drops everything below.
                if live_cmd_emitted {
                    break;
                }
                out.push(entry.raw.clone());
            }
            EntryKind::LiveCmd => {
                out.push(MARKER_LINE.to_string());
                out.push(format!("CMD {}", entry.args.as_command()));
                live_cmd_emitted = true;
            }
            EntryKind::LiveRun => out.push(format!("RUN {}", entry.args.as_command())),
            EntryKind::LiveCopy => out.push(format!("COPY {}", entry.args.as_command())),
            EntryKind::LiveEnv => out.push(format!("ENV {}", entry.args.as_command())),
            EntryKind::Cmd if has_live_cmd => {}
            _ => out.push(entry.raw.clone()),
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}
