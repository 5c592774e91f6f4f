//! Comment-embedded directive scanning.
//!
//! Directives are line comments of the form `#<name>=<args>`. Recognized
//! names become typed entries carrying their source line so they can be
//! merged back between ordinary instructions; every other comment is
//! dropped. The `escape` directive is special-cased twice: it yields a
//! typed entry AND stays in the stripped text, because the line joiner
//! has to honor escape changes at the exact line they occur.

use crate::errors::LivepushResult;
use crate::recipe::entry::{Args, Entry, EntryKind};

/// Default line-continuation escape character.
pub const DEFAULT_ESCAPE: char = '\\';

const DIRECTIVES: &[(&str, EntryKind)] = &[
    ("dev-cmd-live", EntryKind::LiveCmd),
    ("dev-run", EntryKind::LiveRun),
    ("dev-copy", EntryKind::LiveCopy),
    ("dev-env", EntryKind::LiveEnv),
    ("livecmd-marker", EntryKind::LiveCmdMarker),
    ("escape", EntryKind::Escape),
];

/// Result of scanning a recipe for directives.
pub struct DirectiveScan {
    /// Typed directive entries in source order.
    pub entries: Vec<Entry>,
    /// The recipe text with comments blanked out (line numbers kept
    /// stable). Escape directive lines are preserved verbatim.
    pub stripped: String,
}

/// Scan `text` for comment directives.
pub fn scan(text: &str) -> LivepushResult<DirectiveScan> {
    let mut entries = Vec::new();
    let mut stripped_lines: Vec<&str> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim_start();

        if !trimmed.starts_with('#') {
            stripped_lines.push(line);
            continue;
        }

        let body = trimmed[1..].trim_start();
        match classify(body) {
            Some((kind, args)) => {
                let preserve = kind == EntryKind::Escape;
                entries.push(Entry {
                    kind,
                    args: Args::Text(args.to_string()),
                    lineno,
                    raw: line.to_string(),
                });
                // The joiner re-reads escape lines to switch continuation
                // handling mid-file.
                stripped_lines.push(if preserve { line } else { "" });
            }
            None => stripped_lines.push(""),
        }
    }

    Ok(DirectiveScan {
        entries,
        stripped: stripped_lines.join("\n"),
    })
}

/// Parse a comment body as `name=args`, if `name` is a known directive.
pub fn classify(body: &str) -> Option<(EntryKind, &str)> {
    for (name, kind) in DIRECTIVES {
        if let Some(rest) = body.strip_prefix(name) {
            if let Some(args) = rest.strip_prefix('=') {
                return Some((kind.clone(), args));
            }
        }
    }
    None
}

/// Extract the escape character from an `#escape=` directive value.
pub fn escape_char(args: &str) -> Option<char> {
    args.trim().chars().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_picks_up_directives_with_lines() {
        let text = "FROM a\n#dev-run=npm ci\n# plain comment\n#dev-cmd-live=npm start\nCMD x\n";
        let scan = scan(text).unwrap();

        assert_eq!(scan.entries.len(), 2);
        assert_eq!(scan.entries[0].kind, EntryKind::LiveRun);
        assert_eq!(scan.entries[0].args, Args::Text("npm ci".into()));
        assert_eq!(scan.entries[0].lineno, 2);
        assert_eq!(scan.entries[1].kind, EntryKind::LiveCmd);
        assert_eq!(scan.entries[1].lineno, 4);
    }

    #[test]
    fn test_scan_blanks_comments_but_keeps_line_numbers() {
        let text = "FROM a\n# comment\nRUN x";
        let scan = scan(text).unwrap();
        let lines: Vec<&str> = scan.stripped.lines().collect();
        assert_eq!(lines, vec!["FROM a", "", "RUN x"]);
    }

    #[test]
    fn test_escape_directive_preserved_in_stripped_text() {
        let text = "#escape=`\nFROM a";
        let scan = scan(text).unwrap();
        assert!(scan.stripped.starts_with("#escape=`"));
        assert_eq!(scan.entries[0].kind, EntryKind::Escape);
        assert_eq!(escape_char("`"), Some('`'));
    }

    #[test]
    fn test_unknown_directive_is_dropped() {
        let text = "#dev-unknown=x\nFROM a";
        let scan = scan(text).unwrap();
        assert!(scan.entries.is_empty());
    }

    #[test]
    fn test_indented_directive_comment() {
        let text = "FROM a\n  #  dev-copy=extra /extra\n";
        let scan = scan(text).unwrap();
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.entries[0].kind, EntryKind::LiveCopy);
        assert_eq!(scan.entries[0].args, Args::Text("extra /extra".into()));
    }
}
