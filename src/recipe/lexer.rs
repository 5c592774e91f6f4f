//! Line joining and instruction lexing.
//!
//! Works on the comment-stripped text produced by the directive scanner.
//! Continuations are joined according to the current escape character;
//! an `#escape=` line (preserved by the scanner) switches the character
//! from that point on. Joined instructions are then lexed into typed
//! entries.

use crate::errors::{LivepushError, LivepushResult};
use crate::recipe::directives::{self, DEFAULT_ESCAPE};
use crate::recipe::entry::{Args, Entry, EntryKind};

/// A logical instruction: continuation lines joined into one string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    pub text: String,
    /// 1-based line the instruction ends on.
    pub lineno: usize,
}

/// Join continuation lines into logical instructions.
///
/// A line ending in the escape character continues on the next content
/// line; the escape and newline are removed and the continuation keeps
/// its leading whitespace literally. Blank lines inside a continuation
/// (comments stripped earlier) are skipped.
pub fn join_lines(stripped: &str) -> LivepushResult<Vec<RawInstruction>> {
    let mut escape = DEFAULT_ESCAPE;
    let mut result = Vec::new();
    let mut current = String::new();
    let mut continuing = false;
    let mut last_lineno = 0;

    for (idx, line) in stripped.lines().enumerate() {
        let lineno = idx + 1;

        // Escape switches take effect from their own line onward.
        if let Some((EntryKind::Escape, args)) = line
            .trim_start()
            .strip_prefix('#')
            .and_then(|body| directives::classify(body.trim_start()))
        {
            if let Some(ch) = directives::escape_char(args) {
                escape = ch;
            }
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        let (content, continued) = match line.strip_suffix(escape) {
            Some(head) => (head, true),
            None => (line, false),
        };

        if continuing {
            current.push_str(content);
        } else {
            current = content.to_string();
        }
        continuing = continued;
        last_lineno = lineno;

        if !continuing {
            result.push(RawInstruction {
                text: std::mem::take(&mut current),
                lineno,
            });
        }
    }

    if continuing {
        return Err(LivepushError::parse(
            last_lineno,
            "unterminated line continuation",
        ));
    }

    Ok(result)
}

/// Lex a joined instruction into a typed entry.
pub fn lex(raw: &RawInstruction) -> LivepushResult<Entry> {
    let text = raw.text.trim_start();
    let (word, rest) = match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim_start()),
        None => (text, ""),
    };
    let name = word.to_uppercase();

    let (kind, args) = match name.as_str() {
        "FROM" => (EntryKind::From, tokenize(rest)),
        "COPY" => (EntryKind::Copy, tokenize(rest)),
        "WORKDIR" => (EntryKind::Workdir, Args::Text(rest.to_string())),
        "RUN" => (EntryKind::Run, command_args(raw.lineno, rest, true)?),
        "CMD" => (EntryKind::Cmd, command_args(raw.lineno, rest, false)?),
        "ADD" => {
            return Err(LivepushError::UnsupportedInstruction {
                line: raw.lineno,
                instruction: "ADD".to_string(),
            });
        }
        _ => (EntryKind::Other(name), Args::Text(rest.to_string())),
    };

    Ok(Entry {
        kind,
        args,
        lineno: raw.lineno,
        raw: raw.text.clone(),
    })
}

fn tokenize(rest: &str) -> Args {
    Args::Tokens(rest.split_whitespace().map(str::to_string).collect())
}

/// Parse RUN/CMD arguments: shell form, exec array, or (rejected for
/// RUN) object form.
fn command_args(lineno: usize, rest: &str, reject_object: bool) -> LivepushResult<Args> {
    let trimmed = rest.trim();
    if reject_object && trimmed.starts_with('{') {
        return Err(LivepushError::parse(
            lineno,
            "RUN does not accept object form",
        ));
    }
    if trimmed.starts_with('[') {
        let parts: Vec<String> = serde_json::from_str(trimmed).map_err(|e| {
            LivepushError::parse(lineno, format!("malformed exec array: {}", e))
        })?;
        return Ok(Args::Exec(parts));
    }
    Ok(Args::Text(rest.to_string()))
}

/// Merge lexed instructions with directive entries, ordered by line.
///
/// Both inputs are already sorted; a stable merge keeps a directive
/// ahead of an instruction that ends on a later line.
pub fn merge(instructions: Vec<Entry>, directives: Vec<Entry>) -> Vec<Entry> {
    let mut merged = Vec::with_capacity(instructions.len() + directives.len());
    let mut ins = instructions.into_iter().peekable();
    let mut dir = directives.into_iter().peekable();

    loop {
        match (ins.peek(), dir.peek()) {
            (Some(i), Some(d)) => {
                if d.lineno <= i.lineno {
                    merged.push(dir.next().unwrap());
                } else {
                    merged.push(ins.next().unwrap());
                }
            }
            (Some(_), None) => merged.push(ins.next().unwrap()),
            (None, Some(_)) => merged.push(dir.next().unwrap()),
            (None, None) => break,
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_simple_lines() {
        let raws = join_lines("FROM a\nRUN make\n").unwrap();
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0].text, "FROM a");
        assert_eq!(raws[0].lineno, 1);
        assert_eq!(raws[1].lineno, 2);
    }

    #[test]
    fn test_join_continuation_keeps_leading_whitespace() {
        let raws = join_lines("RUN apt-get update \\\n    && apt-get install x\n").unwrap();
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].text, "RUN apt-get update     && apt-get install x");
        // lineno is the line the instruction ends on
        assert_eq!(raws[0].lineno, 2);
    }

    #[test]
    fn test_join_honors_escape_directive() {
        let raws = join_lines("#escape=`\nRUN a `\n  b\n").unwrap();
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].text, "RUN a   b");
        assert_eq!(raws[0].lineno, 3);
    }

    #[test]
    fn test_join_skips_blank_lines_inside_continuation() {
        let raws = join_lines("RUN a \\\n\nb\n").unwrap();
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].text, "RUN a b");
    }

    #[test]
    fn test_join_unterminated_continuation_errors() {
        let err = join_lines("RUN a \\").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::LivepushError::Parse { line: 1, .. }
        ));
    }

    #[test]
    fn test_lex_uppercases_name() {
        let entry = lex(&RawInstruction {
            text: "from alpine".into(),
            lineno: 1,
        })
        .unwrap();
        assert_eq!(entry.kind, EntryKind::From);
        assert_eq!(entry.args, Args::Tokens(vec!["alpine".into()]));
    }

    #[test]
    fn test_lex_run_exec_array() {
        let entry = lex(&RawInstruction {
            text: r#"RUN ["npm", "ci"]"#.into(),
            lineno: 3,
        })
        .unwrap();
        assert_eq!(
            entry.args,
            Args::Exec(vec!["npm".to_string(), "ci".to_string()])
        );
        assert_eq!(entry.args.as_command(), "npm ci");
    }

    #[test]
    fn test_lex_run_object_form_is_error() {
        let err = lex(&RawInstruction {
            text: r#"RUN {"cmd": "x"}"#.into(),
            lineno: 7,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::LivepushError::Parse { line: 7, .. }
        ));
    }

    #[test]
    fn test_lex_add_is_unsupported() {
        let err = lex(&RawInstruction {
            text: "ADD a b".into(),
            lineno: 2,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::LivepushError::UnsupportedInstruction { line: 2, .. }
        ));
    }

    #[test]
    fn test_merge_orders_by_line() {
        let ins = vec![Entry {
            kind: EntryKind::From,
            args: Args::Tokens(vec!["a".into()]),
            lineno: 1,
            raw: "FROM a".into(),
        }];
        let dirs = vec![Entry {
            kind: EntryKind::LiveRun,
            args: Args::Text("x".into()),
            lineno: 2,
            raw: "#dev-run=x".into(),
        }];
        let merged = merge(ins, dirs);
        assert_eq!(merged[0].kind, EntryKind::From);
        assert_eq!(merged[1].kind, EntryKind::LiveRun);
    }
}
