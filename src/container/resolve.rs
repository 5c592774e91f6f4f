//! Resolution of changed context files to in-container operations.
//!
//! Matching a changed file against a group's copies yields the absolute
//! in-container path it must be written to (or deleted from). The
//! resolution itself is pure; the executor supplies the two environment
//! facts it depends on (is the destination a directory, is the copy
//! source a real host path distinct from the changed file).

use crate::errors::{LivepushError, LivepushResult};
use crate::util;

/// One file to stream into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOperation {
    /// Context-relative host path to read.
    pub from_path: String,
    /// Absolute in-container destination.
    pub to_path: String,
}

/// Compute the in-container destination for changed file `file` under
/// the copy `source -> dest`.
///
/// With a directory destination, a real on-host source distinct from the
/// file itself means the source was a directory: the file keeps its path
/// relative to it. Otherwise the full context-relative path is appended
/// (globs and `.` land their matches by context layout). A file
/// destination is used as-is.
pub fn resolve_destination(
    source: &str,
    dest: &str,
    file: &str,
    dest_is_directory: bool,
    source_is_real: bool,
) -> String {
    if dest_is_directory {
        if source_is_real && source != file {
            util::join(dest, &util::relative(source, file))
        } else {
            util::join(dest, file)
        }
    } else {
        util::normalize(dest)
    }
}

/// Whether `source` names a real host path different from `file`.
pub fn source_is_real(context: &std::path::Path, source: &str, file: &str) -> bool {
    source != file && context.join(util::to_host(source)).exists()
}

/// Record a resolved operation.
///
/// A file reaching a destination already claimed by itself (through
/// another copy) is deduplicated. A *different* file claiming the same
/// non-directory destination is an ambiguous COPY: two changed files
/// cannot both become one in-container file, so the run fails rather
/// than silently dropping one of them.
pub fn record_operation(
    ops: &mut Vec<AddOperation>,
    op: AddOperation,
    dest_is_directory: bool,
) -> LivepushResult<()> {
    if let Some(existing) = ops.iter().find(|e| e.to_path == op.to_path) {
        if !dest_is_directory && existing.from_path != op.from_path {
            return Err(LivepushError::Runtime(format!(
                "ambiguous COPY: {} and {} both resolve to non-directory destination {}",
                existing.from_path, op.from_path, op.to_path
            )));
        }
        return Ok(());
    }
    ops.push(op);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_destination_used_as_is() {
        assert_eq!(
            resolve_destination("a.ts", "/b.ts", "a.ts", false, false),
            "/b.ts"
        );
    }

    #[test]
    fn test_directory_destination_appends_context_path() {
        assert_eq!(
            resolve_destination("a.ts", "/app/", "a.ts", true, false),
            "/app/a.ts"
        );
        assert_eq!(
            resolve_destination(".", "/app", "src/deep/x.ts", true, false),
            "/app/src/deep/x.ts"
        );
    }

    #[test]
    fn test_directory_source_keeps_relative_layout() {
        assert_eq!(
            resolve_destination("src", "/app", "src/deep/x.ts", true, true),
            "/app/deep/x.ts"
        );
    }

    #[test]
    fn test_glob_source_lands_by_context_layout() {
        // A glob never exists on disk, so the full path is appended.
        assert_eq!(
            resolve_destination("*.ts", "/app", "a.ts", true, false),
            "/app/a.ts"
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let once = resolve_destination("src", "/app/", "src/x.ts", true, true);
        let twice = resolve_destination("src", "/app/", "src/x.ts", true, true);
        assert_eq!(once, twice);
        assert_eq!(once, "/app/x.ts");
    }

    #[test]
    fn test_source_is_real_checks_host() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        assert!(source_is_real(dir.path(), "src", "src/x.ts"));
        assert!(!source_is_real(dir.path(), "missing", "missing/x.ts"));
        assert!(!source_is_real(dir.path(), "src", "src"));
    }

    #[test]
    fn test_record_operation_dedupes_same_file() {
        let mut ops = Vec::new();
        record_operation(
            &mut ops,
            AddOperation {
                from_path: "a.ts".into(),
                to_path: "/app/a.ts".into(),
            },
            true,
        )
        .unwrap();
        record_operation(
            &mut ops,
            AddOperation {
                from_path: "a.ts".into(),
                to_path: "/app/a.ts".into(),
            },
            true,
        )
        .unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_record_operation_rejects_ambiguous_copy() {
        // Two distinct files landing on one non-directory destination.
        let mut ops = Vec::new();
        record_operation(
            &mut ops,
            AddOperation {
                from_path: "a.ts".into(),
                to_path: "/dest.ts".into(),
            },
            false,
        )
        .unwrap();
        let err = record_operation(
            &mut ops,
            AddOperation {
                from_path: "b.ts".into(),
                to_path: "/dest.ts".into(),
            },
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LivepushError::Runtime(_)));

        // The same pair under a directory destination stays a dedupe.
        let mut ops = Vec::new();
        for from in ["a.ts", "b.ts"] {
            record_operation(
                &mut ops,
                AddOperation {
                    from_path: from.into(),
                    to_path: "/app/shared".into(),
                },
                true,
            )
            .unwrap();
        }
        assert_eq!(ops.len(), 1);
    }
}
