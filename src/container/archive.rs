//! Tar assembly for container uploads.
//!
//! Uploads are rooted at `/`: entry names are absolute in-container
//! paths with the leading slash trimmed. Archives are built in memory;
//! the changed-file batches livepush moves are bounded by the watcher.

use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Archive, Builder, EntryType, Header};

use crate::container::resolve::AddOperation;
use crate::errors::{LivepushError, LivepushResult};
use crate::util;

/// Build the upload archive for a local group's add operations.
///
/// Host files that disappeared since the change was observed are skipped
/// with a warning; the watcher will report the deletion separately.
pub fn build_local_archive(
    context: &Path,
    adds: &[AddOperation],
) -> LivepushResult<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    for add in adds {
        let host_path = context.join(util::to_host(&add.from_path));
        let metadata = match std::fs::metadata(&host_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(
                    path = %host_path.display(),
                    error = %e,
                    "skipping vanished file during archive build"
                );
                continue;
            }
        };
        if metadata.is_dir() {
            tracing::warn!(
                path = %host_path.display(),
                "skipping directory in changed-file set"
            );
            continue;
        }

        let data = std::fs::read(&host_path)?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(file_mode(&metadata));
        header.set_mtime(mtime_secs(&metadata));
        builder
            .append_data(&mut header, entry_name(&add.to_path), data.as_slice())
            .map_err(|e| {
                LivepushError::Runtime(format!(
                    "failed to append {} to upload archive: {}",
                    add.to_path, e
                ))
            })?;
    }

    builder
        .into_inner()
        .map_err(|e| LivepushError::Runtime(format!("failed to finish upload archive: {}", e)))
}

/// Build a single-entry archive for a stage-copied file.
pub fn single_file_archive(dest: &str, mode: u32, data: &[u8]) -> LivepushResult<Vec<u8>> {
    if !util::is_absolute(dest) {
        return Err(LivepushError::Internal(format!(
            "stage copy resolved to a non-absolute destination: {}",
            dest
        )));
    }

    let mut builder = Builder::new(Vec::new());
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(now_secs());
    builder
        .append_data(&mut header, entry_name(dest), data)
        .map_err(|e| {
            LivepushError::Runtime(format!("failed to build stage-copy archive: {}", e))
        })?;

    builder
        .into_inner()
        .map_err(|e| LivepushError::Runtime(format!("failed to finish stage-copy archive: {}", e)))
}

/// Re-pack a downloaded stage archive for upload at the destination.
///
/// Entries that are neither regular files nor directories (links,
/// devices) are dropped: a dangling link crashes ingest on the
/// destination side. Entry names lose the leading source segment and
/// gain the destination prefix; mode and mtime are preserved.
pub fn repack_stage_archive(
    archive: &[u8],
    source: &str,
    dest: &str,
) -> LivepushResult<Vec<u8>> {
    let source_base = util::basename(source).to_string();
    let mut reader = Archive::new(archive);
    let mut builder = Builder::new(Vec::new());

    let entries = reader
        .entries()
        .map_err(|e| LivepushError::Runtime(format!("failed to read stage archive: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| LivepushError::Runtime(format!("bad stage archive entry: {}", e)))?;

        let entry_type = entry.header().entry_type();
        let is_dir = entry_type == EntryType::Directory;
        if !is_dir && entry_type != EntryType::Regular {
            tracing::debug!(kind = ?entry_type, "dropping non-file entry from stage archive");
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| LivepushError::Runtime(format!("bad stage archive path: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let renamed = rename_entry(&name, &source_base, dest);
        if renamed == "/" || renamed.is_empty() {
            continue;
        }

        let mode = entry.header().mode().unwrap_or(0o644);
        let mtime = entry.header().mtime().unwrap_or_else(|_| now_secs());

        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_mtime(mtime);

        if is_dir {
            header.set_size(0);
            builder
                .append_data(
                    &mut header,
                    format!("{}/", entry_name(&renamed)),
                    std::io::empty(),
                )
                .map_err(|e| {
                    LivepushError::Runtime(format!("failed to re-pack directory: {}", e))
                })?;
        } else {
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            header.set_size(data.len() as u64);
            builder
                .append_data(&mut header, entry_name(&renamed), data.as_slice())
                .map_err(|e| LivepushError::Runtime(format!("failed to re-pack file: {}", e)))?;
        }
    }

    builder
        .into_inner()
        .map_err(|e| LivepushError::Runtime(format!("failed to finish stage archive: {}", e)))
}

/// Rewrite an archive entry name into the destination layout.
fn rename_entry(name: &str, source_base: &str, dest: &str) -> String {
    let trimmed = name.trim_start_matches("./").trim_end_matches('/');
    let rest = match trimmed.strip_prefix(source_base) {
        Some(rest) => rest.trim_start_matches('/'),
        None => trimmed,
    };
    util::join(dest, rest)
}

fn entry_name(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0o644
    }
}

fn mtime_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or_else(now_secs, |d| d.as_secs())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn unpack(bytes: &[u8]) -> HashMap<String, (EntryType, Vec<u8>, u32)> {
        let mut out = HashMap::new();
        let mut archive = Archive::new(bytes);
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let kind = entry.header().entry_type();
            let mode = entry.header().mode().unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            out.insert(name, (kind, data, mode));
        }
        out
    }

    #[test]
    fn test_build_local_archive_roots_entries_at_slash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), b"contents").unwrap();

        let adds = vec![AddOperation {
            from_path: "a.ts".into(),
            to_path: "/b.ts".into(),
        }];
        let bytes = build_local_archive(dir.path(), &adds).unwrap();
        let entries = unpack(&bytes);

        assert_eq!(entries.len(), 1);
        let (kind, data, _) = &entries["b.ts"];
        assert_eq!(*kind, EntryType::Regular);
        assert_eq!(data, b"contents");
    }

    #[test]
    fn test_build_local_archive_skips_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        let adds = vec![AddOperation {
            from_path: "gone.ts".into(),
            to_path: "/gone.ts".into(),
        }];
        let bytes = build_local_archive(dir.path(), &adds).unwrap();
        assert!(unpack(&bytes).is_empty());
    }

    #[test]
    fn test_single_file_archive_requires_absolute_dest() {
        assert!(single_file_archive("relative/path", 0o644, b"x").is_err());
        let bytes = single_file_archive("/tmp/x", 0o755, b"x").unwrap();
        let entries = unpack(&bytes);
        let (_, data, mode) = &entries["tmp/x"];
        assert_eq!(data, b"x");
        assert_eq!(*mode, 0o755);
    }

    #[test]
    fn test_repack_renames_and_filters() {
        // Source archive as fetched for `/build/out`: names rooted at
        // the last source segment.
        let mut builder = Builder::new(Vec::new());

        let mut dir_header = Header::new_gnu();
        dir_header.set_entry_type(EntryType::Directory);
        dir_header.set_size(0);
        dir_header.set_mode(0o755);
        dir_header.set_mtime(1);
        builder
            .append_data(&mut dir_header, "out/", std::io::empty())
            .unwrap();

        let data = b"binary";
        let mut file_header = Header::new_gnu();
        file_header.set_entry_type(EntryType::Regular);
        file_header.set_size(data.len() as u64);
        file_header.set_mode(0o700);
        file_header.set_mtime(2);
        builder
            .append_data(&mut file_header, "out/app.bin", data.as_slice())
            .unwrap();

        let mut link_header = Header::new_gnu();
        link_header.set_entry_type(EntryType::Symlink);
        link_header.set_size(0);
        link_header.set_mode(0o777);
        link_header.set_mtime(3);
        builder
            .append_link(&mut link_header, "out/link", "app.bin")
            .unwrap();

        let source_archive = builder.into_inner().unwrap();
        let repacked = repack_stage_archive(&source_archive, "/build/out", "/srv").unwrap();
        let entries = unpack(&repacked);

        assert_eq!(entries.len(), 2, "symlink must be dropped: {:?}", entries.keys());
        assert!(entries.contains_key("srv/"));
        let (kind, data, mode) = &entries["srv/app.bin"];
        assert_eq!(*kind, EntryType::Regular);
        assert_eq!(data, b"binary");
        assert_eq!(*mode, 0o700);
    }
}
