//! Copying a path from one stage's container into another's.
//!
//! Directory copies travel as a fetched archive that is re-packed for
//! the destination layout; file copies read content and mode through
//! `cat`/`stat` and travel as a single-entry archive. Both finish with
//! an upload rooted at `/` on the destination.

use crate::container::{archive, Container};
use crate::errors::{LivepushError, LivepushResult};
use crate::recipe::groups::StageCopy;
use crate::util;

/// Execute one stage copy from `source` into `dest`.
pub(crate) async fn copy_between(
    source: &Container,
    dest: &Container,
    copy: &StageCopy,
) -> LivepushResult<()> {
    if !source.check_running().await? {
        return Err(LivepushError::ContainerNotRunning(
            source.container_id().to_string(),
        ));
    }

    tracing::debug!(
        from_stage = source.stage_index(),
        to_stage = dest.stage_index(),
        source_path = %copy.source,
        dest_path = %copy.dest,
        "stage copy"
    );

    if source.path_is_directory(&copy.source).await? {
        copy_directory(source, dest, copy).await
    } else {
        copy_file(source, dest, copy).await
    }
}

async fn copy_directory(
    source: &Container,
    dest: &Container,
    copy: &StageCopy,
) -> LivepushResult<()> {
    let dest_path = copy.dest.trim_end_matches('/');
    let dest_is_dir = copy.dest.ends_with('/') || dest.path_is_directory(dest_path).await?;
    if !dest_is_dir {
        return Err(LivepushError::Internal(format!(
            "cannot copy directory {} into file destination {}",
            copy.source, copy.dest
        )));
    }

    let fetched = source
        .runtime()
        .get_archive(source.container_id(), &copy.source)
        .await?;
    let repacked = archive::repack_stage_archive(&fetched, &copy.source, dest_path)?;
    dest.runtime()
        .put_archive(dest.container_id(), "/", repacked)
        .await
}

async fn copy_file(
    source: &Container,
    dest: &Container,
    copy: &StageCopy,
) -> LivepushResult<()> {
    let (code, data) = source
        .exec_capture(vec!["cat".into(), copy.source.clone()])
        .await?;
    if code != 0 {
        return Err(LivepushError::Runtime(format!(
            "failed to read {} from stage {} container",
            copy.source, copy.source_stage
        )));
    }
    let mode = file_mode(source, &copy.source).await?;

    let dest_is_dir =
        copy.dest.ends_with('/') || dest.path_is_directory(&copy.dest).await?;
    let final_dest = if dest_is_dir {
        util::join(
            copy.dest.trim_end_matches('/'),
            util::basename(&copy.source),
        )
    } else {
        util::normalize(&copy.dest)
    };

    let tarball = archive::single_file_archive(&final_dest, mode, &data)?;
    dest.runtime()
        .put_archive(dest.container_id(), "/", tarball)
        .await
}

/// File mode via `stat -c %a`; falls back to 0644 when stat is absent.
async fn file_mode(container: &Container, path: &str) -> LivepushResult<u32> {
    let (code, output) = container
        .exec_capture(vec![
            "stat".into(),
            "-c".into(),
            "%a".into(),
            path.to_string(),
        ])
        .await?;
    if code != 0 {
        tracing::warn!(path = %path, code, "stat failed, defaulting file mode");
        return Ok(0o644);
    }
    let text = String::from_utf8_lossy(&output);
    u32::from_str_radix(text.trim(), 8).map_err(|e| {
        LivepushError::Runtime(format!("unparseable stat output {:?}: {}", text.trim(), e))
    })
}
