// src/exec/backup.rs

//! Pre-run backup of the triggering file.
//!
//! The copy lands atomically: bytes go to a temporary name inside the
//! destination directory first, then a rename moves them into place, so a
//! reader of the destination path never observes a half-written file.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::debug;

use crate::engine::{RunFailure, Trigger};
use crate::rules::CommandTemplate;

/// Copy the triggering file to the destination the backup template renders
/// to. Relative destinations are resolved against the watch root. Returns
/// the final destination path.
pub async fn backup_file(
    template: &CommandTemplate,
    trigger: &Trigger,
    run_id: u64,
    watch_root: &Path,
) -> Result<PathBuf, RunFailure> {
    let Some(source) = trigger.path.as_deref() else {
        return Err(RunFailure::Backup(
            "no triggering file to back up".to_string(),
        ));
    };

    let rendered = template
        .render(&trigger.captures, Some(source))
        .map_err(RunFailure::Template)?;

    let mut dest = PathBuf::from(&rendered);
    if dest.is_relative() {
        dest = watch_root.join(dest);
    }

    match copy_atomic(source, &dest, run_id).await {
        Ok(()) => Ok(dest),
        Err(err) => Err(RunFailure::Backup(format!("{err:#}"))),
    }
}

async fn copy_atomic(source: &Path, dest: &Path, run_id: u64) -> anyhow::Result<()> {
    let Some(file_name) = dest.file_name() else {
        bail!("backup destination {} has no file name", dest.display());
    };
    let dir = match dest.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating backup directory {}", dir.display()))?;

    // Temp file lives in the destination directory so the rename cannot
    // cross filesystems. The run id keeps concurrent backups apart.
    let tmp = dir.join(format!(".{}.tmp-{run_id}", file_name.to_string_lossy()));

    if let Err(err) = tokio::fs::copy(source, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err).with_context(|| {
            format!("copying {} to {}", source.display(), tmp.display())
        });
    }

    if let Err(err) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err).with_context(|| {
            format!("renaming {} into place at {}", tmp.display(), dest.display())
        });
    }

    debug!(source = %source.display(), dest = %dest.display(), "backup written");
    Ok(())
}
