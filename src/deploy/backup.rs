//! Timestamped snapshots of the deployed directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::DeployError;
use crate::system::{CommandRunner, FileOps, SystemCommand};

/// Format of snapshot directory names.
pub const SNAPSHOT_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A copy of the app directory taken before an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Snapshot directory. Not created for an empty snapshot.
    pub path: PathBuf,
    /// Digest of the app directory at snapshot time.
    pub digest: String,
    /// The app directory was empty; restoring just clears it.
    pub empty: bool,
}

/// SHA-256 over every relative path and file content under `root`, in
/// sorted order.
pub fn tree_digest(root: &Path) -> Result<String, DeployError> {
    let mut hasher = Sha256::new();

    if !root.exists() {
        return Ok(hex::encode(hasher.finalize()));
    }

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| DeployError::io(root, e.into()))?;
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let kind: &[u8] = if entry.file_type().is_dir() { b"d" } else { b"f" };

        hasher.update(kind);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);

        if entry.file_type().is_file() {
            let bytes = std::fs::read(entry.path()).map_err(|e| DeployError::io(entry.path(), e))?;
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

fn is_empty_dir(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

async fn unique_target<R: CommandRunner>(files: &FileOps<'_, R>, backup_dir: &Path, name: &str) -> Result<PathBuf, DeployError> {
    let mut target = backup_dir.join(name);
    let mut suffix = 1;
    while files.exists(&target).await? || files.exists(&archive_path(&target)).await? {
        target = backup_dir.join(format!("{}_{}", name, suffix));
        suffix += 1;
    }
    Ok(target)
}

/// Copies `app_path` into a new timestamped directory under `backup_dir`.
pub async fn create<R: CommandRunner>(
    files: &FileOps<'_, R>,
    app_path: &Path,
    backup_dir: &Path,
    dir_mode: u32,
    now: &DateTime<Local>,
) -> Result<Snapshot, DeployError> {
    let name = now.format(SNAPSHOT_FORMAT).to_string();
    let digest = tree_digest(app_path)?;

    if is_empty_dir(app_path) {
        info!(path = %app_path.display(), "Nothing to back up");
        return Ok(Snapshot {
            path: backup_dir.join(name),
            digest,
            empty: true,
        });
    }

    files.create_dir(backup_dir, dir_mode).await?;
    let target = unique_target(files, backup_dir, &name).await?;
    files.copy_tree(app_path, &target).await?;

    info!(snapshot = %target.display(), digest = %digest, "Backup snapshot created");
    Ok(Snapshot {
        path: target,
        digest,
        empty: false,
    })
}

/// Replaces the contents of `app_path` with the snapshot and verifies the
/// result against the snapshot digest.
pub async fn restore<R: CommandRunner>(files: &FileOps<'_, R>, snapshot: &Snapshot, app_path: &Path) -> Result<(), DeployError> {
    files.clear_dir(app_path).await?;
    if !snapshot.empty {
        files.copy_tree(&snapshot.path, app_path).await?;
    }

    let actual = tree_digest(app_path)?;
    if actual != snapshot.digest {
        return Err(DeployError::RestoreMismatch {
            path: app_path.to_path_buf(),
            expected: snapshot.digest.clone(),
            actual,
        });
    }

    info!(snapshot = %snapshot.path.display(), path = %app_path.display(), "Snapshot restored");
    Ok(())
}

/// Deletes the snapshot directory.
pub async fn delete<R: CommandRunner>(files: &FileOps<'_, R>, snapshot: &Snapshot) -> Result<(), DeployError> {
    if !snapshot.empty {
        files.remove_dir(&snapshot.path).await?;
    }
    Ok(())
}

fn archive_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tar.gz");
    dir.with_file_name(name)
}

/// Packs the snapshot into `<name>.tar.gz` next to it and removes the directory.
pub async fn compress<R: CommandRunner>(
    runner: &R,
    files: &FileOps<'_, R>,
    snapshot: &Snapshot,
) -> Result<PathBuf, DeployError> {
    let archive = archive_path(&snapshot.path);
    let parent = snapshot.path.parent().unwrap_or(Path::new("."));
    let name = snapshot
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tar = SystemCommand::new("tar")
        .arg("-czf")
        .arg(archive.display().to_string())
        .arg("-C")
        .arg(parent.display().to_string())
        .arg(name);
    if files.escalates() {
        tar = tar.privileged();
    }
    runner.check(&tar).await?;
    files.remove_dir(&snapshot.path).await?;

    info!(archive = %archive.display(), "Snapshot compressed");
    Ok(archive)
}

/// Timestamp encoded in a snapshot directory or archive name.
pub fn snapshot_time(name: &str) -> Option<NaiveDateTime> {
    let stem = name.strip_suffix(".tar.gz").unwrap_or(name);
    let stamp = stem.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_FORMAT).ok()
}

/// Removes snapshots older than `retention_days`, never touching `keep` or
/// its archive. Entries that are not snapshots are left alone.
pub async fn prune<R: CommandRunner>(
    files: &FileOps<'_, R>,
    backup_dir: &Path,
    retention_days: u32,
    keep: Option<&Path>,
    now: &DateTime<Local>,
) -> Result<Vec<PathBuf>, DeployError> {
    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DeployError::io(backup_dir, e)),
    };

    let cutoff = now.naive_local() - Duration::days(i64::from(retention_days));
    let protected: Vec<PathBuf> = keep.map(|k| vec![k.to_path_buf(), archive_path(k)]).unwrap_or_default();

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DeployError::io(backup_dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        let Some(taken) = snapshot_time(&name) else {
            debug!(entry = %name, "Not a snapshot; skipped");
            continue;
        };
        if taken >= cutoff || protected.contains(&path) {
            continue;
        }

        let result = if path.is_dir() {
            files.remove_dir(&path).await
        } else {
            files.remove_file(&path).await
        };
        match result {
            Ok(()) => {
                info!(snapshot = %path.display(), "Pruned expired snapshot");
                removed.push(path);
            }
            Err(e) => warn!(snapshot = %path.display(), error = %e, "Could not prune snapshot"),
        }
    }

    removed.sort();
    Ok(removed)
}
