//! Code-only updates with snapshot and rollback.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::backup::{self, Snapshot};
use super::stage::{Mode, Stage};
use super::{sync, Context};
use crate::domain;
use crate::error::{DeployError, PreconditionError};
use crate::prompt::Prompter;
use crate::status;
use crate::system::{CommandRunner, SystemCommand};
use crate::validation::required_fields;

/// Switches for an update run.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Skip the snapshot even when backups are enabled.
    pub no_backup: bool,
}

/// What a successful update did.
#[derive(Debug)]
pub struct UpdateReport {
    pub domain: String,
    pub synced: Vec<PathBuf>,
    /// Where the kept snapshot lives, directory or archive.
    pub snapshot: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
}

/// A file that failed `php -l`, with the checker's output.
#[derive(Debug, Clone)]
pub struct SyntaxFailure {
    pub path: PathBuf,
    pub output: String,
}

/// Refreshes application files in an existing deployment.
pub struct CodeOnlyUpdater<'a, R, P> {
    ctx: Context<'a, R, P>,
    options: UpdateOptions,
}

impl<'a, R: CommandRunner, P: Prompter> CodeOnlyUpdater<'a, R, P> {
    pub fn new(ctx: Context<'a, R, P>, options: UpdateOptions) -> Self {
        Self { ctx, options }
    }

    /// Runs the update. Any failure after the snapshot restores it.
    pub async fn run(self) -> Result<UpdateReport, DeployError> {
        let ctx = &self.ctx;
        let config = ctx.config;
        domain::validate(config, &required_fields(Mode::Update, config))?;

        let app_path = config.app_path();
        if !ctx.files.exists(&app_path).await? {
            return Err(PreconditionError::AppDirMissing { path: app_path }.into());
        }

        let missing = sync::missing_required(ctx);
        if !missing.is_empty() {
            return Err(PreconditionError::MissingSourceFiles {
                source_dir: config.source_dir.clone(),
                missing,
            }
            .into());
        }

        info!(domain = %config.domain, path = %app_path.display(), "Starting code-only update");
        let snapshot = self.take_snapshot(&app_path).await?;

        let synced = match self.sync(&app_path).await {
            Ok(synced) => synced,
            Err(e) => {
                if let Some(snapshot) = &snapshot {
                    error!(error = %e, "Sync failed; restoring snapshot");
                    backup::restore(&ctx.files, snapshot, &app_path).await?;
                    status::warn(format!("Restored {}", snapshot.path.display()));
                }
                return Err(e);
            }
        };

        status::line("Syntax check");
        let failures = lint(ctx.runner, &synced).await?;
        if !failures.is_empty() {
            for failure in &failures {
                status::error(format!("{}: {}", failure.path.display(), failure.output));
            }
            return Err(self.roll_back(snapshot, &app_path, failures.len()).await);
        }
        status::ok(format!("{} file(s) pass php -l", synced.iter().filter(|p| is_php(p)).count()));

        let (kept, pruned) = match snapshot {
            Some(snapshot) => self.finish_snapshot(snapshot).await?,
            None => (None, Vec::new()),
        };

        status::line(format!("Update of {} complete", config.domain));
        Ok(UpdateReport {
            domain: config.domain.clone(),
            synced,
            snapshot: kept,
            pruned,
        })
    }

    async fn take_snapshot(&self, app_path: &Path) -> Result<Option<Snapshot>, DeployError> {
        let config = self.ctx.config;
        status::line("Backup");

        let backup_dir = match (config.backup.enabled, self.options.no_backup, config.backup.dir.as_deref()) {
            (true, false, Some(dir)) => dir,
            (true, true, _) => {
                status::warn("Backup skipped (--no-backup); a failed update cannot be rolled back");
                return Ok(None);
            }
            _ => {
                status::warn("Backups are disabled; a failed update cannot be rolled back");
                return Ok(None);
            }
        };

        let snapshot = backup::create(
            &self.ctx.files,
            app_path,
            backup_dir,
            config.security.dir_mode,
            &self.ctx.now,
        )
        .await?;
        if snapshot.empty {
            status::skip(format!("{} is empty; nothing to back up", app_path.display()));
        } else {
            status::ok(format!("Snapshot {}", snapshot.path.display()));
        }
        Ok(Some(snapshot))
    }

    async fn sync(&self, app_path: &Path) -> Result<Vec<PathBuf>, DeployError> {
        let stages = Mode::Update.stages();
        status::stage_start(1, stages.len(), Stage::FileSync);
        let synced = sync::sync_files(&self.ctx).await?;
        status::stage_start(2, stages.len(), Stage::PermissionFix);
        sync::fix_permissions(&self.ctx, &synced).await?;
        info!(count = synced.len(), path = %app_path.display(), "Update files placed");
        Ok(synced)
    }

    async fn roll_back(&self, snapshot: Option<Snapshot>, app_path: &Path, failed: usize) -> DeployError {
        match snapshot {
            Some(snapshot) => {
                warn!(failed, snapshot = %snapshot.path.display(), "Syntax check failed; restoring snapshot");
                if let Err(e) = backup::restore(&self.ctx.files, &snapshot, app_path).await {
                    return e;
                }
                status::warn(format!("Restored {}", snapshot.path.display()));
                DeployError::UpdateRolledBack {
                    failed,
                    snapshot: snapshot.path,
                }
            }
            None => {
                warn!(failed, "Syntax check failed and no snapshot exists");
                status::warn("No backup snapshot exists; deployed files were left as synced. Fix forward and update again");
                DeployError::UpdateFailedNoBackup { failed }
            }
        }
    }

    /// Offers to delete the snapshot, compresses it if kept, then prunes.
    async fn finish_snapshot(&self, snapshot: Snapshot) -> Result<(Option<PathBuf>, Vec<PathBuf>), DeployError> {
        let ctx = &self.ctx;
        let config = ctx.config;

        let kept = if snapshot.empty {
            None
        } else if ctx.policy.allows_snapshot_delete(ctx.prompter, &snapshot.path)? {
            backup::delete(&ctx.files, &snapshot).await?;
            status::ok(format!("Deleted {}", snapshot.path.display()));
            None
        } else if config.backup.compress {
            let archive = backup::compress(ctx.runner, &ctx.files, &snapshot).await?;
            status::ok(format!("Kept {}", archive.display()));
            Some(archive)
        } else {
            status::ok(format!("Kept {}", snapshot.path.display()));
            Some(snapshot.path.clone())
        };

        let pruned = match config.backup.dir.as_deref() {
            Some(dir) => {
                let current = if snapshot.empty { None } else { Some(snapshot.path.as_path()) };
                backup::prune(&ctx.files, dir, config.backup.retention_days, current, &ctx.now).await?
            }
            None => Vec::new(),
        };
        for path in &pruned {
            status::ok(format!("Pruned {}", path.display()));
        }

        Ok((kept, pruned))
    }
}

fn is_php(path: &Path) -> bool {
    path.extension().map(|e| e == "php").unwrap_or(false)
}

/// Runs `php -l` on every PHP file in `files`.
pub async fn lint<R: CommandRunner>(runner: &R, files: &[PathBuf]) -> Result<Vec<SyntaxFailure>, DeployError> {
    let mut failures = Vec::new();
    for path in files.iter().filter(|p| is_php(p)) {
        let output = runner
            .run(&SystemCommand::new("php").arg("-l").arg(path.display().to_string()))
            .await?;
        if !output.success() {
            failures.push(SyntaxFailure {
                path: path.clone(),
                output: output.diagnostics(),
            });
        }
    }
    Ok(failures)
}
