//! Directory creation, file sync and permission fixing.
//!
//! Shared by the provisioning pipeline and the code-only updater.

use std::path::PathBuf;

use tracing::{info, warn};

use super::Context;
use crate::error::{DeployError, PreconditionError};
use crate::prompt::Prompter;
use crate::status;
use crate::system::files::mode_string;
use crate::system::CommandRunner;

/// Creates the app and log directories owned by the web user.
pub(crate) async fn setup_directories<R: CommandRunner, P: Prompter>(ctx: &Context<'_, R, P>) -> Result<(), DeployError> {
    let config = ctx.config;
    let mode = config.security.dir_mode;

    for dir in [config.app_path(), config.security.log_dir.clone()] {
        ctx.files.create_dir(&dir, mode).await?;
        ctx.files.chown(&dir, &config.web_user, &config.web_group).await?;
        status::ok(format!(
            "{} ({}:{}, {})",
            dir.display(),
            config.web_user,
            config.web_group,
            mode_string(mode)
        ));
    }
    Ok(())
}

/// Required files absent from the source directory.
pub(crate) fn missing_required<R, P>(ctx: &Context<'_, R, P>) -> Vec<String> {
    ctx.config
        .required_files
        .iter()
        .filter(|name| !ctx.config.source_dir.join(name).is_file())
        .cloned()
        .collect()
}

/// Copies required and present optional files into the app directory.
///
/// Every required file is checked before the first copy, so a missing one
/// leaves the destination untouched. Returns the destination paths.
pub(crate) async fn sync_files<R: CommandRunner, P: Prompter>(ctx: &Context<'_, R, P>) -> Result<Vec<PathBuf>, DeployError> {
    let config = ctx.config;

    let missing = missing_required(ctx);
    if !missing.is_empty() {
        return Err(PreconditionError::MissingSourceFiles {
            source_dir: config.source_dir.clone(),
            missing,
        }
        .into());
    }

    let mut names: Vec<&String> = config.required_files.iter().collect();
    for name in &config.optional_files {
        if config.source_dir.join(name).is_file() {
            names.push(name);
        } else {
            warn!(file = %name, source = %config.source_dir.display(), "Optional file not found");
            status::warn(format!("Optional file '{}' not found; skipped", name));
        }
    }

    let app_path = config.app_path();
    let mut copied = Vec::with_capacity(names.len());
    for name in names {
        let src = config.source_dir.join(name);
        let dest = app_path.join(name);
        ctx.files.copy_file(&src, &dest).await?;
        copied.push(dest);
    }

    info!(count = copied.len(), dest = %app_path.display(), "Files synced");
    status::ok(format!("Copied {} file(s) to {}", copied.len(), app_path.display()));
    Ok(copied)
}

/// Sets owner and file mode on every copied file.
pub(crate) async fn fix_permissions<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    copied: &[PathBuf],
) -> Result<(), DeployError> {
    let config = ctx.config;
    for path in copied {
        ctx.files.chown(path, &config.web_user, &config.web_group).await?;
        ctx.files.set_mode(path, config.security.file_mode).await?;
    }
    status::ok(format!(
        "{} file(s) set to {}:{} {}",
        copied.len(),
        config.web_user,
        config.web_group,
        mode_string(config.security.file_mode)
    ));
    Ok(())
}
