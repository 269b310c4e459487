//! Provisioning pipeline, code-only updates and the setup wizard.

pub mod artifacts;
pub mod backup;
pub mod journal;
pub mod pipeline;
pub mod setup;
pub mod stage;
pub mod update;

mod preflight;
mod runtime;
mod services;
mod sync;
mod verify;
mod web;

use std::path::Path;

use chrono::{DateTime, Local};

use crate::domain::EffectiveConfig;
use crate::error::DeployError;
use crate::prompt::{ConflictPolicy, Prompter};
use crate::status;
use crate::system::{CommandRunner, FileOps};
use journal::{Journal, UndoToken};

pub use pipeline::{Pipeline, PipelineOptions, PipelineReport};
pub use stage::{Mode, Stage, StageOutcome};
pub use update::{CodeOnlyUpdater, UpdateOptions, UpdateReport};

/// Everything a stage needs: the config and the injected capabilities.
pub struct Context<'a, R, P> {
    pub config: &'a EffectiveConfig,
    pub runner: &'a R,
    pub prompter: &'a P,
    pub policy: ConflictPolicy,
    pub files: FileOps<'a, R>,
    /// Timestamp stamped into every artifact of the run.
    pub now: DateTime<Local>,
}

impl<'a, R: CommandRunner, P: Prompter> Context<'a, R, P> {
    pub fn new(config: &'a EffectiveConfig, runner: &'a R, prompter: &'a P, policy: ConflictPolicy) -> Self {
        Self {
            config,
            runner,
            prompter,
            policy,
            files: FileOps::new(runner, config.use_sudo),
            now: Local::now(),
        }
    }
}

/// Result of a gated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The file existed and overwrite was declined.
    Kept,
}

/// Writes a generated artifact, asking the conflict policy first if the
/// file already exists, and records how to undo the write.
///
/// With `ask` false an existing file is replaced without consulting the
/// policy; callers use that for files this run already wrote.
pub async fn write_artifact<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    journal: &mut Journal,
    path: &Path,
    content: &str,
    mode: u32,
    ask: bool,
) -> Result<WriteOutcome, DeployError> {
    match ctx.files.read_text(path).await? {
        Some(prior) => {
            if ask && !ctx.policy.allows_overwrite(ctx.prompter, path)? {
                status::skip(format!("Kept existing {}", path.display()));
                return Ok(WriteOutcome::Kept);
            }
            ctx.files.write_text(path, content, mode).await?;
            journal.record(UndoToken::Replaced {
                path: path.to_path_buf(),
                prior,
                mode,
            });
        }
        None => {
            ctx.files.write_text(path, content, mode).await?;
            journal.record(UndoToken::Created(path.to_path_buf()));
        }
    }
    status::ok(format!("Wrote {}", path.display()));
    Ok(WriteOutcome::Written)
}
