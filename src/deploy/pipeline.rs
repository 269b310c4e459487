//! The ordered provisioning pipeline.

use std::path::PathBuf;

use tracing::{error, info, warn};

use super::journal::Journal;
use super::stage::{Mode, Stage, StageOutcome};
use super::{preflight, runtime, services, sync, verify, web, Context};
use crate::domain;
use crate::error::DeployError;
use crate::prompt::Prompter;
use crate::status;
use crate::system::{CommandRunner, WebServer};
use crate::validation::required_fields;

/// Switches for a pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Undo this run's artifact writes when a stage fails.
    pub rollback_on_failure: bool,
}

/// State carried from one stage to the next.
#[derive(Debug, Default)]
pub struct RunState {
    /// Files placed by FileSync.
    pub copied: Vec<PathBuf>,
    /// Server chosen by WebServerConfig.
    pub server: Option<WebServer>,
    /// Whether this run enabled the site.
    pub site_enabled: bool,
    pub journal: Journal,
}

/// What a completed run did.
#[derive(Debug)]
pub struct PipelineReport {
    pub mode: Mode,
    pub domain: String,
    pub outcomes: Vec<(Stage, StageOutcome)>,
    pub journal: Journal,
}

impl PipelineReport {
    /// Outcome of `stage`, if it was part of the run.
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|(s, _)| *s == stage).map(|(_, o)| o)
    }
}

/// Runs a mode's stages in order, stopping at the first failure.
pub struct Pipeline<'a, R, P> {
    ctx: Context<'a, R, P>,
    mode: Mode,
    options: PipelineOptions,
    state: RunState,
}

impl<'a, R: CommandRunner, P: Prompter> Pipeline<'a, R, P> {
    pub fn new(ctx: Context<'a, R, P>, mode: Mode, options: PipelineOptions) -> Self {
        Self {
            ctx,
            mode,
            options,
            state: RunState::default(),
        }
    }

    /// Validates the config, then runs every stage of the mode.
    ///
    /// Validation happens before any command runs. A failing stage aborts
    /// the rest and is reported as [`DeployError::StageFailed`].
    pub async fn run(mut self) -> Result<PipelineReport, DeployError> {
        let config = self.ctx.config;
        domain::validate(config, &required_fields(self.mode, config))?;

        let stages = self.mode.stages();
        let total = stages.len();
        let mut outcomes = Vec::with_capacity(total);

        info!(mode = %self.mode, domain = %config.domain, stages = total, "Starting pipeline");

        for (index, stage) in stages.iter().copied().enumerate() {
            status::stage_start(index + 1, total, stage);

            if !stage.is_enabled(config) {
                status::skip("Disabled in configuration");
                outcomes.push((stage, StageOutcome::Skipped("disabled".to_string())));
                continue;
            }

            match self.run_stage(stage).await {
                Ok(outcome) => {
                    if let StageOutcome::Skipped(reason) = &outcome {
                        status::warn(reason);
                    }
                    info!(stage = %stage, outcome = ?outcome, "Stage finished");
                    outcomes.push((stage, outcome));
                }
                Err(e) => {
                    error!(stage = %stage, error = %e, "Stage failed");
                    status::error(format!("{} failed", stage));
                    if self.options.rollback_on_failure && !self.state.journal.is_empty() {
                        let undone = self.state.journal.rollback(&self.ctx.files).await;
                        warn!(undone, "Rolled back artifacts written by this run");
                        status::warn(format!("Rolled back {} artifact write(s)", undone));
                    }
                    return Err(DeployError::StageFailed {
                        stage,
                        source: Box::new(e),
                    });
                }
            }
        }

        status::line(format!("Deployment of {} complete ({})", config.domain, self.mode));
        Ok(PipelineReport {
            mode: self.mode,
            domain: config.domain.clone(),
            outcomes,
            journal: self.state.journal,
        })
    }

    async fn run_stage(&mut self, stage: Stage) -> Result<StageOutcome, DeployError> {
        let ctx = &self.ctx;
        let state = &mut self.state;

        match stage {
            Stage::Preflight => preflight::run(ctx).await,
            Stage::DirectorySetup => {
                sync::setup_directories(ctx).await?;
                Ok(StageOutcome::Completed)
            }
            Stage::FileSync => {
                state.copied = sync::sync_files(ctx).await?;
                Ok(StageOutcome::Completed)
            }
            Stage::PermissionFix => {
                sync::fix_permissions(ctx, &state.copied).await?;
                Ok(StageOutcome::Completed)
            }
            Stage::ConfigGeneration => runtime::generate(ctx, &mut state.journal).await,
            Stage::WebServerConfig => web::configure(ctx, state).await,
            Stage::LogRotationSetup => services::log_rotation(ctx, state).await,
            Stage::ServiceSetup => services::service(ctx, state).await,
            Stage::TlsSetup => web::secure(ctx, state).await,
            Stage::Verification => verify::verify(ctx).await,
        }
    }
}
