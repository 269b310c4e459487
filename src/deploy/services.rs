//! Log rotation rule and marker service unit.

use tracing::{debug, info};

use super::artifacts;
use super::pipeline::RunState;
use super::stage::StageOutcome;
use super::{write_artifact, Context, WriteOutcome};
use crate::error::DeployError;
use crate::prompt::Prompter;
use crate::status;
use crate::system::webserver;
use crate::system::{CommandRunner, SystemCommand};

const UNIT_MODE: u32 = 0o644;

/// Writes the logrotate rule for the app's log directory.
pub(crate) async fn log_rotation<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    state: &mut RunState,
) -> Result<StageOutcome, DeployError> {
    let config = ctx.config;
    let Some(path) = config.logrotate.file.as_deref() else {
        return Ok(StageOutcome::Skipped("No logrotate file configured".to_string()));
    };

    let server = match state.server {
        Some(server) => Some(server),
        None => webserver::detect(ctx.runner).await?.chosen(),
    };
    let reload = server
        .map(|s| s.reload_line())
        .unwrap_or_else(|| "/bin/true".to_string());

    let text = artifacts::logrotate(config, &reload, &ctx.now);
    match write_artifact(ctx, &mut state.journal, path, &text, UNIT_MODE, true).await? {
        WriteOutcome::Written => Ok(StageOutcome::Completed),
        WriteOutcome::Kept => Ok(StageOutcome::Kept),
    }
}

async fn systemctl_ok<R: CommandRunner>(runner: &R, verb: &str, unit: &str) -> Result<bool, DeployError> {
    let out = runner
        .run(&SystemCommand::new("systemctl").args([verb, "--quiet", unit]))
        .await?;
    Ok(out.success())
}

/// Writes the marker unit and its environment file, then enables and starts it.
pub(crate) async fn service<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    state: &mut RunState,
) -> Result<StageOutcome, DeployError> {
    let config = ctx.config;
    let (Some(unit_file), Some(env_file), Some(unit)) = (
        config.service.service_file.as_deref(),
        config.service.env_file.as_deref(),
        config.service_name(),
    ) else {
        return Ok(StageOutcome::Skipped("Service or environment file not configured".to_string()));
    };

    let web_service = state
        .server
        .map(|s| s.service())
        .unwrap_or("apache2");

    let env_text = artifacts::service_env(config, &ctx.now);
    let env_outcome = write_artifact(ctx, &mut state.journal, env_file, &env_text, UNIT_MODE, true).await?;

    let unit_text = artifacts::service_unit(config, web_service, env_file, &ctx.now);
    let unit_outcome = write_artifact(ctx, &mut state.journal, unit_file, &unit_text, UNIT_MODE, true).await?;

    if unit_outcome == WriteOutcome::Written {
        ctx.runner
            .check(&SystemCommand::new("systemctl").arg("daemon-reload").privileged())
            .await?;
    }

    if systemctl_ok(ctx.runner, "is-enabled", &unit).await? {
        status::ok(format!("{} already enabled", unit));
    } else {
        ctx.runner
            .check(&SystemCommand::new("systemctl").args(["enable", unit.as_str()]).privileged())
            .await?;
        status::ok(format!("Enabled {}", unit));
    }

    if systemctl_ok(ctx.runner, "is-active", &unit).await? {
        debug!(unit = %unit, "Unit already active");
        status::ok(format!("{} already running", unit));
    } else {
        ctx.runner
            .check(&SystemCommand::new("systemctl").args(["start", unit.as_str()]).privileged())
            .await?;
        info!(unit = %unit, "Unit started");
        status::ok(format!("Started {}", unit));
    }

    if env_outcome == WriteOutcome::Kept && unit_outcome == WriteOutcome::Kept {
        return Ok(StageOutcome::Kept);
    }
    Ok(StageOutcome::Completed)
}
