//! Post-deployment probe of the generated config.

use tracing::{info, warn};
use uuid::Uuid;

use super::artifacts;
use super::stage::StageOutcome;
use super::Context;
use crate::error::DeployError;
use crate::prompt::Prompter;
use crate::status;
use crate::system::{CommandRunner, SystemCommand};

/// Runs a throwaway probe as the web user; the probe is always removed.
pub(crate) async fn verify<R: CommandRunner, P: Prompter>(ctx: &Context<'_, R, P>) -> Result<StageOutcome, DeployError> {
    let config = ctx.config;
    let probe = config
        .app_path()
        .join(format!(".deploy-probe-{}.php", Uuid::new_v4().simple()));

    ctx.files
        .write_text(&probe, &artifacts::probe(config), config.security.file_mode)
        .await?;

    let command = SystemCommand::new("php")
        .arg(probe.display().to_string())
        .as_user(config.web_user.clone());
    let result = ctx.runner.check(&command).await;

    if let Err(e) = ctx.files.remove_file(&probe).await {
        warn!(path = %probe.display(), error = %e, "Could not remove probe");
        status::warn(format!("Could not remove probe {}", probe.display()));
    }

    let output = result?;
    info!(output = %output.stdout.trim(), "Probe passed");
    status::ok(format!("Config loads as {}: {}", config.web_user, output.stdout.trim()));
    Ok(StageOutcome::Completed)
}
