//! Generation of the application's runtime config.

use tracing::{debug, info, warn};

use super::artifacts::{self, TemplateSource};
use super::journal::Journal;
use super::stage::StageOutcome;
use super::{write_artifact, Context};
use crate::error::DeployError;
use crate::prompt::Prompter;
use crate::status;
use crate::system::{CommandRunner, SystemCommand};
use crate::template;

async fn host_name<R: CommandRunner>(runner: &R) -> String {
    match runner.run(&SystemCommand::new("hostname")).await {
        Ok(out) if out.success() && !out.stdout.trim().is_empty() => out.stdout.trim().to_string(),
        Ok(out) => {
            debug!(code = out.code, "hostname returned nothing usable");
            "localhost".to_string()
        }
        Err(e) => {
            debug!(error = %e, "hostname unavailable");
            "localhost".to_string()
        }
    }
}

pub(crate) async fn generate<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    journal: &mut Journal,
) -> Result<StageOutcome, DeployError> {
    let config = ctx.config;
    let path = config.config_path();

    if ctx.files.exists(&path).await? && !ctx.policy.allows_overwrite(ctx.prompter, &path)? {
        status::skip(format!("Kept existing {}", path.display()));
        return Ok(StageOutcome::Kept);
    }

    let (text, source) = artifacts::runtime_template(config)?;
    match &source {
        TemplateSource::Configured(p) | TemplateSource::SourceDir(p) => {
            info!(template = %p.display(), "Using runtime config template")
        }
        TemplateSource::Builtin => info!("Using built-in runtime config template"),
    }

    let api_key = ctx.prompter.secret("API key (leave blank for demo)")?;
    if api_key.trim().is_empty() {
        status::warn(format!("No API key given; using '{}'", artifacts::DEMO_API_KEY));
    }

    let host = host_name(ctx.runner).await;
    let bindings = artifacts::runtime_bindings(config, &api_key, &host, &ctx.now);

    let unbound = template::unbound(&text, &bindings);
    if !unbound.is_empty() {
        warn!(placeholders = ?unbound, "Template placeholders left unbound");
        status::warn(format!("Unbound placeholders left in config: {}", unbound.join(", ")));
    }

    if config.uses_secure_config() {
        let dir = config.config_dir();
        ctx.files.create_dir(&dir, config.security.dir_mode).await?;
        ctx.files.chown(&dir, &config.web_user, &config.web_group).await?;
    }

    let rendered = template::render(&text, &bindings);
    write_artifact(ctx, journal, &path, &rendered, config.config_mode(), false).await?;
    ctx.files.chown(&path, &config.web_user, &config.web_group).await?;

    Ok(StageOutcome::Completed)
}
