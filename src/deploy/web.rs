//! Web server virtual host and TLS stages.

use std::path::Path;

use tracing::{info, warn};

use super::artifacts;
use super::pipeline::RunState;
use super::stage::StageOutcome;
use super::{write_artifact, Context, WriteOutcome};
use crate::error::DeployError;
use crate::prompt::Prompter;
use crate::status;
use crate::system::webserver::{self, WebServer};
use crate::system::{CommandRunner, SystemCommand};

/// Directive that enables the OCSP stapling cache globally.
pub(crate) const STAPLING_CACHE: &str = "SSLStaplingCache shmcb:/var/run/ocsp(128000)";

/// Mode of generated web server config files.
const CONFIG_MODE: u32 = 0o644;

async fn certificate_present<R: CommandRunner, P: Prompter>(ctx: &Context<'_, R, P>) -> Result<bool, DeployError> {
    let cert = ctx.config.certificate_dir().join("fullchain.pem");
    let out = ctx
        .runner
        .run(&SystemCommand::new("test").arg("-f").arg(cert.display().to_string()).privileged())
        .await?;
    Ok(out.success())
}

async fn active_server<R: CommandRunner>(runner: &R) -> Result<Option<WebServer>, DeployError> {
    let detection = webserver::detect(runner).await?;
    if detection.ambiguous() {
        warn!("Both Apache and Nginx are active");
        status::warn("Both Apache and Nginx are active; configuring Apache");
    }
    Ok(detection.chosen())
}

/// Writes the virtual host, checks syntax, enables the site and reloads.
pub(crate) async fn configure<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    state: &mut RunState,
) -> Result<StageOutcome, DeployError> {
    let config = ctx.config;

    let server = match active_server(ctx.runner).await? {
        Some(server) => server,
        None => {
            warn!("No active web server detected");
            return Ok(StageOutcome::Skipped(
                "No active web server detected; configure the virtual host manually".to_string(),
            ));
        }
    };
    state.server = Some(server);
    status::ok(format!("Detected {}", server));

    let settings = server.settings(config);
    let tls = config.ssl.enabled && certificate_present(ctx).await?;
    if config.ssl.enabled && !tls {
        info!(domain = %config.domain, "No certificate yet; writing HTTP virtual host");
    }

    let text = artifacts::vhost(config, server, tls, &ctx.now);
    if write_artifact(ctx, &mut state.journal, &settings.config_file, &text, CONFIG_MODE, true).await?
        == WriteOutcome::Kept
    {
        return Ok(StageOutcome::Kept);
    }

    webserver::enable_vhost_modules(ctx.runner, server, settings, tls).await?;
    webserver::syntax_check(ctx.runner, server).await?;
    status::ok(format!("{} configuration syntax OK", server));
    webserver::enable_site(ctx.runner, &ctx.files, server, settings).await?;
    state.site_enabled = true;
    webserver::reload(ctx.runner, server).await?;
    status::ok(format!("{} reloaded", server));

    Ok(StageOutcome::Completed)
}

async fn enable_global_conf<R: CommandRunner>(runner: &R, path: &Path) -> Result<(), DeployError> {
    let in_conf_available = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n == "conf-available")
        .unwrap_or(false);
    if let (true, Some(stem)) = (in_conf_available, path.file_stem()) {
        runner
            .check(
                &SystemCommand::new("a2enconf")
                    .arg(stem.to_string_lossy().into_owned())
                    .privileged(),
            )
            .await?;
    }
    Ok(())
}

/// Appends the stapling cache directive unless it is already present.
async fn ensure_stapling_cache<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    state: &mut RunState,
) -> Result<(), DeployError> {
    let path = &ctx.config.apache_global_config;
    let existing = ctx.files.read_text(path).await?.unwrap_or_default();

    if existing.contains("SSLStaplingCache") {
        status::ok(format!("OCSP stapling cache already set in {}", path.display()));
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(STAPLING_CACHE);
    content.push('\n');

    write_artifact(ctx, &mut state.journal, path, &content, CONFIG_MODE, false).await?;
    enable_global_conf(ctx.runner, path).await
}

fn certbot_command<R, P>(ctx: &Context<'_, R, P>) -> SystemCommand {
    let config = ctx.config;
    let mut cmd = SystemCommand::new("certbot")
        .args(["certonly", "--webroot", "-w"])
        .arg(config.app_path().display().to_string())
        .args(["-d", config.domain.as_str()]);
    for alt in &config.ssl.alt_domains {
        cmd = cmd.args(["-d", alt.as_str()]);
    }
    cmd.arg("--email")
        .arg(config.ssl.email.clone().unwrap_or_default())
        .args(["--agree-tos", "--non-interactive", "--keep-until-expiring"])
        .privileged()
}

/// Enables the TLS modules, obtains the certificate and switches the virtual
/// host to its TLS variant.
pub(crate) async fn secure<R: CommandRunner, P: Prompter>(
    ctx: &Context<'_, R, P>,
    state: &mut RunState,
) -> Result<StageOutcome, DeployError> {
    let config = ctx.config;

    let server = match state.server {
        Some(server) => server,
        None => match active_server(ctx.runner).await? {
            Some(server) => server,
            None => {
                return Ok(StageOutcome::Skipped(
                    "No active web server detected; certificate not requested".to_string(),
                ))
            }
        },
    };

    webserver::enable_vhost_modules(ctx.runner, server, server.settings(config), true).await?;
    if server == WebServer::Apache {
        ensure_stapling_cache(ctx, state).await?;
    }

    let certbot = certbot_command(ctx);
    info!(cmd = %certbot, "Requesting certificate");
    ctx.runner.check(&certbot).await?;
    status::ok(format!(
        "Certificate issued for {}",
        std::iter::once(&config.domain)
            .chain(config.ssl.alt_domains.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let settings = server.settings(config);
    let ask = !state.journal.wrote(&settings.config_file);
    let text = artifacts::vhost(config, server, true, &ctx.now);
    if write_artifact(ctx, &mut state.journal, &settings.config_file, &text, CONFIG_MODE, ask).await?
        == WriteOutcome::Kept
    {
        status::warn("Certificate is installed but the virtual host was kept; enable TLS in it manually");
        return Ok(StageOutcome::Kept);
    }

    webserver::syntax_check(ctx.runner, server).await?;
    if !state.site_enabled {
        webserver::enable_site(ctx.runner, &ctx.files, server, settings).await?;
        state.site_enabled = true;
    }
    webserver::reload(ctx.runner, server).await?;
    status::ok(format!("{} serving {} over TLS", server, config.domain));

    Ok(StageOutcome::Completed)
}
