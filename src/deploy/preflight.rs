//! Identity, tool and PHP capability checks.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::stage::StageOutcome;
use super::Context;
use crate::error::{DeployError, PreconditionError};
use crate::prompt::Prompter;
use crate::status;
use crate::system::{CommandRunner, SystemCommand, WebServer};

/// Parses a dotted version into its numeric components.
pub(crate) fn version_parts(version: &str) -> Vec<u32> {
    version
        .trim()
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

/// Returns true if `actual` is at least `minimum`.
pub(crate) fn version_at_least(actual: &str, minimum: &str) -> bool {
    let mut a = version_parts(actual);
    let mut m = version_parts(minimum);
    let len = a.len().max(m.len());
    a.resize(len, 0);
    m.resize(len, 0);
    a >= m
}

/// Module names from `php -m` output, lowercased.
pub(crate) fn loaded_modules(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('['))
        .map(str::to_lowercase)
        .collect()
}

pub(crate) async fn run<R: CommandRunner, P: Prompter>(ctx: &Context<'_, R, P>) -> Result<StageOutcome, DeployError> {
    let config = ctx.config;

    let uid = ctx.runner.check(&SystemCommand::new("id").arg("-u")).await?;
    if uid.stdout.trim() == "0" {
        return Err(PreconditionError::RunningAsRoot.into());
    }

    let mut servers = Vec::new();
    for server in [WebServer::Apache, WebServer::Nginx] {
        if ctx.runner.has_tool(server.binary()).await? {
            servers.push(server);
        }
    }
    if servers.is_empty() {
        return Err(PreconditionError::ToolNotFound {
            tool: "apache2ctl or nginx".to_string(),
        }
        .into());
    }
    status::ok(format!(
        "Web server binaries: {}",
        servers.iter().map(|s| s.binary()).collect::<Vec<_>>().join(", ")
    ));

    if !ctx.runner.has_tool("php").await? {
        return Err(PreconditionError::ToolNotFound { tool: "php".to_string() }.into());
    }

    let version = ctx
        .runner
        .check(&SystemCommand::new("php").args(["-r", "echo PHP_VERSION;"]))
        .await?;
    let version = version.stdout.trim().to_string();
    if !config.php.min_version.is_empty() && !version_at_least(&version, &config.php.min_version) {
        status::warn(format!(
            "PHP {} is older than the recommended {}",
            version, config.php.min_version
        ));
        warn!(version = %version, minimum = %config.php.min_version, "PHP version below minimum");
    } else {
        status::ok(format!("PHP {}", version));
    }

    let modules = ctx.runner.check(&SystemCommand::new("php").arg("-m")).await?;
    let loaded = loaded_modules(&modules.stdout);
    let missing: Vec<&String> = config
        .php
        .required_extensions
        .iter()
        .filter(|ext| !loaded.contains(&ext.to_lowercase()))
        .collect();

    for ext in missing {
        status::warn(format!("PHP extension '{}' is not loaded; installing php-{}", ext, ext));
        let install = SystemCommand::new("apt-get")
            .args(["install", "-y"])
            .arg(format!("php-{}", ext))
            .privileged();
        match ctx.runner.check(&install).await {
            Ok(_) => {
                info!(extension = %ext, "PHP extension installed");
                status::ok(format!("Installed php-{}", ext));
            }
            Err(e) => {
                warn!(extension = %ext, error = %e, "Could not install PHP extension");
                status::warn(format!("Could not install php-{}; continuing without it", ext));
            }
        }
    }

    Ok(StageOutcome::Completed)
}
