//! Apache and Nginx: detection, syntax checks, site enabling and reloads.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::files::FileOps;
use super::runner::{CommandRunner, SystemCommand};
use crate::domain::effective::{EffectiveConfig, WebServerSettings};
use crate::error::{CommandError, DeployError};

/// A supported web server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WebServer {
    Apache,
    Nginx,
}

impl WebServer {
    /// systemd unit name.
    pub fn service(&self) -> &'static str {
        match self {
            WebServer::Apache => "apache2",
            WebServer::Nginx => "nginx",
        }
    }

    /// Binary checked for during preflight.
    pub fn binary(&self) -> &'static str {
        match self {
            WebServer::Apache => "apache2ctl",
            WebServer::Nginx => "nginx",
        }
    }

    /// This server's settings from the effective config.
    pub fn settings<'c>(&self, config: &'c EffectiveConfig) -> &'c WebServerSettings {
        match self {
            WebServer::Apache => &config.apache,
            WebServer::Nginx => &config.nginx,
        }
    }

    /// Command that validates the server's configuration.
    pub fn syntax_check_command(&self) -> SystemCommand {
        match self {
            WebServer::Apache => SystemCommand::new("apache2ctl").arg("configtest").privileged(),
            WebServer::Nginx => SystemCommand::new("nginx").arg("-t").privileged(),
        }
    }

    /// Command that reloads the server.
    pub fn reload_command(&self) -> SystemCommand {
        SystemCommand::new("systemctl")
            .args(["reload", self.service()])
            .privileged()
    }

    /// Reload command as a shell line, for logrotate hooks.
    pub fn reload_line(&self) -> String {
        format!("systemctl reload {}", self.service())
    }

    /// Path of the enabled-site symlink for Nginx.
    fn enabled_link(settings: &WebServerSettings) -> PathBuf {
        let file_name = settings
            .config_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| settings.site_name.clone().into());
        let available = settings.config_file.parent().unwrap_or(Path::new("/etc/nginx/sites-available"));
        available
            .parent()
            .unwrap_or(Path::new("/etc/nginx"))
            .join("sites-enabled")
            .join(file_name)
    }
}

impl fmt::Display for WebServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebServer::Apache => f.write_str("Apache"),
            WebServer::Nginx => f.write_str("Nginx"),
        }
    }
}

/// Which servers are currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub apache: bool,
    pub nginx: bool,
}

impl Detection {
    /// The server to configure. Apache wins when both are active.
    pub fn chosen(&self) -> Option<WebServer> {
        match (self.apache, self.nginx) {
            (true, _) => Some(WebServer::Apache),
            (false, true) => Some(WebServer::Nginx),
            (false, false) => None,
        }
    }

    /// Returns true if both servers are active.
    pub fn ambiguous(&self) -> bool {
        self.apache && self.nginx
    }
}

async fn is_active<R: CommandRunner>(runner: &R, unit: &str) -> Result<bool, CommandError> {
    let output = runner
        .run(&SystemCommand::new("systemctl").args(["is-active", "--quiet", unit]))
        .await?;
    Ok(output.success())
}

/// Probes systemd for active web servers.
pub async fn detect<R: CommandRunner>(runner: &R) -> Result<Detection, CommandError> {
    let detection = Detection {
        apache: is_active(runner, WebServer::Apache.service()).await?,
        nginx: is_active(runner, WebServer::Nginx.service()).await?,
    };
    debug!(apache = detection.apache, nginx = detection.nginx, "Web server detection");
    Ok(detection)
}

/// Runs the server's syntax check; failure carries the tool's diagnostics.
pub async fn syntax_check<R: CommandRunner>(runner: &R, server: WebServer) -> Result<(), CommandError> {
    runner.check(&server.syntax_check_command()).await?;
    info!(server = %server, "Configuration syntax OK");
    Ok(())
}

/// Enables the site: `a2ensite` for Apache, a sites-enabled link for Nginx.
pub async fn enable_site<R: CommandRunner>(
    runner: &R,
    files: &FileOps<'_, R>,
    server: WebServer,
    settings: &WebServerSettings,
) -> Result<(), DeployError> {
    match server {
        WebServer::Apache => {
            runner
                .check(
                    &SystemCommand::new("a2ensite")
                        .arg(settings.site_name.clone())
                        .privileged(),
                )
                .await?;
        }
        WebServer::Nginx => {
            let link = WebServer::enabled_link(settings);
            files.symlink(&settings.config_file, &link).await?;
        }
    }
    info!(server = %server, site = %settings.site_name, "Site enabled");
    Ok(())
}

/// Reloads the server.
pub async fn reload<R: CommandRunner>(runner: &R, server: WebServer) -> Result<(), CommandError> {
    runner.check(&server.reload_command()).await?;
    info!(server = %server, "Web server reloaded");
    Ok(())
}

/// Apache modules the generated virtual host uses. The TLS variant always
/// needs `ssl`, `rewrite` for the port 80 redirect and `headers` for HSTS.
pub fn vhost_modules(settings: &WebServerSettings, tls: bool) -> Vec<&'static str> {
    let mut modules = Vec::new();
    if tls {
        modules.extend(["ssl", "rewrite", "headers"]);
    } else if settings.security_headers {
        modules.push("headers");
    }
    if settings.rate_limiting {
        modules.push("ratelimit");
    }
    modules
}

/// Enables the modules the virtual host needs before its syntax check.
/// Nginx needs none.
pub async fn enable_vhost_modules<R: CommandRunner>(
    runner: &R,
    server: WebServer,
    settings: &WebServerSettings,
    tls: bool,
) -> Result<(), CommandError> {
    let modules = vhost_modules(settings, tls);
    if server != WebServer::Apache || modules.is_empty() {
        return Ok(());
    }
    runner
        .check(&SystemCommand::new("a2enmod").args(modules.iter().copied()).privileged())
        .await?;
    debug!(modules = ?modules, "Apache modules enabled");
    Ok(())
}
