//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::ConfigPaths;
use crate::deploy::Mode;
use crate::prompt::ConflictPolicy;

/// Deployment and provisioning for the Meeting Meter PHP application.
#[derive(Parser, Debug)]
#[command(name = "meter-deploy", version, about, long_about = None)]
pub struct Cli {
    /// Path to the global deployment config.
    #[arg(short, long, default_value = "deploy.conf", env = "METER_DEPLOY_CONFIG", global = true)]
    pub config: PathBuf,

    /// Path to the domain registry.
    #[arg(long, default_value = "domains.conf", env = "METER_DEPLOY_DOMAINS", global = true)]
    pub domains: PathBuf,

    /// Domain to deploy; skips the selection prompt.
    #[arg(long, global = true)]
    pub domain: Option<String>,

    /// Replace existing generated files without asking.
    #[arg(long, global = true, conflicts_with = "keep_existing")]
    pub overwrite: bool,

    /// Keep existing generated files without asking.
    #[arg(long, global = true)]
    pub keep_existing: bool,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Conflict policy from `--overwrite` / `--keep-existing`.
    pub fn conflict_policy(&self) -> ConflictPolicy {
        ConflictPolicy::from_flags(self.overwrite, self.keep_existing)
    }

    /// Config locations; templates sit next to them with an `.example` suffix.
    pub fn config_paths(&self) -> ConfigPaths {
        ConfigPaths {
            global: self.config.clone(),
            global_template: with_suffix(&self.config, ".example"),
            domains: self.domains.clone(),
            domains_template: with_suffix(&self.domains, ".example"),
        }
    }
}

fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy files, config and virtual host.
    Deploy(DeployArgs),

    /// Full production provisioning, including TLS, service and log rotation.
    Provision(ProvisionArgs),

    /// Update application code only, with backup and rollback.
    Update(UpdateArgs),

    /// Manage the domain registry.
    Domain {
        #[command(subcommand)]
        action: DomainCommand,
    },

    /// Display the effective configuration.
    #[command(name = "config-show")]
    ConfigShow,

    /// Validate the configuration without deploying.
    #[command(name = "config-validate")]
    ConfigValidate(ValidateArgs),
}

/// Arguments for the deploy subcommand.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Run the setup wizard before deploying.
    #[arg(long, default_value = "false")]
    pub interactive: bool,
}

/// Arguments for the provision subcommand.
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Undo artifact writes from this run if a stage fails.
    #[arg(long, default_value = "false")]
    pub rollback_on_failure: bool,
}

/// Arguments for the update subcommand.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Skip the backup snapshot.
    #[arg(long, default_value = "false")]
    pub no_backup: bool,
}

/// Arguments for config-validate.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Mode whose requirements are checked.
    #[arg(long, value_enum, default_value_t = ModeArg::Provision)]
    pub mode: ModeArg,
}

/// Deployment mode on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Deploy,
    Provision,
    Update,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Deploy => Mode::Deploy,
            ModeArg::Provision => Mode::Provision,
            ModeArg::Update => Mode::Update,
        }
    }
}

/// Domain registry subcommands.
#[derive(Subcommand, Debug)]
pub enum DomainCommand {
    /// List configured domains in selection order.
    List,

    /// Add a domain.
    Add(AddDomainArgs),

    /// Remove a domain.
    Remove {
        /// Domain to remove.
        name: String,

        /// Do not ask for confirmation.
        #[arg(long, short)]
        yes: bool,
    },

    /// Edit a domain with --set, or open the registry in $EDITOR.
    Edit {
        /// Domain to edit.
        name: String,

        /// Assignment to apply; may be repeated.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Validate every domain in the registry.
    Validate {
        /// Mode whose requirements are checked.
        #[arg(long, value_enum, default_value_t = ModeArg::Provision)]
        mode: ModeArg,
    },
}

/// Arguments for `domain add`.
#[derive(Args, Debug)]
pub struct AddDomainArgs {
    /// Domain name; also the section name.
    pub name: String,

    #[arg(long)]
    pub app_name: Option<String>,

    #[arg(long)]
    pub app_dir: Option<String>,

    #[arg(long)]
    pub source_dir: Option<String>,

    #[arg(long)]
    pub web_root: Option<String>,

    #[arg(long)]
    pub ssl_email: Option<String>,

    /// Comma-separated alternate names for the certificate.
    #[arg(long, value_delimiter = ',')]
    pub alt_domains: Vec<String>,

    #[arg(long)]
    pub enable_ssl: bool,
}
