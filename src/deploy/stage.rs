//! Pipeline stages and the deployment modes that run them.

use std::fmt;

use serde::Serialize;

use crate::domain::EffectiveConfig;

/// One idempotent unit of provisioning work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    /// Identity, tool and PHP extension checks.
    Preflight,
    /// Application and log directories.
    DirectorySetup,
    /// Copying application files from the source directory.
    FileSync,
    /// Ownership and mode of the copied files.
    PermissionFix,
    /// Rendering the runtime config.
    ConfigGeneration,
    /// Virtual host, syntax check, enable and reload.
    WebServerConfig,
    /// logrotate rule.
    LogRotationSetup,
    /// Marker unit and environment file.
    ServiceSetup,
    /// Certificate issuance and TLS virtual host.
    TlsSetup,
    /// Probe run against the generated config.
    Verification,
}

impl Stage {
    /// Human readable stage title.
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Preflight => "Preflight checks",
            Stage::DirectorySetup => "Directory setup",
            Stage::FileSync => "File sync",
            Stage::PermissionFix => "Permission fix",
            Stage::ConfigGeneration => "Config generation",
            Stage::WebServerConfig => "Web server config",
            Stage::LogRotationSetup => "Log rotation",
            Stage::ServiceSetup => "Service setup",
            Stage::TlsSetup => "TLS setup",
            Stage::Verification => "Verification",
        }
    }

    /// Whether the stage's feature flag is on; ungated stages always are.
    pub fn is_enabled(&self, config: &EffectiveConfig) -> bool {
        match self {
            Stage::LogRotationSetup => config.logrotate.enabled,
            Stage::ServiceSetup => config.service.enabled,
            Stage::TlsSetup => config.ssl.enabled,
            _ => true,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Deployment modes. They share one effective config but run different stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// Standard deployment: files, config and virtual host.
    Deploy,
    /// Full production provisioning including optional features.
    Provision,
    /// Code-only update with backup and rollback.
    Update,
}

const DEPLOY_STAGES: &[Stage] = &[
    Stage::Preflight,
    Stage::DirectorySetup,
    Stage::FileSync,
    Stage::PermissionFix,
    Stage::ConfigGeneration,
    Stage::WebServerConfig,
    Stage::Verification,
];

const PROVISION_STAGES: &[Stage] = &[
    Stage::Preflight,
    Stage::DirectorySetup,
    Stage::FileSync,
    Stage::PermissionFix,
    Stage::ConfigGeneration,
    Stage::WebServerConfig,
    Stage::LogRotationSetup,
    Stage::ServiceSetup,
    Stage::TlsSetup,
    Stage::Verification,
];

const UPDATE_STAGES: &[Stage] = &[Stage::FileSync, Stage::PermissionFix];

impl Mode {
    /// Stages the mode runs through the provisioning pipeline, in order.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Mode::Deploy => DEPLOY_STAGES,
            Mode::Provision => PROVISION_STAGES,
            Mode::Update => UPDATE_STAGES,
        }
    }

    /// Whether optional feature stages are part of this mode.
    pub fn runs(&self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Deploy => "deploy",
            Mode::Provision => "provision",
            Mode::Update => "update",
        };
        f.write_str(name)
    }
}

/// What a stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran to completion.
    Completed,
    /// The stage did nothing; the reason is shown to the operator.
    Skipped(String),
    /// An existing artifact was kept because overwrite was declined.
    Kept,
}
