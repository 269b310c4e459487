//! Error types for the deployment tool.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::stage::Stage;

/// Top-level deployment errors.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("Stage '{stage}' failed")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<DeployError>,
    },

    #[error("Syntax check failed for {failed} file(s); restored backup snapshot '{snapshot}'")]
    UpdateRolledBack { failed: usize, snapshot: PathBuf },

    #[error("Syntax check failed for {failed} file(s); no backup snapshot was taken, deployed files left as synced")]
    UpdateFailedNoBackup { failed: usize },

    #[error("Restored directory '{path}' does not match snapshot digest (expected {expected}, found {actual})")]
    RestoreMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("IO error on '{path}'")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl DeployError {
    /// Wraps an IO error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file '{path}' not found")]
    NotFound { path: PathBuf },

    #[error("Created '{path}' from template; edit it and run again")]
    Bootstrapped { path: PathBuf },

    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}' at line {line}: {message}")]
    ParseFailed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Section [{section}] has no entries")]
    EmptySection { section: String },
}

/// Domain registry errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Domain '{name}' is not configured{}", did_you_mean(.suggestion))]
    NotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Choice {choice} is out of range (1-{count})")]
    OutOfRange { choice: usize, count: usize },

    #[error("Domain '{name}' already exists")]
    Duplicate { name: String },

    #[error("Invalid domain name '{name}'")]
    InvalidName { name: String },

    #[error("No domains are configured")]
    Empty,
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

/// Effective configuration validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

/// Conditions checked before any system state is touched.
#[derive(Error, Debug)]
pub enum PreconditionError {
    #[error("Required file(s) missing from '{source_dir}': {}", .missing.join(", "))]
    MissingSourceFiles {
        source_dir: PathBuf,
        missing: Vec<String>,
    },

    #[error("Application directory '{path}' does not exist; run a full deployment first")]
    AppDirMissing { path: PathBuf },

    #[error("Refusing to run as root; run as a regular user with sudo rights")]
    RunningAsRoot,

    #[error("Required tool '{tool}' not found in PATH")]
    ToolNotFound { tool: String },
}

/// External command errors.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to run '{command}': {message}")]
    SpawnFailed { command: String, message: String },

    #[error("'{command}' failed with exit code {code}: {output}")]
    Failed {
        command: String,
        code: i32,
        output: String,
    },
}

/// Interactive prompt errors.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Prompt failed: {0}")]
    Interaction(String),

    #[error("Prompt '{0}' requires an answer but none was available")]
    NoAnswer(String),
}
