//! Operator interaction: confirmations, text and secret input.
//!
//! Every question the tool asks goes through [`Prompter`], so runs can be
//! scripted in tests and overwrite decisions can be fixed by flags.

use std::path::Path;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};
use tracing::debug;

use crate::domain::select_domain;
use crate::error::{DeployError, PromptError};

/// Source of operator answers.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter {
    /// Yes/no question.
    fn confirm(&self, question: &str, default: bool) -> Result<bool, PromptError>;

    /// Free text with an optional default.
    fn input(&self, question: &str, default: Option<String>) -> Result<String, PromptError>;

    /// Hidden input; may be blank.
    fn secret(&self, question: &str) -> Result<String, PromptError>;

    /// One of `items`, by index.
    fn select(&self, question: &str, items: &[String]) -> Result<usize, PromptError>;
}

impl<T: Prompter + ?Sized> Prompter for &T {
    fn confirm(&self, question: &str, default: bool) -> Result<bool, PromptError> {
        (**self).confirm(question, default)
    }

    fn input(&self, question: &str, default: Option<String>) -> Result<String, PromptError> {
        (**self).input(question, default)
    }

    fn secret(&self, question: &str) -> Result<String, PromptError> {
        (**self).secret(question)
    }

    fn select(&self, question: &str, items: &[String]) -> Result<usize, PromptError> {
        (**self).select(question, items)
    }
}

/// Prompts on the controlling terminal.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl std::fmt::Debug for TerminalPrompter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalPrompter").field("theme", &"ColorfulTheme").finish()
    }
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

fn interaction(e: dialoguer::Error) -> PromptError {
    PromptError::Interaction(e.to_string())
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, question: &str, default: bool) -> Result<bool, PromptError> {
        Confirm::with_theme(&self.theme)
            .with_prompt(question)
            .default(default)
            .interact()
            .map_err(interaction)
    }

    fn input(&self, question: &str, default: Option<String>) -> Result<String, PromptError> {
        let mut input = Input::<String>::with_theme(&self.theme).with_prompt(question);
        if let Some(default) = default {
            input = input.default(default);
        } else {
            input = input.allow_empty(true);
        }
        input.interact_text().map_err(interaction)
    }

    fn secret(&self, question: &str) -> Result<String, PromptError> {
        Password::with_theme(&self.theme)
            .with_prompt(question)
            .allow_empty_password(true)
            .interact()
            .map_err(interaction)
    }

    fn select(&self, question: &str, items: &[String]) -> Result<usize, PromptError> {
        Select::with_theme(&self.theme)
            .with_prompt(question)
            .items(items)
            .default(0)
            .interact()
            .map_err(interaction)
    }
}

/// What to do when a generated artifact already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Ask for each existing file; default answer keeps it.
    #[default]
    AskOperator,
    /// Replace without asking.
    AlwaysOverwrite,
    /// Keep every existing file.
    NeverOverwrite,
}

impl ConflictPolicy {
    /// Policy from the `--overwrite` / `--keep-existing` flags.
    pub fn from_flags(overwrite: bool, keep_existing: bool) -> Self {
        match (overwrite, keep_existing) {
            (true, _) => ConflictPolicy::AlwaysOverwrite,
            (false, true) => ConflictPolicy::NeverOverwrite,
            (false, false) => ConflictPolicy::AskOperator,
        }
    }

    /// Decides whether the existing file at `path` may be replaced.
    pub fn allows_overwrite<P: Prompter + ?Sized>(&self, prompter: &P, path: &Path) -> Result<bool, PromptError> {
        let decision = match self {
            ConflictPolicy::AlwaysOverwrite => true,
            ConflictPolicy::NeverOverwrite => false,
            ConflictPolicy::AskOperator => {
                prompter.confirm(&format!("{} already exists. Overwrite?", path.display()), false)?
            }
        };
        debug!(path = %path.display(), policy = ?self, overwrite = decision, "Conflict resolved");
        Ok(decision)
    }

    /// Asks whether to delete a kept backup snapshot; only asks under
    /// [`ConflictPolicy::AskOperator`], otherwise the snapshot is kept.
    pub fn allows_snapshot_delete<P: Prompter + ?Sized>(&self, prompter: &P, path: &Path) -> Result<bool, PromptError> {
        match self {
            ConflictPolicy::AskOperator => {
                prompter.confirm(&format!("Update verified. Delete backup {}?", path.display()), false)
            }
            _ => Ok(false),
        }
    }
}

/// Lists `names` numbered from 1 and asks for a choice.
pub fn choose_domain<P: Prompter + ?Sized>(prompter: &P, names: &[String]) -> Result<String, DeployError> {
    if names.len() > 1 {
        println!("Configured domains:");
        for (i, name) in names.iter().enumerate() {
            println!("  {}) {}", i + 1, name);
        }
    }

    let answer = match names.len() {
        0 | 1 => "1".to_string(),
        n => prompter.input(&format!("Select domain [1-{}]", n), None)?,
    };
    let choice: usize = answer
        .trim()
        .parse()
        .map_err(|_| PromptError::Interaction(format!("'{}' is not a number", answer.trim())))?;

    Ok(select_domain(names, choice)?)
}
