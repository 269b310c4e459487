//! Record of artifacts a run wrote, for best-effort rollback.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DeployError;
use crate::system::{CommandRunner, FileOps};

/// How to undo one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoToken {
    /// The file did not exist before; undo removes it.
    Created(PathBuf),
    /// The file existed; undo restores the prior content with `mode`.
    Replaced { path: PathBuf, prior: String, mode: u32 },
}

impl UndoToken {
    pub fn path(&self) -> &Path {
        match self {
            UndoToken::Created(path) => path,
            UndoToken::Replaced { path, .. } => path,
        }
    }
}

/// Writes performed so far, in order.
#[derive(Debug, Default, Clone)]
pub struct Journal {
    tokens: Vec<UndoToken>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, token: UndoToken) {
        self.tokens.push(token);
    }

    pub fn tokens(&self) -> &[UndoToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Returns true if this run wrote `path`.
    pub fn wrote(&self, path: &Path) -> bool {
        self.tokens.iter().any(|t| t.path() == path)
    }

    /// Undoes every recorded write, newest first.
    ///
    /// Keeps going past individual failures and returns how many were undone.
    /// Commands run by stages (reloads, enabled modules, issued certificates)
    /// are not reversed.
    pub async fn rollback<R: CommandRunner>(&self, files: &FileOps<'_, R>) -> usize {
        let mut undone = 0;
        for token in self.tokens.iter().rev() {
            let result: Result<(), DeployError> = match token {
                UndoToken::Created(path) => files.remove_file(path).await,
                UndoToken::Replaced { path, prior, mode } => files.write_text(path, prior, *mode).await,
            };
            match result {
                Ok(()) => {
                    info!(path = %token.path().display(), "Rolled back");
                    undone += 1;
                }
                Err(e) => warn!(path = %token.path().display(), error = %e, "Rollback step failed"),
            }
        }
        undone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;
    use crate::system::{CommandOutput, SystemCommand};

    struct NoCommands;

    impl CommandRunner for NoCommands {
        async fn run(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
            panic!("unexpected command {}", command);
        }
    }

    #[tokio::test]
    async fn test_rollback_restores_in_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let created = dir.path().join("new.conf");
        let replaced = dir.path().join("old.conf");
        std::fs::write(&created, "generated").unwrap();
        std::fs::write(&replaced, "generated").unwrap();

        let mut journal = Journal::new();
        journal.record(UndoToken::Created(created.clone()));
        journal.record(UndoToken::Replaced {
            path: replaced.clone(),
            prior: "original".to_string(),
            mode: 0o644,
        });
        assert!(journal.wrote(&created));

        let runner = NoCommands;
        let files = FileOps::new(&runner, false);
        assert_eq!(journal.rollback(&files).await, 2);
        assert!(!created.exists());
        assert_eq!(std::fs::read_to_string(&replaced).unwrap(), "original");
    }
}
