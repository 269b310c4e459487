//! File-system primitives used by the stages.
//!
//! With escalation off every operation uses the process's own permissions.
//! With escalation on, writes into system locations go through privileged
//! commands so an unprivileged operator can provision with sudo rights.
//! Ownership changes always go through the runner.

use std::io::Write;
use std::path::Path;

use tracing::debug;

use super::runner::{CommandRunner, SystemCommand};
use crate::error::DeployError;

/// Formats a mode the way `chmod` and `install` expect it.
pub fn mode_string(mode: u32) -> String {
    format!("{:o}", mode)
}

/// File operations bound to a runner.
pub struct FileOps<'a, R> {
    runner: &'a R,
    escalate: bool,
}

impl<'a, R: CommandRunner> FileOps<'a, R> {
    /// Creates file operations; `escalate` routes writes through `sudo`.
    pub fn new(runner: &'a R, escalate: bool) -> Self {
        Self { runner, escalate }
    }

    /// Whether writes are routed through privileged commands.
    pub fn escalates(&self) -> bool {
        self.escalate
    }

    /// Returns true if `path` exists, checking with root rights when escalating.
    pub async fn exists(&self, path: &Path) -> Result<bool, DeployError> {
        if path.exists() {
            return Ok(true);
        }
        if !self.escalate {
            return Ok(false);
        }
        let output = self
            .runner
            .run(&SystemCommand::new("test").arg("-e").arg(path_arg(path)).privileged())
            .await?;
        Ok(output.success())
    }

    /// Reads a text file, or `None` if it does not exist.
    pub async fn read_text(&self, path: &Path) -> Result<Option<String>, DeployError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.escalate && self.exists(path).await? {
                    self.read_privileged(path).await.map(Some)
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && self.escalate => {
                self.read_privileged(path).await.map(Some)
            }
            Err(e) => Err(DeployError::io(path, e)),
        }
    }

    async fn read_privileged(&self, path: &Path) -> Result<String, DeployError> {
        let output = self
            .runner
            .check(&SystemCommand::new("cat").arg(path_arg(path)).privileged())
            .await?;
        Ok(output.stdout)
    }

    /// Writes `content` to `path` with `mode`, creating parent directories.
    pub async fn write_text(&self, path: &Path, content: &str, mode: u32) -> Result<(), DeployError> {
        debug!(path = %path.display(), mode = %mode_string(mode), bytes = content.len(), "Writing file");

        if !self.escalate {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DeployError::io(parent, e))?;
            }
            tokio::fs::write(path, content)
                .await
                .map_err(|e| DeployError::io(path, e))?;
            return set_local_mode(path, mode);
        }

        let mut staged = tempfile::NamedTempFile::new().map_err(|e| DeployError::io(std::env::temp_dir(), e))?;
        staged
            .write_all(content.as_bytes())
            .map_err(|e| DeployError::io(staged.path(), e))?;
        staged.flush().map_err(|e| DeployError::io(staged.path(), e))?;

        self.runner
            .check(
                &SystemCommand::new("install")
                    .args(["-D", "-m", &mode_string(mode)])
                    .arg(path_arg(staged.path()))
                    .arg(path_arg(path))
                    .privileged(),
            )
            .await?;
        Ok(())
    }

    /// Creates `path` and its parents, then applies `mode` to `path`.
    pub async fn create_dir(&self, path: &Path, mode: u32) -> Result<(), DeployError> {
        debug!(path = %path.display(), mode = %mode_string(mode), "Creating directory");

        if self.escalate {
            self.runner
                .check(
                    &SystemCommand::new("install")
                        .args(["-d", "-m", &mode_string(mode)])
                        .arg(path_arg(path))
                        .privileged(),
                )
                .await?;
            return Ok(());
        }

        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| DeployError::io(path, e))?;
        set_local_mode(path, mode)
    }

    /// Copies one file, overwriting `dest`.
    pub async fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), DeployError> {
        if self.escalate {
            self.runner
                .check(
                    &SystemCommand::new("cp")
                        .arg(path_arg(src))
                        .arg(path_arg(dest))
                        .privileged(),
                )
                .await?;
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeployError::io(parent, e))?;
        }
        tokio::fs::copy(src, dest)
            .await
            .map_err(|e| DeployError::io(src, e))?;
        Ok(())
    }

    /// Copies the contents of `src` into `dest`, preserving modes.
    pub async fn copy_tree(&self, src: &Path, dest: &Path) -> Result<(), DeployError> {
        if self.escalate {
            self.runner
                .check(&SystemCommand::new("mkdir").arg("-p").arg(path_arg(dest)).privileged())
                .await?;
            self.runner
                .check(
                    &SystemCommand::new("cp")
                        .arg("-a")
                        .arg(format!("{}/.", src.display()))
                        .arg(format!("{}/", dest.display()))
                        .privileged(),
                )
                .await?;
            return Ok(());
        }
        copy_tree_local(src, dest)
    }

    /// Applies `mode` to `path`.
    pub async fn set_mode(&self, path: &Path, mode: u32) -> Result<(), DeployError> {
        if self.escalate {
            self.runner
                .check(
                    &SystemCommand::new("chmod")
                        .arg(mode_string(mode))
                        .arg(path_arg(path))
                        .privileged(),
                )
                .await?;
            return Ok(());
        }
        set_local_mode(path, mode)
    }

    /// Changes ownership of `path` to `user:group`.
    pub async fn chown(&self, path: &Path, user: &str, group: &str) -> Result<(), DeployError> {
        self.runner
            .check(
                &SystemCommand::new("chown")
                    .arg(format!("{}:{}", user, group))
                    .arg(path_arg(path))
                    .privileged(),
            )
            .await?;
        Ok(())
    }

    /// Removes a file; a missing file is not an error.
    pub async fn remove_file(&self, path: &Path) -> Result<(), DeployError> {
        if self.escalate {
            self.runner
                .check(&SystemCommand::new("rm").arg("-f").arg(path_arg(path)).privileged())
                .await?;
            return Ok(());
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::io(path, e)),
        }
    }

    /// Removes a directory tree; a missing directory is not an error.
    pub async fn remove_dir(&self, path: &Path) -> Result<(), DeployError> {
        if self.escalate {
            self.runner
                .check(&SystemCommand::new("rm").arg("-rf").arg(path_arg(path)).privileged())
                .await?;
            return Ok(());
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::io(path, e)),
        }
    }

    /// Deletes everything inside `path`, keeping the directory itself.
    pub async fn clear_dir(&self, path: &Path) -> Result<(), DeployError> {
        if self.escalate {
            self.runner
                .check(
                    &SystemCommand::new("find")
                        .arg(path_arg(path))
                        .args(["-mindepth", "1", "-delete"])
                        .privileged(),
                )
                .await?;
            return Ok(());
        }

        let entries = std::fs::read_dir(path).map_err(|e| DeployError::io(path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| DeployError::io(path, e))?;
            let target = entry.path();
            let file_type = entry.file_type().map_err(|e| DeployError::io(&target, e))?;
            let result = if file_type.is_dir() {
                std::fs::remove_dir_all(&target)
            } else {
                std::fs::remove_file(&target)
            };
            result.map_err(|e| DeployError::io(&target, e))?;
        }
        Ok(())
    }

    /// Points `link` at `target`, replacing any existing link.
    pub async fn symlink(&self, target: &Path, link: &Path) -> Result<(), DeployError> {
        if self.escalate {
            self.runner
                .check(
                    &SystemCommand::new("ln")
                        .arg("-sfn")
                        .arg(path_arg(target))
                        .arg(path_arg(link))
                        .privileged(),
                )
                .await?;
            return Ok(());
        }

        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(link).map_err(|e| DeployError::io(link, e))?;
        }
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
        }
        std::os::unix::fs::symlink(target, link).map_err(|e| DeployError::io(link, e))
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn set_local_mode(path: &Path, mode: u32) -> Result<(), DeployError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| DeployError::io(path, e))
}

fn copy_tree_local(src: &Path, dest: &Path) -> Result<(), DeployError> {
    std::fs::create_dir_all(dest).map_err(|e| DeployError::io(dest, e))?;

    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            DeployError::io(path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| DeployError::io(&target, e))?;
            let permissions = entry.metadata().map_err(|e| DeployError::io(entry.path(), e.into()))?.permissions();
            std::fs::set_permissions(&target, permissions).map_err(|e| DeployError::io(&target, e))?;
        } else if entry.file_type().is_symlink() {
            let pointee = std::fs::read_link(entry.path()).map_err(|e| DeployError::io(entry.path(), e))?;
            std::os::unix::fs::symlink(pointee, &target).map_err(|e| DeployError::io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| DeployError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommandError;
    use crate::system::runner::CommandOutput;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<SystemCommand>>,
    }

    impl CommandRunner for Recorder {
        async fn run(&self, command: &SystemCommand) -> Result<CommandOutput, CommandError> {
            self.seen.lock().unwrap().push(command.clone());
            Ok(CommandOutput::ok(""))
        }
    }

    #[tokio::test]
    async fn test_direct_write_creates_parents_and_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Recorder::default();
        let files = FileOps::new(&runner, false);
        let path = dir.path().join("etc/app/config.php");

        files.write_text(&path, "<?php\n", 0o600).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<?php\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_escalated_write_stages_and_installs() {
        let runner = Recorder::default();
        let files = FileOps::new(&runner, true);

        files
            .write_text(Path::new("/etc/apache2/sites-available/a.conf"), "x", 0o644)
            .await
            .unwrap();

        let seen = runner.seen.lock().unwrap();
        let install = seen.last().unwrap();
        assert!(install.privileged);
        assert!(install.is("install", &["-D", "-m", "644"]));
        assert_eq!(install.args.last().unwrap(), "/etc/apache2/sites-available/a.conf");
    }

    #[tokio::test]
    async fn test_chown_always_goes_through_runner() {
        let runner = Recorder::default();
        let files = FileOps::new(&runner, false);

        files.chown(Path::new("/var/www/app"), "www-data", "www-data").await.unwrap();

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].to_string(), "sudo chown www-data:www-data /var/www/app");
    }

    #[tokio::test]
    async fn test_copy_tree_and_clear_dir() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("lib")).unwrap();
        std::fs::write(src.path().join("index.php"), "a").unwrap();
        std::fs::write(src.path().join("lib/util.php"), "b").unwrap();

        let runner = Recorder::default();
        let files = FileOps::new(&runner, false);
        files.copy_tree(src.path(), dest.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest.path().join("lib/util.php")).unwrap(), "b");

        files.clear_dir(dest.path()).await.unwrap();
        assert!(dest.path().exists());
        assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Recorder::default();
        let files = FileOps::new(&runner, false);
        files.remove_file(&dir.path().join("nope")).await.unwrap();
    }
}
