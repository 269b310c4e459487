//! Host interaction: external commands, files and web servers.

pub mod files;
pub mod runner;
pub mod webserver;

pub use files::FileOps;
pub use runner::{CommandOutput, CommandRunner, ProcessRunner, SystemCommand};
pub use webserver::WebServer;
