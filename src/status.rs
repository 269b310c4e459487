//! Operator-facing progress lines on stdout.
//!
//! Diagnostics go through `tracing` on stderr; these lines are the run's
//! narrative and are always shown.

use crate::deploy::stage::Stage;

/// `[3/10] File sync`
pub fn stage_start(index: usize, total: usize, stage: Stage) {
    println!("[{}/{}] {}", index, total, stage);
}

pub fn ok(message: impl AsRef<str>) {
    println!("  ✓ {}", message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    println!("  ! {}", message.as_ref());
}

pub fn skip(message: impl AsRef<str>) {
    println!("  - {}", message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    println!("  ✗ {}", message.as_ref());
}

/// Unindented line for summaries.
pub fn line(message: impl AsRef<str>) {
    println!("{}", message.as_ref());
}
