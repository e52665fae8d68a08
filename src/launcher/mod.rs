//! Job launchers and the multi-launcher orchestrator.

pub mod job;
pub mod multi;
pub mod runner;

pub use job::{JobLauncher, JobLauncherBuilder, LauncherSettings};
pub use multi::{MultiLauncher, MultiLauncherBuilder, SharedItem};
pub use runner::{JobCommand, JobOutcome, JobRunner, RunnerError, ShellRunner};

#[cfg(test)]
mod tests;
