pub mod compression;
pub mod job;
pub mod lock;
pub mod pipeline;
pub mod schedule;
pub mod validate;

pub use job::{BackupOrchestrator, RunRequest, RunSummary};
