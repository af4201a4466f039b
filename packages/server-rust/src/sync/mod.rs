//! Version create and version load orchestration.
//!
//! - [`session`] drives one commit through the dispatcher.
//! - [`export`] and [`import`] run the background pipelines.
//! - [`status`] keeps task snapshots for polling.
//! - [`service`] is the facade callers use.

pub mod classify;
pub mod export;
pub mod import;
pub mod service;
pub mod session;
pub mod status;

pub use classify::{classify, MAX_CAUSE_DEPTH};
pub use export::ExportPipeline;
pub use import::{ImportContext, ImportPipeline, LoadFailure};
pub use service::{Collaborators, VersionControlService};
pub use session::{CommitSession, SessionState};
pub use status::{TaskStatus, TaskStatusStore};
