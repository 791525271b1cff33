// ─── Transfer Orchestrator ───
// Fetch → verify → atomic commit, with retries, a bounded worker pool and
// cooperative cancellation.

mod event;
mod orchestrator;
mod source;
mod task;


pub use event::{FailureKind, TaskStatus, TransferEvent, TransferObserver};
pub use orchestrator::{
    FailedFile, SessionReport, SessionStatus, TransferOptions, TransferOrchestrator,
};
pub use source::{LocalMirror, RemoteMirror, SourceLocator, SourceResolver};
pub use task::TransferTask;
