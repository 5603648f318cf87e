pub mod context;
pub mod error;
pub mod launch;
pub mod power;
pub mod vendor;
pub mod verify;

pub use context::WorkerContext;
pub use error::WorkerError;
pub use launch::do_launch;
pub use verify::do_verify;

/// Scheduler-side sender kept in the operation-keyed quit registry (§5 Cancellation):
/// buffered to exactly one pending signal, sent non-blockingly so a stale worker never
/// stalls the scheduler tick.
pub type QuitSender = tokio::sync::mpsc::Sender<()>;
pub type QuitReceiver = tokio::sync::mpsc::Receiver<()>;

/// Creates a quit channel pair for one worker (§5 Cancellation: capacity exactly 1).
pub fn quit_channel() -> (QuitSender, QuitReceiver) {
    tokio::sync::mpsc::channel(1)
}
