mod attempt;
mod job;
mod state;

pub use attempt::{EventSeverity, HealingAttempt, HealingEvent, HealingStatus};
pub use job::{Job, JobKind, JobStatus};
pub use state::{WorkerEvent, WorkerState, WorkerStateMachine};
