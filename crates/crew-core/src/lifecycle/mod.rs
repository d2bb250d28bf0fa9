//! Lifecycle use-cases.
//!
//! Every use-case takes a typed input record and returns a typed output
//! record; all I/O goes through the adapters on [`Deps`]. Invocations on
//! different tasks are safe to run concurrently.

pub mod close;
pub mod complete;
pub mod conflict;
pub mod copy;
pub mod delete;
pub mod deps;
pub mod errors;
pub mod merge;
pub mod new_task;
pub mod review;
pub mod session_ended;
pub mod start;
pub mod stop;
pub mod test_support;

pub use close::{CLOSE_REASON_ABANDONED, CloseInput, CloseOutput, close};
pub use complete::{CompleteInput, CompleteOutput, complete};
pub use conflict::{ConflictCheckInput, check_and_handle};
pub use copy::{CopyInput, CopyOutput, copy_task};
pub use delete::{DeleteInput, delete};
pub use deps::Deps;
pub use errors::LifecycleError;
pub use merge::{MergeInput, MergeOutput, merge};
pub use new_task::{
    CreateFromFileInput, CreateFromFileOutput, NewTaskInput, NewTaskOutput,
    create_tasks_from_file, new_task,
};
pub use review::{
    REVIEW_RESULT_MARKER, REVIEW_RUN_START_PREFIX, ReviewOutcome, anchor_review_success_regex,
    parse_review_result,
};
pub use session_ended::{SessionEndedInput, SessionEndedOutput, session_ended};
pub use start::{StartInput, StartOutput, start};
pub use stop::{StopInput, StopOutput, stop};
