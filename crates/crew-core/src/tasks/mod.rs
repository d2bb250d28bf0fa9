pub mod draft;
pub mod errors;
pub mod migrate;
pub mod status;
pub mod store;
pub mod types;

pub use draft::{ParentRef, TaskDraft, parse_drafts};
pub use errors::TaskError;
pub use migrate::{MigrateOptions, MigrateReport, migrate};
pub use status::{
    ExecutionSubstate, STATUS_VERSION_CURRENT, TaskStatus, transition_allowed,
};
pub use store::{FsTaskStore, StoreInitializer, TaskFilter, TaskStore};
pub use types::{
    Comment, DEFAULT_NAMESPACE, REVIEWER_AUTHOR, Task, acp_session_name, branch_name,
    review_session_name, session_name,
};
