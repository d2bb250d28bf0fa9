use std::error::Error;

/// Base trait for all application errors.
pub trait CrewError: Error + Send + Sync + 'static {
    /// Error code for programmatic handling.
    fn error_code(&self) -> &'static str;

    /// Whether this error should be reported as user guidance rather than a
    /// system failure.
    fn is_user_error(&self) -> bool {
        false
    }
}

/// Join a rollback failure onto an originating failure so neither is lost.
///
/// Returns a message carrying both; the originating error stays primary.
pub fn join_rollback_error(original: &dyn Error, rollback: &dyn Error) -> String {
    format!("{original} (rollback also failed: {rollback})")
}
