use tracing::warn;

use super::ApiError;

/// Presentation hook for terminal failures.
///
/// `error` is called once for every call that fails terminally.
/// `session_expired` is called at most once per refresh cycle when the
/// session is lost and the user has to log in again.
pub trait Notifier: Send + Sync {
    fn error(&self, error: &ApiError);
    fn session_expired(&self);
}

/// Default notifier: reports through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, error: &ApiError) {
        warn!(status = ?error.status(), error = %error, "{}", error.user_message());
    }

    fn session_expired(&self) {
        warn!("Session expired, re-authentication required");
    }
}
