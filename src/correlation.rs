//! Request-scoped correlation ids.
//!
//! A correlation id identifies one unit of work (a CLI invocation, an inbound
//! request, a single orchestration scenario). It is stored in a tokio
//! task-local so code running inside the unit can read it without the id being
//! passed through every call.
//!
//! Reading outside a scope yields `None`; writing outside a scope is a no-op.
//! Logging and error construction can therefore run anywhere without failing.

use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static CORRELATION_ID: RefCell<String>;
}

/// Run `work` with `id` as the active correlation id.
///
/// The scope ends when `work` completes, whether it returns normally or
/// unwinds. Nested calls shadow the outer id for their duration.
pub async fn run_with_correlation_id<F>(id: impl Into<String>, work: F) -> F::Output
where
    F: Future,
{
    CORRELATION_ID.scope(RefCell::new(id.into()), work).await
}

/// Synchronous variant of [`run_with_correlation_id`].
pub fn sync_run_with_correlation_id<R>(id: impl Into<String>, work: impl FnOnce() -> R) -> R {
    CORRELATION_ID.sync_scope(RefCell::new(id.into()), work)
}

/// Returns the correlation id of the current scope, if any.
pub fn correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.borrow().clone()).ok()
}

/// Replace the correlation id of the current scope.
///
/// Does nothing when called outside a scope.
pub fn set_correlation_id(id: impl Into<String>) {
    let id = id.into();
    let _ = CORRELATION_ID.try_with(|current| *current.borrow_mut() = id);
}

/// Generate a fresh correlation id.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
