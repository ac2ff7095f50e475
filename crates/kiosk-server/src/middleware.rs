//! Request middleware.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use kiosk_activity::ActivityController;

/// Keep the host awake while a request is being handled.
///
/// Covers the handler and response headers. Streaming bodies that outlive
/// the handler take their own hold.
pub async fn hold_activity(
    State(activity): State<ActivityController>,
    request: Request,
    next: Next,
) -> Response {
    let _hold = activity.hold().await;
    next.run(request).await
}
