//! The status stream: long-lived SSE per root task.
//!
//! The stream emits the reconciled state immediately on connect, then
//! polls the task graph once a second and emits only when
//! `(status, progress)` changes, closing after a terminal state. A
//! dropped client only tears down this stream; backend work continues.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{Stream, unfold};

use jimaku_core::{TaskId, TaskStatus};

use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

struct StreamState {
    app: AppState,
    task_id: TaskId,
    last: Option<(TaskStatus, u8)>,
    done: bool,
}

/// Build the SSE response for one root task.
pub fn reconciled_stream(
    app: AppState,
    task_id: TaskId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let initial = StreamState {
        app,
        task_id,
        last: None,
        done: false,
    };

    let stream = unfold(initial, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            match st.app.coordinator.snapshot(st.task_id).await {
                Ok(Some(state)) => {
                    let key = (state.status, state.progress);
                    if st.last != Some(key) {
                        st.last = Some(key);
                        if state.status.is_terminal() {
                            tracing::info!(
                                task_id = %st.task_id,
                                status = state.status.as_str(),
                                "terminal state reached, closing SSE stream"
                            );
                            st.done = true;
                        }
                        let data = serde_json::to_string(&state).unwrap_or_default();
                        return Some((Ok(Event::default().data(data)), st));
                    }
                }
                Ok(None) => {
                    st.done = true;
                    let data = r#"{"error":"task not found"}"#.to_string();
                    return Some((Ok(Event::default().data(data)), st));
                }
                Err(e) => {
                    tracing::error!(task_id = %st.task_id, error = %e, "SSE snapshot failed");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}
