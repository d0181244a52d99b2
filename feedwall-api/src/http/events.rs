use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tracing::info;

use crate::http::AppState;

/// `GET /events`: one server-sent event per upstream message.
///
/// The subscriber is registered before the response is returned and
/// unregistered when the client goes away or the server shuts down.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.hub.open_session(state.shutdown.child_token());
    info!(
        subscriber_id = %session.id(),
        subscribers = state.hub.registry().len(),
        "Event stream opened"
    );

    let stream = session
        .into_stream()
        .map(|event| Ok(Event::default().data(event.to_payload())));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}
