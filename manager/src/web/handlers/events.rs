// Server-sent stream of session events

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::web::AppState;

pub async fn session_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.service.subscribe();

    let stream = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse = match Event::default().event("session").json_data(&event) {
                        Ok(sse) => sse,
                        Err(e) => {
                            warn!("Failed to serialize session event: {}", e);
                            continue;
                        }
                    };
                    return Some((Ok(sse), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
