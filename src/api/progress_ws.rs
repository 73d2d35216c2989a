//! Duplex progress channel at `/api/v1/downloads/progress` (spec.md §4.10).
//!
//! Grounded in axum's `ws` extractor as the idiomatic realization of a
//! text-framed duplex channel, bridging [`ProgressHub`]'s broadcast receiver
//! with `tokio-stream`'s `BroadcastStream` the way a `tokio::sync::broadcast`
//! consumer is normally adapted into a `Stream`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::orchestrator::Orchestrator;
use crate::progress::{ProgressEvent, ProgressEventType, SubscriberCommand, SubscriptionFilter};

pub async fn upgrade(State(orchestrator): State<Arc<Orchestrator>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, orchestrator))
}

async fn handle_socket(socket: WebSocket, orchestrator: Arc<Orchestrator>) {
    let (mut sender, mut receiver) = socket.split();

    let connected = ProgressEvent::new(ProgressEventType::Connected);
    if send_event(&mut sender, &connected).await.is_err() {
        return;
    }

    let mut events = BroadcastStream::new(orchestrator.hub.subscribe());
    let mut filter = SubscriptionFilter::default();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_command(&text, &mut filter, &mut sender).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            outgoing = events.next() => {
                match outgoing {
                    Some(Ok(event)) => {
                        if !filter.allows(&event) {
                            continue;
                        }
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(_)) => {
                        // Lagged: this subscriber missed events. Spec.md §4.10
                        // makes delivery best-effort, so we just keep going.
                        continue;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ProgressEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();
    sender.send(Message::Text(payload.into())).await
}

/// Returns `false` when the connection should be closed.
async fn handle_command(text: &str, filter: &mut SubscriptionFilter, sender: &mut SplitSink<WebSocket, Message>) -> bool {
    let Ok(command) = serde_json::from_str::<SubscriberCommand>(text) else {
        return true;
    };

    match command {
        SubscriberCommand::Subscribe { download_id } => {
            filter.set(download_id);
            true
        }
        SubscriberCommand::Ping => {
            let pong = ProgressEvent::new(ProgressEventType::Pong);
            send_event(sender, &pong).await.is_ok()
        }
    }
}
