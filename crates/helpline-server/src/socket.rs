//! Per-connection WebSocket plumbing.
//!
//! Each socket is split into a writer task, which drains the participant's
//! event queue into JSON text frames, and a reader task, which parses
//! inbound frames and forwards them to the session. Whichever finishes
//! first tears down the other, then the participant is unregistered.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use helpline_shared::{ClientEvent, ProtocolError};
use tracing::{debug, info, warn};

use crate::session::{Participant, SessionHandle};

pub async fn handle_socket(socket: WebSocket, session: SessionHandle) {
    let Participant { id, mut events } = match session.connect().await {
        Ok(participant) => participant,
        Err(e) => {
            warn!(error = %e, "Rejecting WebSocket, session unavailable");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match event.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(participant = %id, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_session = session.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                // Ping/pong are answered by axum; binary frames are not part of the protocol.
                Ok(_) => continue,
                Err(e) => {
                    debug!(participant = %id, error = %e, "WebSocket read failed");
                    break;
                }
            };

            match ClientEvent::from_json(&text) {
                Ok(event) => {
                    if reader_session.submit(id, event).await.is_err() {
                        break;
                    }
                }
                Err(ProtocolError::UnknownEvent(name)) => {
                    debug!(participant = %id, event = %name, "Ignoring unknown event");
                }
                Err(e) => {
                    debug!(participant = %id, error = %e, "Ignoring malformed frame");
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    session.disconnect(id).await;
    info!(participant = %id, "WebSocket closed");
}
