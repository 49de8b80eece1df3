//! WebSocket upgrade and per-connection push loop.
//!
//! Credentials are checked by the auth middleware before the upgrade, so a
//! connection reaching `ws_handler` is already authenticated. Each
//! connection owns a `Subscription`; dropping it on exit deregisters it.

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use flate2::{write::GzEncoder, Compression};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::error::SubscriptionError;
use crate::response::ApiError;
use crate::state::AppState;
use crate::types::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Authenticated,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    Gzip,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    compress: Option<String>,
}

impl WsQuery {
    fn encoding(&self) -> Result<Encoding, ApiError> {
        match self.compress.as_deref() {
            None | Some("") | Some("none") => Ok(Encoding::Json),
            Some("gzip") => Ok(Encoding::Gzip),
            Some(other) => Err(ApiError::BadRequest(format!("unsupported compression {other:?}"))),
        }
    }
}

struct Connection {
    id: u64,
    state: ConnState,
}

impl Connection {
    fn advance(&mut self, next: ConnState) {
        debug!("ws {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    query: Result<Query<WsQuery>, QueryRejection>,
) -> Response {
    let encoding = match query
        .map_err(|e| ApiError::BadRequest(e.body_text()))
        .and_then(|Query(q)| q.encoding())
    {
        Ok(enc) => enc,
        Err(e) => return e.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, encoding))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, encoding: Encoding) {
    let mut sub = state.cache.subscribe();
    let mut conn = Connection {
        id: sub.id(),
        state: ConnState::Connecting,
    };
    // the upgrade only happens past the auth middleware
    conn.advance(ConnState::Authenticated);
    conn.advance(ConnState::Streaming);
    info!("ws {} streaming ({:?})", conn.id, encoding);

    loop {
        tokio::select! {
            next = sub.recv() => match next {
                Ok(snap) => {
                    if let Err(e) = send_snapshot(&mut socket, &snap, encoding).await {
                        debug!("ws {}: send failed: {e}", conn.id);
                        break;
                    }
                }
                Err(SubscriptionError::Overflowed) => {
                    warn!("ws {}: client too slow, closing", conn.id);
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "subscriber fell behind".into(),
                        })))
                        .await;
                    break;
                }
                Err(SubscriptionError::Closed) => break,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) if is_snapshot_request(&text) => {
                    state.cache.note_read();
                    if let Some(snap) = state.cache.current() {
                        if let Err(e) = send_snapshot(&mut socket, &snap, encoding).await {
                            debug!("ws {}: send failed: {e}", conn.id);
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("ws {}: protocol error: {e}", conn.id);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    conn.advance(ConnState::Closed);
}

fn is_snapshot_request(text: &str) -> bool {
    matches!(text.trim(), "get_snapshot" | "get_metrics")
}

async fn send_snapshot(
    socket: &mut WebSocket,
    snap: &Snapshot,
    encoding: Encoding,
) -> Result<(), axum::Error> {
    let msg = encode(snap, encoding).map_err(axum::Error::new)?;
    socket.send(msg).await
}

pub fn encode(snap: &Snapshot, encoding: Encoding) -> std::io::Result<Message> {
    match encoding {
        Encoding::Json => Ok(Message::Text(serde_json::to_string(snap)?)),
        Encoding::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
            serde_json::to_writer(&mut enc, snap)?;
            enc.flush()?;
            Ok(Message::Binary(enc.finish()?))
        }
    }
}
