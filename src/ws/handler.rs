//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::Config;
use crate::game::engine::Direction;
use crate::game::PlayerId;
use crate::http::middleware::{verify_token, AuthError};
use crate::matchmaking::MatchRequest;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Signed identity token
    pub token: Option<String>,
    /// Unsigned identity, accepted only in debug mode
    pub user_id: Option<PlayerId>,
    pub username: Option<String>,
}

/// Who is on the other end of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub player_id: PlayerId,
    pub username: String,
}

fn default_username(player_id: PlayerId) -> String {
    format!("Player_{}", player_id)
}

/// Resolve the identity asserted by the connection query
pub fn resolve_identity(query: &WsQuery, config: &Config) -> Result<Identity, AuthError> {
    if let Some(token) = &query.token {
        let secret = config
            .auth_secret
            .as_deref()
            .ok_or(AuthError::InvalidToken)?;
        let claims = verify_token(token, secret)?;
        return Ok(Identity {
            player_id: claims.sub,
            username: claims.name.unwrap_or_else(|| default_username(claims.sub)),
        });
    }

    match (config.debug_mode, query.user_id) {
        (true, Some(player_id)) => Ok(Identity {
            player_id,
            username: query
                .username
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| default_username(player_id)),
        }),
        _ => Err(AuthError::MissingIdentity),
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify identity before upgrading
    match resolve_identity(&query, &state.config) {
        Ok(identity) => {
            info!(player_id = identity.player_id, "WebSocket upgrade for authenticated player");
            ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let player_id = identity.player_id;
    let (mut ws_sink, mut ws_stream) = socket.split();

    let record = match state
        .users
        .create_if_absent(player_id, &identity.username, state.config.starting_balance)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            error!(player_id, error = %e, "Failed to load user record");
            let _ = send_msg(
                &mut ws_sink,
                &ServerMsg::error("store_unavailable", "User record unavailable, try again later"),
            )
            .await;
            return;
        }
    };

    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerMsg>();
    let connection_id = state.sessions.bind(player_id, outbox);
    info!(player_id, connection = %connection_id, "New WebSocket connection");

    // Writer task: outbox -> WebSocket. The outbox closes when a newer
    // connection supersedes this one, and the socket is closed with it.
    let mut writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id, error = %e, "WebSocket send failed");
                return;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    state.sessions.send(player_id, state.user_data(&record));
    if state.registry.reannounce(player_id) {
        info!(player_id, "Reconnected player rejoined their match");
    }

    let rate_limiter = PlayerRateLimiter::new();

    // Reader loop: WebSocket -> registry / matchmaking
    loop {
        let result = tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(result) => result,
                None => break,
            },
            _ = &mut writer_handle => {
                debug!(player_id, connection = %connection_id, "Writer finished, closing reader");
                break;
            }
        };

        if !state.sessions.is_current(player_id, connection_id) {
            debug!(player_id, connection = %connection_id, "Dropping input from superseded connection");
            break;
        }

        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    debug!(player_id, "Rate limited input message");
                    state.sessions.send(
                        player_id,
                        ServerMsg::error("rate_limited", "Too many messages"),
                    );
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => handle_client_msg(&state, &identity, client_msg).await,
                    Err(e) => {
                        debug!(player_id, error = %e, "Failed to parse client message");
                        state.sessions.send(
                            player_id,
                            ServerMsg::error("bad_message", "Unrecognized message"),
                        );
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                warn!(player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    on_disconnect(&state, player_id, connection_id).await;
    writer_handle.abort();
    info!(player_id, "WebSocket connection closed");
}

/// Release a closed connection: leave the queue and forfeit any match.
/// A superseded connection leaves both to its successor. Returns whether
/// cleanup ran.
pub async fn on_disconnect(state: &AppState, player_id: PlayerId, connection_id: Uuid) -> bool {
    if !state.sessions.unbind(player_id, connection_id) {
        debug!(player_id, connection = %connection_id, "Superseded connection closed");
        return false;
    }
    if state.matchmaking.remove(player_id).await {
        info!(player_id, "Disconnected player removed from queue");
    }
    state.registry.forfeit(player_id).await;
    true
}

/// Route one inbound command
pub async fn handle_client_msg(state: &AppState, identity: &Identity, msg: ClientMsg) {
    let player_id = identity.player_id;
    match msg {
        ClientMsg::FindMatch => {
            match state
                .matchmaking
                .request_match(player_id, identity.username.clone())
                .await
            {
                Ok(MatchRequest::Queued) => {
                    state.sessions.send(player_id, ServerMsg::WaitingOpponent);
                }
                Ok(MatchRequest::Matched { .. }) => {}
                Err(e) => {
                    debug!(player_id, code = e.code(), "Match request rejected");
                    state
                        .sessions
                        .send(player_id, ServerMsg::error(e.code(), e.to_string()));
                }
            }
        }
        ClientMsg::CancelSearch => {
            if state.matchmaking.cancel(player_id).await {
                state.sessions.send(player_id, ServerMsg::SearchCancelled);
            }
        }
        ClientMsg::Ready => {
            if state.registry.match_of(player_id).is_none() {
                state
                    .sessions
                    .send(player_id, ServerMsg::error("not_in_match", "Not in a match"));
                return;
            }
            state.registry.mark_ready(player_id);
        }
        ClientMsg::Direction { direction } => match Direction::parse(&direction) {
            Some(direction) => {
                state.registry.set_direction(player_id, direction);
            }
            None => {
                state.sessions.send(
                    player_id,
                    ServerMsg::error("invalid_direction", format!("Unknown direction {:?}", direction)),
                );
            }
        },
        ClientMsg::Ping { t } => {
            state.sessions.send(player_id, ServerMsg::Pong { t });
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
