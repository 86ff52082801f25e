use axum::{
    extract::{
        Query, State,
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::{ApiError, SharedState};
use super::auth::{self, Access};
use super::db::DbHandle;
use super::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Joined,
    Left,
}

/// Change hints pushed to connected clients. Clients treat them as a cue to
/// reconcile or refetch, never as authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskDeleted {
        task_id: String,
        workspace_id: String,
        column: Column,
    },
    TaskMoved {
        task_id: String,
        workspace_id: String,
        source_column: Column,
        destination_column: Column,
        new_index: i64,
    },
    WorkspaceUpdated {
        workspace: Workspace,
    },
    WorkspaceDeleted {
        workspace_id: String,
    },
    UserActivity {
        workspace_id: String,
        user_id: String,
        name: String,
        action: Activity,
    },
}

impl WsMessage {
    /// The realm this message is delivered to.
    pub fn workspace_id(&self) -> &str {
        match self {
            Self::TaskCreated { task } | Self::TaskUpdated { task } => &task.workspace_id,
            Self::TaskDeleted { workspace_id, .. }
            | Self::TaskMoved { workspace_id, .. }
            | Self::WorkspaceDeleted { workspace_id }
            | Self::UserActivity { workspace_id, .. } => workspace_id,
            Self::WorkspaceUpdated { workspace } => &workspace.id,
        }
    }
}

/// A message on the broadcast bus, serialized once, tagged with its realm and
/// the user whose action produced it.
#[derive(Debug, Clone)]
pub struct Notification {
    pub workspace_id: String,
    pub origin: Option<String>,
    pub message: Arc<WsMessage>,
    pub payload: String,
}

impl Notification {
    fn is_for(&self, subscriber: &Subscriber) -> bool {
        self.workspace_id == subscriber.workspace_id
            && self.origin.as_deref() != Some(subscriber.user_id.as_str())
    }

    /// Whether this message ends the subscriber's access to its workspace:
    /// the workspace was deleted, or its member list no longer names them.
    fn revokes(&self, subscriber: &Subscriber) -> bool {
        if self.workspace_id != subscriber.workspace_id {
            return false;
        }
        match self.message.as_ref() {
            WsMessage::WorkspaceDeleted { .. } => true,
            WsMessage::WorkspaceUpdated { workspace } => !workspace.is_member(&subscriber.user_id),
            _ => false,
        }
    }
}

pub type Notifier = broadcast::Sender<Notification>;

/// Identity of one connected socket.
#[derive(Debug, Clone)]
struct Subscriber {
    user_id: String,
    workspace_id: String,
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: String,
    pub workspace_id: String,
}

/// Upgrade to a WebSocket subscribed to one workspace. Browsers cannot set
/// headers on the upgrade request, so the caller identity comes from the query.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    params: Result<Query<WsParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let WsParams {
        user_id,
        workspace_id,
    } = params;
    let (lookup_user, lookup_ws) = (user_id.clone(), workspace_id.clone());
    let user = state
        .db
        .call(move |db| {
            let user = auth::resolve_user(db, &lookup_user)?;
            auth::require_access(db, &lookup_ws, &user.id, Access::Member)?;
            Ok(user)
        })
        .await?;

    let subscriber = Subscriber {
        user_id,
        workspace_id,
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, subscriber, user.name)))
}

async fn handle_socket(socket: WebSocket, state: SharedState, subscriber: Subscriber, name: String) {
    let (mut sender, receiver) = socket.split();
    let rx = state.notifier.subscribe();

    // Membership may have been revoked between the upgrade check and subscribing.
    if !still_member(&state.db, &subscriber).await {
        let _ = sender.send(Message::Close(None)).await;
        return;
    }
    debug!(user_id = %subscriber.user_id, workspace_id = %subscriber.workspace_id, "socket connected");

    let activity = |action| WsMessage::UserActivity {
        workspace_id: subscriber.workspace_id.clone(),
        user_id: subscriber.user_id.clone(),
        name: name.clone(),
        action,
    };
    broadcast_message(&state.notifier, Some(&subscriber.user_id), &activity(Activity::Joined));

    run_socket_loop(sender, receiver, rx, &state.db, &subscriber).await;

    broadcast_message(&state.notifier, Some(&subscriber.user_id), &activity(Activity::Left));
    debug!(user_id = %subscriber.user_id, workspace_id = %subscriber.workspace_id, "socket closed");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits. A notification that revokes the
/// subscriber's access is forwarded and then closes the socket.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<Notification>,
    db: &DbHandle,
    subscriber: &Subscriber,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(user_id = %subscriber.user_id, "pong timeout, dropping socket");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Broadcast forwarding ────────────────────────────────
            result = rx.recv() => {
                match result {
                    Ok(notification) => {
                        let revoked = notification.revokes(subscriber);
                        if notification.is_for(subscriber)
                            && sender.send(Message::Text(notification.payload.into())).await.is_err()
                        {
                            break;
                        }
                        if revoked {
                            debug!(user_id = %subscriber.user_id, workspace_id = %subscriber.workspace_id, "access revoked, closing socket");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(user_id = %subscriber.user_id, skipped, "socket lagged behind broadcast");
                        // A skipped message may have been a revocation.
                        if !still_member(db, subscriber).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Clients only listen; anything else is ignored.
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

async fn still_member(db: &DbHandle, subscriber: &Subscriber) -> bool {
    let (workspace_id, user_id) = (subscriber.workspace_id.clone(), subscriber.user_id.clone());
    match db
        .call(move |db| auth::require_access(db, &workspace_id, &user_id, Access::Member))
        .await
    {
        Ok(_) => true,
        Err(e) => {
            debug!(user_id = %subscriber.user_id, workspace_id = %subscriber.workspace_id, error = %e, "socket access lost");
            false
        }
    }
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and publish a WsMessage to the sockets of its workspace.
/// Never fails: having no subscribers is normal, and a serialization
/// problem must not undo the mutation that triggered it.
pub fn broadcast_message(tx: &Notifier, origin: Option<&str>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(Notification {
                workspace_id: msg.workspace_id().to_string(),
                origin: origin.map(str::to_string),
                message: Arc::new(msg.clone()),
                payload,
            });
        }
        Err(e) => {
            warn!(error = %e, "failed to serialize WsMessage");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
