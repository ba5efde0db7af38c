/**
 * WebSocket Endpoint
 *
 * `GET /ws?project_id=<id>` upgrades to a WebSocket after the caller's identity
 * is resolved. Each socket is split: a writer task drains the connection's
 * `ChannelTransport`, while the reader loop parses inbound frames and sends any
 * reply through the same transport, so every frame for one client leaves in
 * order from a single task.
 *
 * The connection is removed from the registry when the client closes, when
 * reading fails, or when the registry itself closes the transport (failed send,
 * stale sweep, shutdown).
 */

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::backend::error::CollabError;
use crate::backend::registry::{ChannelTransport, OutboundFrame, Transport};
use crate::backend::services::CollabServices;
use crate::backend::ws::protocol::{handle_client_message, ConnectionContext};
use crate::shared::{ProjectId, UserId};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub project_id: Option<ProjectId>,
}

/// Upgrade handler for `GET /ws`
pub async fn ws_handler(
    State(services): State<Arc<CollabServices>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = services.identity.resolve(&headers) else {
        tracing::warn!("[Ws] Rejected upgrade without an identity");
        return CollabError::permission("missing user identity").into_response();
    };

    if let Some(project_id) = &params.project_id {
        match services.access.can_join(&user_id, project_id).await {
            Ok(true) => {}
            Ok(false) => {
                return CollabError::permission(format!(
                    "{} may not join project {}",
                    user_id, project_id
                ))
                .into_response();
            }
            Err(e) => return e.into_response(),
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, services, user_id, params.project_id))
}

/// Drive one client connection until either side goes away
pub async fn handle_socket(
    socket: WebSocket,
    services: Arc<CollabServices>,
    user_id: UserId,
    project_id: Option<ProjectId>,
) {
    let (mut sink, mut stream) = socket.split();
    let (transport, mut outbound) = ChannelTransport::new();
    let transport = Arc::new(transport);

    let connection_id = services
        .registry
        .connect(transport.clone(), user_id.clone(), project_id, None)
        .await;
    let ctx = ConnectionContext {
        connection_id,
        user_id,
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::debug!("[Ws] Write failed, closing writer: {}", e);
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                services.registry.touch(connection_id).await;
                continue;
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, "[Ws] Read failed: {}", e);
                break;
            }
        };

        // Evicted by the registry while we were waiting
        if services.registry.connection(connection_id).await.is_none() {
            break;
        }
        services.registry.touch(connection_id).await;

        if let Some(reply) = handle_client_message(&services, &ctx, text.as_str()).await {
            match reply.to_wire() {
                Ok(wire) => {
                    if transport.send(wire).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("[Ws] Failed to encode {} reply: {}", reply.message_type(), e),
            }
        }
    }

    services.registry.disconnect(connection_id).await;
    if let Err(e) = writer.await {
        tracing::debug!("[Ws] Writer task ended abnormally: {:?}", e);
    }
}
