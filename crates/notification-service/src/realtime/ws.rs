//! WebSocket 接入
//!
//! `/ws` 路由升级连接后交给网关。Token 依次从 Authorization 头、
//! `token` 查询参数、首个 `auth` 帧中获取；认证失败时先发送
//! `forceDisconnect` 再关闭，连接不会进入注册表。

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, trace, warn};

use super::gateway::{NotificationGateway, REASON_INVALID_TOKEN};
use super::message::{ClientMessage, ServerEvent};

/// 握手查询参数
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub fn router(gateway: Arc<NotificationGateway>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(gateway)
}

/// 升级为 WebSocket 连接
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<NotificationGateway>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers).or(query.token);
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, token))
}

/// 从 `Authorization: Bearer <token>` 中提取 Token
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

async fn handle_socket(mut socket: WebSocket, gateway: Arc<NotificationGateway>, token: Option<String>) {
    let token = match token {
        Some(token) => Some(token),
        None => {
            let wait = Duration::from_secs(gateway.config().auth_timeout_secs.max(1));
            wait_for_auth_frame(&mut socket, wait).await
        }
    };

    let user_id = match gateway.authenticate(token.as_deref()).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(error = %e, "WebSocket 握手认证失败");
            reject(socket, REASON_INVALID_TOKEN).await;
            return;
        }
    };

    let (connection_id, mut rx) = gateway.connect(&user_id);
    let (mut sink, mut stream) = socket.split();

    // 发送任务：把网关事件写到 socket，收到 forceDisconnect 后关闭
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let closing = matches!(event, ServerEvent::ForceDisconnect { .. });
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "事件序列化失败");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                debug!(connection_id = %connection_id, "WebSocket 发送端已关闭");
                break;
            }
            if closing {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let message = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(message) => message,
                    Err(e) => {
                        gateway.registry().send_to_connection(
                            connection_id,
                            ServerEvent::error(format!("无法解析消息: {e}")),
                        );
                        continue;
                    }
                };

                if let Err(e) = gateway.handle_message(connection_id, message).await {
                    // 已被踢下线的连接不再处理后续消息
                    if gateway.registry().meta(connection_id).is_none() {
                        break;
                    }
                    gateway
                        .registry()
                        .send_to_connection(connection_id, ServerEvent::error(e.to_string()));
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                trace!(connection_id = %connection_id, "心跳");
                gateway.registry().touch(connection_id);
            }
            Ok(Message::Binary(_)) => {
                gateway.registry().send_to_connection(
                    connection_id,
                    ServerEvent::error("不支持二进制消息"),
                );
            }
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket 接收错误");
                break;
            }
        }
    }

    gateway.disconnect(connection_id);
    send_task.abort();
    info!(connection_id = %connection_id, user_id = %user_id, "WebSocket 连接结束");
}

/// 等待首个 auth 帧
async fn wait_for_auth_frame(socket: &mut WebSocket, wait: Duration) -> Option<String> {
    let frame = tokio::time::timeout(wait, async {
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(text) => {
                    return match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Auth { token }) => Some(token),
                        _ => None,
                    };
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    })
    .await;

    frame.ok().flatten()
}

async fn reject(mut socket: WebSocket, reason: &str) {
    if let Ok(text) = serde_json::to_string(&ServerEvent::force_disconnect(reason)) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}
