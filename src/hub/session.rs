use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::{ConnectionHub, NotificationMessage};
use crate::config::HubConfig;

/// Drive one websocket for `user_id` until either side gives up, then
/// unregister it from the hub.
pub async fn run(hub: ConnectionHub, config: HubConfig, user_id: i64, socket: WebSocket) {
    let subscription = match hub.connect(user_id).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::warn!(user_id, "Rejecting websocket: {}", e);
            return;
        }
    };
    let connection_id = subscription.connection_id;
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_pump(sink, subscription.receiver, config.clone()));
    let mut reader = tokio::spawn(read_pump(stream, hub.clone(), config, user_id));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.disconnect(user_id, connection_id).await;
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<NotificationMessage>,
    config: HubConfig,
) {
    let write_wait = config.write_wait();
    let mut ping = interval(config.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ping.tick().await;

    loop {
        let frame = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => match serde_json::to_string(&message) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::warn!("Unencodable notification: {}", e);
                        continue;
                    }
                },
                None => {
                    let _ = timeout(write_wait, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!("Websocket write failed: {}", e);
                return;
            }
            Err(_) => {
                tracing::debug!("Websocket write timed out");
                return;
            }
        }
    }
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    hub: ConnectionHub,
    config: HubConfig,
    user_id: i64,
) {
    let pong_wait = config.pong_wait();
    loop {
        let frame = match timeout(pong_wait, stream.next()).await {
            Err(_) => {
                tracing::info!(user_id, "Websocket idle, closing");
                return;
            }
            Ok(None) | Ok(Some(Err(_))) => return,
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let Some(message) = inbound_message(text.as_str(), user_id) else {
                    tracing::debug!(user_id, "Ignoring malformed websocket message");
                    continue;
                };
                if hub.route(message).await.is_err() {
                    return;
                }
            }
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

/// Parse a client frame. The sender is always the authenticated user,
/// whatever the frame claims.
fn inbound_message(text: &str, user_id: i64) -> Option<NotificationMessage> {
    let mut message: NotificationMessage = serde_json::from_str(text).ok()?;
    message.from = user_id;
    Some(message)
}
