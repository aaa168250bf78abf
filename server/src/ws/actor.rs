use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::connection::{Connection, SendError};

/// Time allowed for the final close frame once a connection is shutting down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for one WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the connection's bounded queue in order
/// - Ping task: sends periodic pings and closes the connection on a missed pong
/// - Reader loop (this task): feeds inbound payloads to the router
///
/// Whichever side notices a problem first closes the `Connection`; the others
/// observe that and wind down. Teardown always unregisters the connection.
pub async fn run_connection(socket: WebSocket, state: AppState, username: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (connection, rx) = Connection::new(state.delivery.outbound_queue_capacity);

    if state.router.connect(&username, connection.clone()).is_err() {
        return;
    }

    tracing::info!(
        username = %username,
        connection_id = %connection.id(),
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(
        ws_sender,
        rx,
        connection.clone(),
        state.delivery.send_timeout(),
    ));

    // One slot is enough: extra pongs carry no information
    let (pong_tx, pong_rx) = mpsc::channel::<()>(1);
    let ping_handle = tokio::spawn(ping_task(
        connection.clone(),
        pong_rx,
        state.delivery.ping_interval(),
        state.delivery.pong_timeout(),
    ));

    let closed = connection.closed();
    tokio::pin!(closed);

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut closed => {
                tracing::debug!(username = %username, "Connection closed by server");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    state.router.handle_payload(&username, text.as_str().as_bytes()).await;
                }
                Message::Binary(data) => {
                    // Clients normally send text, but UTF-8 JSON in a binary frame is accepted
                    state.router.handle_payload(&username, &data).await;
                }
                Message::Pong(_) => {
                    let _ = pong_tx.try_send(());
                }
                Message::Ping(data) => {
                    if let Err(e) = connection.send(Message::Pong(data)) {
                        tracing::debug!(username = %username, error = %e, "Pong not queued");
                    }
                }
                Message::Close(frame) => {
                    tracing::info!(
                        username = %username,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    username = %username,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(username = %username, "WebSocket stream ended");
                break;
            }
        }
    }

    // Unregister first so no new frames are routed here, then stop helpers.
    state.router.disconnect(&username, &connection);
    ping_handle.abort();
    if timeout(CLOSE_TIMEOUT, writer_handle).await.is_err() {
        tracing::debug!(username = %username, "Writer did not finish in time");
    }

    tracing::info!(
        username = %username,
        connection_id = %connection.id(),
        "WebSocket actor stopped"
    );
}

/// Writer task: forwards queued frames to the WebSocket sink, one at a time
/// and in queue order. A write that fails or exceeds `send_timeout` closes
/// the connection.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    connection: Connection,
    send_timeout: Duration,
) {
    let closed = connection.closed();
    tokio::pin!(closed);

    loop {
        let msg = tokio::select! {
            msg = rx.recv() => msg,
            _ = &mut closed => break,
        };
        let Some(msg) = msg else {
            break;
        };

        match timeout(send_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection.id(), error = %e, "WebSocket send failed");
                connection.close();
                return;
            }
            Err(_) => {
                tracing::warn!(connection_id = %connection.id(), "WebSocket send timed out");
                connection.close();
                return;
            }
        }
    }

    let _ = timeout(CLOSE_TIMEOUT, ws_sender.send(Message::Close(None))).await;
}

/// Ping task: sends a ping every `ping_interval` and closes the connection if
/// no pong comes back within `pong_timeout`. Pongs that arrived before the
/// ping was queued do not count. A full outbound queue skips the tick.
async fn ping_task(
    connection: Connection,
    mut pong_rx: mpsc::Receiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    // tokio's interval panics on a zero period
    let mut ping_timer = interval(ping_interval.max(Duration::from_secs(1)));
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        while pong_rx.try_recv().is_ok() {}

        match connection.send(Message::Ping(vec![1, 2, 3, 4].into())) {
            Ok(()) => {}
            Err(SendError::QueueFull) => {
                tracing::debug!(connection_id = %connection.id(), "Outbound queue full, ping skipped");
                continue;
            }
            Err(SendError::Closed) => break,
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(connection_id = %connection.id(), "Pong timeout, closing connection");
                connection.close();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PONG_TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_ping_survives_full_queue() {
        let (connection, mut rx) = Connection::new(1);
        connection.send(Message::Text("backlog".into())).unwrap();
        let (pong_tx, pong_rx) = mpsc::channel(1);
        let handle = tokio::spawn(ping_task(
            connection.clone(),
            pong_rx,
            Duration::from_secs(1),
            PONG_TIMEOUT,
        ));

        // The first tick finds the queue full and is skipped.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(matches!(rx.recv().await, Some(Message::Text(_))));

        let next = timeout(Duration::from_millis(1500), rx.recv()).await.unwrap();
        assert!(matches!(next, Some(Message::Ping(_))));
        pong_tx.try_send(()).unwrap();

        tokio::time::sleep(PONG_TIMEOUT * 2).await;
        assert!(connection.is_open());
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_stale_pong_does_not_answer_ping() {
        let (connection, mut rx) = Connection::new(4);
        let (pong_tx, pong_rx) = mpsc::channel(1);
        // Unsolicited pong before any ping was sent.
        pong_tx.try_send(()).unwrap();
        let handle = tokio::spawn(ping_task(
            connection.clone(),
            pong_rx,
            Duration::from_secs(1),
            PONG_TIMEOUT,
        ));

        timeout(Duration::from_millis(1600), connection.closed())
            .await
            .expect("first unanswered ping closes the connection");
        assert!(matches!(rx.recv().await, Some(Message::Ping(_))));
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
