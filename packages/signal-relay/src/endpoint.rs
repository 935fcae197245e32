use crate::agent::RelayAgent;
use crate::signal::OutputQueue;
use crate::store::SignalStore;
use crate::types::{Sample, SignalKey};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Close reason sent for keys that were never observed
pub const SIGNAL_NOT_FOUND: &str = "Signal not found";

/// Handle a client stream upgrade
pub async fn handle_stream(
    ws: WebSocketUpgrade,
    Path(signal_name): Path<String>,
    State(agent): State<Arc<RelayAgent>>,
) -> Response {
    let store = agent.store();
    let shutdown = agent.shutdown_token();
    ws.on_upgrade(move |socket| serve_signal(socket, store, signal_name, shutdown))
}

/// Live queue registration that is released however the stream ends
struct Subscription {
    store: Arc<SignalStore>,
    key: SignalKey,
    queue: Arc<OutputQueue>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.key, &self.queue);
        debug!("Subscriber detached from {}", self.key);
    }
}

type Sender = SplitSink<WebSocket, Message>;

async fn send_sample(sender: &mut Sender, sample: &Sample) -> bool {
    let json = match serde_json::to_string(&sample.point()) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize sample: {}", e);
            return true;
        }
    };

    if let Err(e) = sender.send(Message::Text(json.into())).await {
        debug!("Failed to send sample: {}", e);
        return false;
    }
    true
}

/// Replay the history of `signal_name`, then forward live samples until the
/// client goes away or the relay shuts down
pub async fn serve_signal(
    socket: WebSocket,
    store: Arc<SignalStore>,
    signal_name: String,
    shutdown: CancellationToken,
) {
    let (mut sender, mut receiver) = socket.split();

    let Some(signal) = store.get(&signal_name) else {
        warn!("Client requested unknown signal {}", signal_name);
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static(SIGNAL_NOT_FOUND),
        };
        let _ = sender.send(Message::Close(Some(frame))).await;
        return;
    };

    let (history, queue) = signal.attach();
    let subscription = Subscription {
        store: Arc::clone(&store),
        key: signal_name.clone(),
        queue,
    };
    info!(
        "Client attached to {} ({} samples in replay)",
        signal_name,
        history.len()
    );

    for sample in &history {
        if !send_sample(&mut sender, sample).await {
            return;
        }
    }

    loop {
        tokio::select! {
            sample = subscription.queue.pop() => {
                if !send_sample(&mut sender, &sample).await {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed stream for {}", signal_name);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Stream error for {}: {}", signal_name, e);
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!("Client stream for {} terminated", signal_name);
}
