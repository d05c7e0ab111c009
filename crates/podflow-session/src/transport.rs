//! Websocket link between the backend and the in-process event bus.

use futures_util::{SinkExt, StreamExt};
use podflow_core::{decode_frame, encode_frame, SocketFrame, DEFAULT_MAX_FRAME_BYTES};
use podflow_workflow::LocalEventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub struct Transport {
    pub url: Url,
    pub bus: LocalEventBus,
    pub outbound: mpsc::UnboundedReceiver<SocketFrame>,
    /// Woken after inbound frames reach the bus.
    pub inbound: Arc<Notify>,
    pub connected: watch::Sender<bool>,
}

impl Transport {
    /// Connects, relays frames both ways, and reconnects with backoff until
    /// `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if *shutdown.borrow() {
                break;
            }
            let connect = tokio::select! {
                connect = connect_async(self.url.clone()) => connect,
                _ = shutdown.changed() => break,
            };
            let (mut ws, _) = match connect {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "backend_connect_error", url = %self.url, error = %err);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    backoff = next_backoff(backoff);
                    continue;
                }
            };
            backoff = Duration::from_secs(1);
            self.set_connected(true);
            info!(event = "backend_connected", url = %self.url);

            loop {
                tokio::select! {
                    msg = ws.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => self.deliver(&text),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(event = "backend_read_error", error = %err);
                                break;
                            }
                        }
                    }
                    Some(frame) = self.outbound.recv() => {
                        let text = match encode_frame(&frame, DEFAULT_MAX_FRAME_BYTES) {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(event = "frame_encode_error", name = %frame.event, error = %err);
                                continue;
                            }
                        };
                        if ws.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => {
                        let _ = ws.close(None).await;
                        self.set_connected(false);
                        return;
                    }
                }
            }
            let _ = ws.close(None).await;
            self.set_connected(false);
            info!(event = "backend_disconnected", url = %self.url);
        }
        self.set_connected(false);
    }

    fn set_connected(&self, connected: bool) {
        self.bus.set_connected(connected);
        let _ = self.connected.send(connected);
    }

    fn deliver(&self, text: &str) {
        match decode_frame::<SocketFrame>(text, DEFAULT_MAX_FRAME_BYTES) {
            Ok(frame) => {
                let handled = self.bus.deliver_frame(&frame);
                debug!(event = "frame_in", name = %frame.event, handlers = handled);
                self.inbound.notify_one();
            }
            Err(err) => warn!(event = "frame_decode_error", error = %err),
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current + current).min(MAX_BACKOFF)
}
