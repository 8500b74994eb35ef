// Inbound subscription for broker-fed series
//
// One task per XG series. The connection is established eagerly so a
// refused broker fails the run at setup; received values are pushed into
// the series' generated-value channel under the store lock, out-of-band
// with respect to the owning generator's ticks.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::Frame;
use crate::core::history::SharedHistory;
use crate::error::{GeneratorError, GeneratorResult};
use crate::types::Channel;

/// Connect, subscribe to the source topic and spawn the receive loop.
pub async fn subscribe_series(
    series_id: String,
    broker_url: &str,
    source_topic: String,
    history: SharedHistory,
    mut shutdown: watch::Receiver<bool>,
) -> GeneratorResult<JoinHandle<()>> {
    let (ws_stream, _) = connect_async(broker_url)
        .await
        .map_err(|e| GeneratorError::Subscription(format!("{}: {}", broker_url, e)))?;

    let (mut sender, mut receiver) = ws_stream.split();
    let subscribe = json!({
        "event": "subscribe",
        "topic": source_topic,
        "client": Uuid::new_v4().to_string(),
    });
    sender
        .send(WsMessage::Text(subscribe.to_string()))
        .await
        .map_err(|e| GeneratorError::Subscription(format!("{}: {}", source_topic, e)))?;
    info!("📡 Series '{}' subscribed to '{}'", series_id, source_topic);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("🛑 Subscription for '{}' shutting down", series_id);
                        break;
                    }
                }
                incoming = receiver.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_frame(&series_id, &source_topic, &text, &history);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            warn!("⚠️  Broker closed subscription for '{}'", series_id);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("⚠️  Subscription error for '{}': {}", series_id, e);
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(handle)
}

fn handle_frame(series_id: &str, source_topic: &str, text: &str, history: &SharedHistory) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("⚠️  Undecodable frame for '{}': {}", series_id, e);
            return;
        }
    };
    if frame.topic != source_topic {
        return;
    }

    if let Ok(mut store) = history.lock() {
        store.push(series_id, Channel::X, frame.payload.value);
    }
}
