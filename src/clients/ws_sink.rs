// WebSocket publish sink

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::info;
use uuid::Uuid;

use crate::clients::{Frame, PublishSink};
use crate::error::{GeneratorError, GeneratorResult};
use crate::types::Message;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsSink {
    sender: SplitSink<WsStream, WsMessage>,
    // kept alive so the broker does not see a half-closed connection
    _receiver: SplitStream<WsStream>,
    client_id: String,
}

impl WsSink {
    pub async fn connect(url: &str) -> GeneratorResult<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| GeneratorError::SinkConnection(format!("{}: {}", url, e)))?;
        info!("✅ Connected to broker at {}", url);

        let (mut sender, receiver) = ws_stream.split();
        let client_id = Uuid::new_v4().to_string();

        let hello = json!({
            "event": "hello",
            "client": client_id,
        });
        sender
            .send(WsMessage::Text(hello.to_string()))
            .await
            .map_err(|e| GeneratorError::SinkConnection(e.to_string()))?;

        Ok(Self {
            sender,
            _receiver: receiver,
            client_id,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn close(mut self) -> GeneratorResult<()> {
        self.sender
            .send(WsMessage::Close(None))
            .await
            .map_err(|e| GeneratorError::PublishFault(e.to_string()))?;
        Ok(())
    }
}

impl PublishSink for WsSink {
    async fn publish(&mut self, topic: &str, message: &Message) -> GeneratorResult<()> {
        let frame = Frame {
            topic: topic.to_string(),
            payload: message.clone(),
        };
        let text = serde_json::to_string(&frame)?;
        self.sender
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| GeneratorError::PublishFault(format!("{}: {}", topic, e)))?;
        Ok(())
    }
}
