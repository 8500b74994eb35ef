// Broker clients: outbound publishing and inbound series subscriptions

pub mod ws_sink;
pub mod ws_source;

pub use ws_sink::WsSink;
pub use ws_source::subscribe_series;

use serde::{Deserialize, Serialize};

use crate::error::GeneratorResult;
use crate::types::Message;

/// Wire format exchanged with the broker: one topic-tagged message per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub payload: Message,
}

/// Outbound message transport. Streaming runs publish through one sink
/// per control loop; batch runs never touch a sink. Sinks are used as
/// generic parameters, never as trait objects.
#[allow(async_fn_in_trait)]
pub trait PublishSink {
    async fn publish(&mut self, topic: &str, message: &Message) -> GeneratorResult<()>;
}

/// In-memory sink collecting published frames, for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub published: Vec<Frame>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PublishSink for MemorySink {
    async fn publish(&mut self, topic: &str, message: &Message) -> GeneratorResult<()> {
        self.published.push(Frame {
            topic: topic.to_string(),
            payload: message.clone(),
        });
        Ok(())
    }
}
