//! The write half of the dispatcher link.
//!
//! The raw WebSocket sink is swapped in on connect and swapped out on
//! disconnect. Sending while disconnected is a silent no-op: the agent
//! never buffers unsent messages across reconnects, so a terminal message
//! that races a dead link is simply dropped.

use arc_swap::ArcSwapOption;
use futures::stream::{SplitSink, SplitStream};
use futures::SinkExt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

use crate::prelude::{agent_id, monotonic_millis};

use super::model::{ClientMsg, Envelope};

pub type WsDuplex = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type RawWsSink = SplitSink<WsDuplex, Message>;
pub type WsStream = SplitStream<WsDuplex>;

pub struct WebsocketSink {
    sink: ArcSwapOption<Mutex<RawWsSink>>,
}

impl WebsocketSink {
    pub fn new() -> WebsocketSink {
        WebsocketSink {
            sink: ArcSwapOption::new(None),
        }
    }

    pub fn load_socket(&self, sink: RawWsSink) {
        self.sink.swap(Some(Arc::new(Mutex::new(sink))));
    }

    pub fn clear_socket(&self) {
        self.sink.swap(None);
    }

    pub fn is_connected(&self) -> bool {
        self.sink.load().is_some()
    }

    /// Envelope, serialise and send one message. Returns `Ok(())` without
    /// sending when the link is down.
    pub async fn send_msg(&self, msg: &ClientMsg) -> Result<(), tungstenite::Error> {
        let sink = self.sink.load_full();
        let Some(sink) = sink else {
            tracing::debug!("Link is down, dropping outbound message");
            return Ok(());
        };

        let envelope = Envelope {
            agent_id: agent_id(),
            timestamp: monotonic_millis(),
            msg,
        };
        let mut serialized = serde_json::to_string(&envelope).unwrap();
        serialized.push('\n');
        let result = sink.lock().await.send(Message::text(serialized)).await;
        result
    }
}

impl Default for WebsocketSink {
    fn default() -> Self {
        Self::new()
    }
}
