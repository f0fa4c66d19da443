//! Streaming transport abstraction.
//!
//! The connection manager consumes text frames through [`MarketTransport`]
//! so tests can drive it with scripted channels instead of a live
//! websocket.

use crate::error::MarketError;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Stream of inbound text frames, ending when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, MarketError>> + Send>>;

/// Connects a URL to a frame stream.
#[async_trait]
pub trait MarketTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameStream, MarketError>;
}

/// Production transport over `tokio-tungstenite`.
///
/// Only text frames surface; pings are answered by the library and
/// binary/pong/close frames are dropped. A close frame ends the stream
/// through the underlying connection shutdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl MarketTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<FrameStream, MarketError> {
        let (ws_stream, _) = connect_async(url).await?;
        let frames = ws_stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(_) => None,
                Err(error) => Some(Err(MarketError::from(error))),
            }
        });
        Ok(Box::pin(frames))
    }
}
