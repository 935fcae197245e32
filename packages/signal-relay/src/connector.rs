// Transport used by bridges to reach a remote source
//
// A connector turns a URL into a stream of inbound frames. The bridge state
// machine only sees `Frame`s, so the websocket client can be swapped for a
// scripted source without touching reconnect logic.

use crate::error::RelayResult;
use async_trait::async_trait;
use futures_util::{future, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Payload received from a remote source
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Inbound frames of one live connection. Ends when the source closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = RelayResult<Frame>> + Send>>;

/// Opens connections to remote sources
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connect to `url` and return its inbound frames.
    ///
    /// Dropping the returned stream closes the connection.
    async fn connect(&self, url: &str) -> RelayResult<FrameStream>;
}

/// Websocket client connector (`ws://` and `wss://`)
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl SourceConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> RelayResult<FrameStream> {
        let (ws_stream, _) = connect_async(url).await?;

        let frames = ws_stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data.to_vec()))),
                // Pings are answered by tungstenite; close ends the stream on the next poll
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                Ok(Message::Close(_)) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(Box::pin(frames))
    }
}
