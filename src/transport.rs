// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Abstract duplex message transport boundary.
//!
//! The protocol engine only needs an ordered, reliable byte-message stream:
//! send a binary message, receive a binary message or a close signal. The
//! reference deployment is a WebSocket connection ([`connect`]), but any
//! transport implementing the [`TransportSink`] / [`TransportStream`] pair
//! works, which is also how the integration tests inject mock peers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

use crate::error::{CryptologyError, CryptologyResult};

/// One received transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A binary message.
    Binary(Vec<u8>),
    /// The peer closed the connection, with an optional close code.
    Close(Option<u16>),
}

/// Write half of a duplex message transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Sends one binary message.
    async fn send(&mut self, data: Vec<u8>) -> CryptologyResult<()>;

    /// Closes the transport.
    async fn close(&mut self) -> CryptologyResult<()>;
}

/// Read half of a duplex message transport.
#[async_trait]
pub trait TransportStream: Send {
    /// Receives the next transport message, bounded by `timeout` when given.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the bound expires, `Transport` on stream
    /// failure, or `UnsupportedMessage` for non-binary application messages.
    async fn receive(&mut self, timeout: Option<Duration>) -> CryptologyResult<TransportEvent>;
}

/// Connects to a WebSocket endpoint and returns the split transport halves.
///
/// # Errors
///
/// Returns `Transport` if the connection attempt fails.
pub async fn connect(
    url: &str,
) -> CryptologyResult<(Box<dyn TransportSink>, Box<dyn TransportStream>)> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    let (sink, stream) = ws.split();
    Ok((
        Box::new(WsSink { inner: sink }),
        Box::new(WsStream { inner: stream }),
    ))
}

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    inner: SplitSink<WsConnection, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, data: Vec<u8>) -> CryptologyResult<()> {
        self.inner.send(Message::Binary(data)).await?;
        Ok(())
    }

    async fn close(&mut self) -> CryptologyResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}

struct WsStream {
    inner: SplitStream<WsConnection>,
}

#[async_trait]
impl TransportStream for WsStream {
    async fn receive(&mut self, timeout: Option<Duration>) -> CryptologyResult<TransportEvent> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let next = self.inner.next();
            let msg = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::timeout(remaining, next)
                        .await
                        .map_err(|_| CryptologyError::Timeout("receive timed out".to_string()))?
                }
                None => next.await,
            };
            match msg {
                None => return Ok(TransportEvent::Close(None)),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Binary(data))) => return Ok(TransportEvent::Binary(data)),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(TransportEvent::Close(frame.map(|f| u16::from(f.code))));
                }
                // Control frames are transport-internal; pongs are queued
                // automatically by tungstenite.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Text(text))) => {
                    return Err(CryptologyError::UnsupportedMessage(format!(
                        "unexpected text message: {text:.64}"
                    )));
                }
            }
        }
    }
}
