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

//! Typed application frames and their envelope encoding.
//!
//! A [`ServerFrame`] is the result of decrypting one transport message and
//! decoding its envelope. Frames are ephemeral: nothing here is stored beyond
//! the dispatch that reacts to it, except RPC responses which are buffered by
//! request id until the waiting caller claims them.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    codec::{Packer, Unpacker},
    common::enums::{ClientMessageType, ServerErrorKind, ServerMessageType},
    error::{CryptologyError, CryptologyResult},
};

/// An ordered application message from the server's outbox.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    /// Server-assigned outbox id.
    pub outbox_id: i64,
    /// Server timestamp of the message.
    pub ts: DateTime<Utc>,
    /// JSON application payload.
    pub payload: Value,
}

/// A server advisory to slow the client's send rate.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleHint {
    /// Severity level; higher means slow down more.
    pub level: u32,
    /// Sequence id of the send that triggered the hint.
    pub sequence_id: i64,
    /// Order id associated with that send, 0 when not applicable.
    pub order_id: i64,
}

/// A broadcast / state-change notice, discriminated by the JSON `"@type"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "@type")]
pub enum BroadcastNotice {
    /// Trading was suspended for the listed pairs.
    TradesSuspended {
        /// Affected trade pairs.
        trade_pairs: Vec<String>,
    },
    /// Trading was resumed for the listed pairs.
    TradesResumed {
        /// Affected trade pairs.
        trade_pairs: Vec<String>,
    },
}

/// One decoded post-handshake frame from the server.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    /// Ordered application message for the read callback.
    Outbox(OutboxMessage),
    /// Response to an earlier RPC request.
    RpcResponse {
        /// Request id the response correlates to.
        request_id: i64,
        /// JSON response payload.
        payload: Value,
    },
    /// Server-reported fault.
    Error {
        /// Error-kind tag.
        kind: ServerErrorKind,
        /// Message string.
        message: String,
    },
    /// Broadcast / state-change notice.
    Broadcast(BroadcastNotice),
    /// Throttle hint.
    Throttling(ThrottleHint),
}

impl ServerFrame {
    /// Decodes a decrypted envelope into a typed frame.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMessageType` for unrecognized tags and
    /// `InvalidPayload` for any malformed field.
    pub fn decode(plaintext: &[u8]) -> CryptologyResult<Self> {
        let mut xdr = Unpacker::new(plaintext);
        let tag = xdr.unpack_enum()?;
        let message_type = ServerMessageType::from_i32(tag)
            .ok_or(CryptologyError::UnsupportedMessageType(tag))?;
        match message_type {
            ServerMessageType::OutboxMessage => {
                let outbox_id = xdr.unpack_hyper()?;
                let ts = decode_timestamp(xdr.unpack_f64()?)?;
                let payload = serde_json::from_str(xdr.unpack_string()?)?;
                Ok(Self::Outbox(OutboxMessage {
                    outbox_id,
                    ts,
                    payload,
                }))
            }
            ServerMessageType::RpcResponse => {
                let request_id = xdr.unpack_hyper()?;
                let payload = serde_json::from_str(xdr.unpack_string()?)?;
                Ok(Self::RpcResponse {
                    request_id,
                    payload,
                })
            }
            ServerMessageType::ErrorMessage => {
                let kind_tag = xdr.unpack_enum()?;
                let kind = ServerErrorKind::from_i32(kind_tag)
                    .ok_or_else(|| {
                        CryptologyError::InvalidPayload(format!("unknown error kind {kind_tag}"))
                    })?;
                let message = xdr.unpack_string()?.to_string();
                Ok(Self::Error { kind, message })
            }
            ServerMessageType::BroadcastMessage => {
                let notice = serde_json::from_str(xdr.unpack_string()?)?;
                Ok(Self::Broadcast(notice))
            }
            ServerMessageType::ThrottlingMessage => {
                let level = xdr.unpack_u32()?;
                let sequence_id = xdr.unpack_hyper()?;
                let order_id = xdr.unpack_hyper()?;
                Ok(Self::Throttling(ThrottleHint {
                    level,
                    sequence_id,
                    order_id,
                }))
            }
        }
    }
}

/// Encodes an inbox-message envelope (before encryption).
///
/// # Errors
///
/// Returns `InvalidPayload` if the payload cannot be serialized.
pub fn encode_inbox(sequence_id: i64, payload: &Value) -> CryptologyResult<Vec<u8>> {
    encode_client_frame(ClientMessageType::InboxMessage, sequence_id, payload)
}

/// Encodes an RPC-request envelope (before encryption).
///
/// # Errors
///
/// Returns `InvalidPayload` if the payload cannot be serialized.
pub fn encode_rpc_request(request_id: i64, payload: &Value) -> CryptologyResult<Vec<u8>> {
    encode_client_frame(ClientMessageType::RpcRequest, request_id, payload)
}

fn encode_client_frame(
    message_type: ClientMessageType,
    id: i64,
    payload: &Value,
) -> CryptologyResult<Vec<u8>> {
    let mut xdr = Packer::new();
    xdr.pack_enum(message_type.as_i32());
    xdr.pack_hyper(id);
    xdr.pack_string(&serde_json::to_string(payload)?);
    Ok(xdr.into_bytes())
}

fn decode_timestamp(epoch_seconds: f64) -> CryptologyResult<DateTime<Utc>> {
    if !epoch_seconds.is_finite() {
        return Err(CryptologyError::InvalidPayload(format!(
            "non-finite timestamp {epoch_seconds}"
        )));
    }
    DateTime::from_timestamp_micros((epoch_seconds * 1e6) as i64).ok_or_else(|| {
        CryptologyError::InvalidPayload(format!("timestamp out of range: {epoch_seconds}"))
    })
}
