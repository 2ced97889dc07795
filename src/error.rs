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

//! Client fault taxonomy.
//!
//! Three families: protocol faults (fatal, never retried), connection faults
//! (fatal to the current connection but designed to be caught by a
//! caller-level reconnect loop), and key faults (misconfiguration, retrying
//! with the same keys fails identically). Every fault terminates the whole
//! session; the core performs no silent retries.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::{codec::WireError, common::enums::ServerErrorKind};

/// Error type for the Cryptology client.
#[derive(Debug, Clone, Error)]
pub enum CryptologyError {
    // -- Protocol faults ------------------------------------------------------
    /// The server rejected or reported an incompatible protocol version.
    #[error("Incompatible protocol version (server speaks {server_version})")]
    IncompatibleVersion {
        /// Version reported by the server, 0 when unknown.
        server_version: u32,
    },
    /// The server rejected an outbound sequence id.
    #[error("Invalid sequence id")]
    InvalidSequence,
    /// A client order id was reused.
    #[error("Duplicate client order id")]
    DuplicateClientOrderId,
    /// A frame carried a message-type tag this client does not recognize.
    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(i32),
    /// A non-binary transport message was received where a frame was expected.
    #[error("Unsupported message: {0}")]
    UnsupportedMessage(String),
    /// A frame or payload could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// Trading is disabled for the addressed pair.
    #[error("Trades disabled")]
    TradesDisabled,
    /// Generic fault reported by the server.
    #[error("Server fault ({kind}): {message}")]
    ServerFault {
        /// Error-kind tag from the error frame.
        kind: ServerErrorKind,
        /// Message string from the error frame.
        message: String,
    },
    /// An RPC request id was reused while still outstanding.
    #[error("Request id {0} already in flight")]
    RequestInFlight(i64),

    // -- Connection faults ----------------------------------------------------
    /// The transport closed without a recognized close code.
    #[error("Disconnected")]
    Disconnected,
    /// The server refused a second connection for the same identity.
    #[error("Concurrent connection")]
    ConcurrentConnection,
    /// The server is restarting; callers should back off substantially
    /// before reconnecting.
    #[error("Server restart")]
    ServerRestart,
    /// The server closed the connection for rate limiting.
    #[error("Rate limited")]
    RateLimit,
    /// No frame (including heartbeat markers) arrived within the expected
    /// interval.
    #[error("No heartbeat received in time, last seen {last_seen}, now {now}")]
    HeartbeatError {
        /// When the last frame was observed.
        last_seen: DateTime<Utc>,
        /// When the fault was raised.
        now: DateTime<Utc>,
    },
    /// An operation was attempted on a closed session.
    #[error("Not connected")]
    NotConnected,
    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),
    /// A bounded wait expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    // -- Key faults -----------------------------------------------------------
    /// Signature verification or decryption failure; indicates
    /// misconfiguration, not transient failure.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type alias for Cryptology client operations.
pub type CryptologyResult<T> = Result<T, CryptologyError>;

impl CryptologyError {
    /// Maps a transport close code onto the fault taxonomy.
    ///
    /// The code values are a compatibility contract with the deployed server.
    #[must_use]
    pub const fn from_close_code(code: Option<u16>) -> Self {
        match code {
            Some(4000) => Self::ConcurrentConnection,
            Some(4001) => Self::InvalidSequence,
            Some(4002) => Self::DuplicateClientOrderId,
            Some(4009) => Self::RateLimit,
            Some(1012) => Self::ServerRestart,
            _ => Self::Disconnected,
        }
    }

    /// Returns whether a caller-level reconnect loop may reasonably retry
    /// after this fault.
    #[must_use]
    pub const fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::ConcurrentConnection
                | Self::ServerRestart
                | Self::RateLimit
                | Self::HeartbeatError { .. }
                | Self::NotConnected
                | Self::Transport(_)
                | Self::Timeout(_)
        )
    }

    /// Returns whether this fault indicates key misconfiguration.
    #[must_use]
    pub const fn is_key_fault(&self) -> bool {
        matches!(self, Self::InvalidKey(_))
    }
}

impl From<WireError> for CryptologyError {
    fn from(error: WireError) -> Self {
        Self::InvalidPayload(error.to_string())
    }
}

impl From<serde_json::Error> for CryptologyError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidPayload(error.to_string())
    }
}

impl From<tungstenite::Error> for CryptologyError {
    fn from(error: tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some(4000), CryptologyError::ConcurrentConnection)]
    #[case(Some(4001), CryptologyError::InvalidSequence)]
    #[case(Some(4002), CryptologyError::DuplicateClientOrderId)]
    #[case(Some(4009), CryptologyError::RateLimit)]
    #[case(Some(1012), CryptologyError::ServerRestart)]
    #[case(Some(1000), CryptologyError::Disconnected)]
    #[case(None, CryptologyError::Disconnected)]
    fn test_close_code_mapping(#[case] code: Option<u16>, #[case] expected: CryptologyError) {
        assert_eq!(
            std::mem::discriminant(&CryptologyError::from_close_code(code)),
            std::mem::discriminant(&expected),
        );
    }

    #[rstest]
    fn test_fault_families() {
        assert!(CryptologyError::ServerRestart.is_connection_fault());
        assert!(!CryptologyError::InvalidSequence.is_connection_fault());
        assert!(CryptologyError::InvalidKey(String::new()).is_key_fault());
        assert!(!CryptologyError::InvalidKey(String::new()).is_connection_fault());
    }

    #[rstest]
    fn test_wire_error_is_payload_fault() {
        let err: CryptologyError = WireError::InvalidUtf8.into();
        assert!(matches!(err, CryptologyError::InvalidPayload(_)));
    }
}
