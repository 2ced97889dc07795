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

//! Wire enumerations for post-handshake message envelopes.
//!
//! The integer values must round-trip with the deployed server; decoding an
//! unrecognized value fails with `UnsupportedMessageType` at the call site.

use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::CryptologyError;

/// Message tags for client-to-server frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, EnumString)]
#[repr(i32)]
pub enum ClientMessageType {
    /// Ordered application message carrying a client-assigned sequence id.
    InboxMessage = 1,
    /// RPC-style request correlated by a client-assigned request id.
    RpcRequest = 2,
}

impl ClientMessageType {
    /// Returns the wire tag value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Message tags for server-to-client frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, EnumString)]
#[repr(i32)]
pub enum ServerMessageType {
    /// Ordered application message delivered to the read callback.
    OutboxMessage = 1,
    /// Response to an earlier RPC request, matched by request id.
    RpcResponse = 2,
    /// Server-reported fault, fatal to the session.
    ErrorMessage = 3,
    /// Broadcast or state-change notice.
    BroadcastMessage = 4,
    /// Advisory telling the client to slow its send rate.
    ThrottlingMessage = 5,
}

impl ServerMessageType {
    /// Resolves a wire tag value, `None` for unrecognized tags.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::OutboxMessage),
            2 => Some(Self::RpcResponse),
            3 => Some(Self::ErrorMessage),
            4 => Some(Self::BroadcastMessage),
            5 => Some(Self::ThrottlingMessage),
            _ => None,
        }
    }

    /// Returns the wire tag value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Error-kind tag carried by server error frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, EnumString)]
#[repr(i32)]
pub enum ServerErrorKind {
    /// Generic server-reported fault.
    General = 0,
    /// The sequence id was rejected by the server.
    InvalidSequence = 1,
    /// A client order id was reused.
    DuplicateClientOrderId = 2,
    /// The application payload could not be processed.
    InvalidPayload = 3,
    /// Trading is disabled for the addressed pair.
    TradesDisabled = 4,
    /// The server rejected the negotiated protocol version.
    IncompatibleVersion = 5,
}

impl ServerErrorKind {
    /// Resolves a wire tag value, `None` for unrecognized tags.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::General),
            1 => Some(Self::InvalidSequence),
            2 => Some(Self::DuplicateClientOrderId),
            3 => Some(Self::InvalidPayload),
            4 => Some(Self::TradesDisabled),
            5 => Some(Self::IncompatibleVersion),
            _ => None,
        }
    }

    /// Maps this error kind onto the client fault taxonomy.
    #[must_use]
    pub fn into_fault(self, message: String) -> CryptologyError {
        match self {
            Self::InvalidSequence => CryptologyError::InvalidSequence,
            Self::DuplicateClientOrderId => CryptologyError::DuplicateClientOrderId,
            Self::InvalidPayload => CryptologyError::InvalidPayload(message),
            Self::TradesDisabled => CryptologyError::TradesDisabled,
            Self::IncompatibleVersion => CryptologyError::IncompatibleVersion { server_version: 0 },
            Self::General => CryptologyError::ServerFault {
                kind: self,
                message,
            },
        }
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
    #[case(1, Some(ServerMessageType::OutboxMessage))]
    #[case(2, Some(ServerMessageType::RpcResponse))]
    #[case(3, Some(ServerMessageType::ErrorMessage))]
    #[case(4, Some(ServerMessageType::BroadcastMessage))]
    #[case(5, Some(ServerMessageType::ThrottlingMessage))]
    #[case(0, None)]
    #[case(99, None)]
    fn test_server_message_type_from_i32(
        #[case] value: i32,
        #[case] expected: Option<ServerMessageType>,
    ) {
        assert_eq!(ServerMessageType::from_i32(value), expected);
    }

    #[rstest]
    fn test_tags_round_trip() {
        assert_eq!(ClientMessageType::InboxMessage.as_i32(), 1);
        assert_eq!(ClientMessageType::RpcRequest.as_i32(), 2);
        assert_eq!(
            ServerMessageType::from_i32(ServerMessageType::ThrottlingMessage.as_i32()),
            Some(ServerMessageType::ThrottlingMessage)
        );
    }

    #[rstest]
    fn test_error_kind_maps_to_taxonomy() {
        assert!(matches!(
            ServerErrorKind::InvalidSequence.into_fault(String::new()),
            CryptologyError::InvalidSequence
        ));
        assert!(matches!(
            ServerErrorKind::General.into_fault("boom".to_string()),
            CryptologyError::ServerFault { .. }
        ));
    }
}
