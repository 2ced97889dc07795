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

//! Client for the Cryptology exchange's authenticated, encrypted,
//! message-oriented WebSocket protocol.
//!
//! The client performs an RSA/AES handshake, then exchanges XDR-framed,
//! AES-encrypted messages over a multiplexed session: ordered application
//! messages, request/response RPC, throttle hints, broadcast notices, and
//! error frames, with client-side liveness monitoring.
//!
//! The entry point is [`run_client`](websocket::run_client), which drives
//! one connection from TCP connect through joint teardown. Reconnection is
//! the caller's concern; every fault carries enough taxonomy
//! ([`CryptologyError::is_connection_fault`]) to decide whether to retry.

pub mod codec;
pub mod common;
pub mod config;
pub mod crypto;
pub mod error;
pub mod transport;
pub mod websocket;

pub use config::CryptologyClientConfig;
pub use crypto::{Cipher, Keys};
pub use error::{CryptologyError, CryptologyResult};
pub use websocket::{
    run_client, ClientWriter, ReadCallback, SessionHandle, SessionOptions, StateChangeCallback,
    ThrottleCallback,
};
