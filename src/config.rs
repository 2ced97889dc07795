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

//! Client session configuration.

use std::time::Duration;

use crate::{common::consts::HEARTBEAT_INTERVAL, crypto::Keys};

/// Configuration for one Cryptology client session.
///
/// A plain value: identity and key material are bound to the session by
/// passing this struct into [`run_client`](crate::websocket::run_client),
/// not by any connection-type machinery.
#[derive(Debug, Clone)]
pub struct CryptologyClientConfig {
    /// Client identity string presented during handshake.
    pub client_id: String,
    /// Client identity keys; the private key must be present (the client
    /// signs the handshake challenge and decrypts the server's reply).
    pub client_keys: Keys,
    /// The server's long-lived public key.
    pub server_keys: Keys,
    /// WebSocket endpoint to connect to.
    pub ws_url: String,
    /// Last durably processed sequence number the client wants to resume
    /// from; the server's declared value wins.
    pub last_seen_order: i64,
    /// Heartbeat interval for the liveness monitor; `None` disables
    /// client-side liveness tracking (transport keepalive generations).
    pub heartbeat_interval: Option<Duration>,
}

impl CryptologyClientConfig {
    /// Creates a configuration with default liveness settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `client_keys` lacks a private key.
    pub fn new(
        client_id: impl Into<String>,
        client_keys: Keys,
        server_keys: Keys,
        ws_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        if !client_keys.has_private() {
            anyhow::bail!("client keys must include a private key");
        }
        Ok(Self {
            client_id: client_id.into(),
            client_keys,
            server_keys,
            ws_url: ws_url.into(),
            last_seen_order: 0,
            heartbeat_interval: Some(HEARTBEAT_INTERVAL),
        })
    }

    /// Sets the sequence number to request resumption from.
    #[must_use]
    pub const fn with_last_seen_order(mut self, last_seen_order: i64) -> Self {
        self.last_seen_order = last_seen_order;
        self
    }

    /// Overrides the liveness heartbeat interval (`None` disables it).
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
