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

//! Session driver: connect, handshake, then run the session to completion.
//!
//! [`run_client`] owns the full lifecycle of one connection. After the
//! handshake it runs the inbound dispatcher and the caller's send routine
//! concurrently; the first to fault (or finish) tears the whole session
//! down jointly, failing any still-parked RPC waiters. Reconnection policy
//! deliberately lives with the caller, which can inspect
//! [`crate::error::CryptologyError::is_connection_fault`] to decide
//! whether to retry.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, error, info};

use crate::{
    config::CryptologyClientConfig,
    crypto::Cipher,
    error::CryptologyResult,
    transport,
    websocket::{
        channel::{SessionHandle, SessionState},
        handler::{DispatchCallbacks, Dispatcher},
        handshake,
        messages::{BroadcastNotice, OutboxMessage, ThrottleHint},
    },
};

/// Async callback invoked (fire-and-forget) for each inbound outbox message.
pub type ReadCallback = Arc<dyn Fn(SessionHandle, OutboxMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Async callback invoked (fire-and-forget) for each broadcast notice.
pub type StateChangeCallback = Arc<dyn Fn(BroadcastNotice) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked inline for each throttle hint; returning `true`
/// suppresses the automatic send delay.
pub type ThrottleCallback = Arc<dyn Fn(&ThrottleHint) -> bool + Send + Sync>;

/// The caller's send routine, started once the handshake completes.
///
/// Receives a [`SessionHandle`] and the server's authoritative last-seen
/// sequence number; the first [`SessionHandle::send_message`] must use
/// that number plus one.
pub type ClientWriter =
    Box<dyn FnOnce(SessionHandle, i64) -> BoxFuture<'static, CryptologyResult<()>> + Send>;

/// Optional per-session callbacks.
#[derive(Default)]
pub struct SessionOptions {
    /// Receives each inbound outbox message.
    pub read_callback: Option<ReadCallback>,
    /// Observes throttle hints and may suppress the automatic delay.
    pub throttle_callback: Option<ThrottleCallback>,
    /// Receives broadcast / state-change notices.
    pub state_change_callback: Option<StateChangeCallback>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("read_callback", &self.read_callback.is_some())
            .field("throttle_callback", &self.throttle_callback.is_some())
            .field("state_change_callback", &self.state_change_callback.is_some())
            .finish()
    }
}

/// Connects, handshakes, and runs one full session to completion.
///
/// Returns `Ok(())` only when `writer` finishes cleanly; any fault on
/// either side of the session surfaces here after teardown.
///
/// # Errors
///
/// All faults of the taxonomy in [`crate::error`]; connection faults are
/// the retryable subset.
pub async fn run_client(
    config: CryptologyClientConfig,
    options: SessionOptions,
    writer: ClientWriter,
) -> CryptologyResult<()> {
    info!(url = %config.ws_url, client_id = %config.client_id, "Connecting");
    let (mut sink, mut stream) = transport::connect(&config.ws_url).await?;

    let client_cipher = Cipher::random();
    let established = match handshake::perform(&mut sink, &mut stream, &config, &client_cipher).await
    {
        Ok(established) => established,
        Err(e) => {
            error!("Handshake failed: {e}");
            if let Err(close_err) = sink.close().await {
                debug!("Error closing transport: {close_err}");
            }
            return Err(e);
        }
    };
    info!(
        server_version = established.server_version,
        sequence_id = established.sequence_id,
        "Session established",
    );

    let handle = SessionHandle::new(SessionState::new(
        established.server_version,
        config.client_keys.clone(),
        client_cipher,
        sink,
    ));
    let mut dispatcher = Dispatcher::new(
        stream,
        handle.clone(),
        config.server_keys,
        established.server_cipher,
        established.server_version,
        config.heartbeat_interval,
        DispatchCallbacks {
            read: options.read_callback,
            throttle: options.throttle_callback,
            state_change: options.state_change_callback,
        },
    );

    let writer_future = writer(handle.clone(), established.sequence_id);
    // First side to finish tears the session down for both
    let result = tokio::select! {
        result = dispatcher.run() => {
            debug!("Dispatcher finished first");
            result
        }
        result = writer_future => {
            debug!("Writer finished first");
            result
        }
    };

    handle.shutdown().await;
    match &result {
        Ok(()) => info!("Session closed"),
        Err(e) => error!("Session failed: {e}"),
    }
    result
}
