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

//! Session channel: the send side of an established session.
//!
//! [`SessionHandle`] is the cheaply cloneable handle given to the caller's
//! send routine and read callback. It owns the outbound cipher, serializes
//! transport writes, consumes pending throttle delays, and parks RPC callers
//! on one-shot wait slots keyed by request id.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{
    common::consts::{THROTTLE_BASE_DELAY, THROTTLE_MAX_DELAY},
    crypto::{encrypt_and_sign, Cipher, Keys},
    error::{CryptologyError, CryptologyResult},
    transport::TransportSink,
    websocket::messages,
};

/// Converts a throttle severity level into the delay applied to the next
/// outbound application send.
#[must_use]
pub fn delay_for_level(level: u32) -> Duration {
    THROTTLE_BASE_DELAY
        .saturating_mul(1u32 << level.min(16))
        .min(THROTTLE_MAX_DELAY)
}

/// Pending throttle delay, overwritten by each hint and consumed exactly
/// once by the next send.
#[derive(Debug, Default)]
pub(crate) struct ThrottleState {
    delay: Mutex<Option<Duration>>,
}

impl ThrottleState {
    pub(crate) fn set(&self, delay: Duration) {
        *self.delay.lock().expect("throttle lock poisoned") = Some(delay);
    }

    pub(crate) fn take(&self) -> Option<Duration> {
        self.delay.lock().expect("throttle lock poisoned").take()
    }
}

/// One-shot wait slots for outstanding RPC requests, one per request id.
#[derive(Debug, Default)]
pub(crate) struct RpcTracker {
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
}

impl RpcTracker {
    /// Registers a wait slot for `request_id`.
    fn register(&self, request_id: i64) -> CryptologyResult<oneshot::Receiver<Value>> {
        let mut pending = self.pending.lock().expect("rpc lock poisoned");
        if pending.contains_key(&request_id) {
            return Err(CryptologyError::RequestInFlight(request_id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id, tx);
        Ok(rx)
    }

    /// Delivers a response, waking exactly the waiter for `request_id`.
    /// Returns `false` if no waiter is registered.
    pub(crate) fn complete(&self, request_id: i64, payload: Value) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("rpc lock poisoned")
            .remove(&request_id);
        match sender {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    fn discard(&self, request_id: i64) {
        self.pending
            .lock()
            .expect("rpc lock poisoned")
            .remove(&request_id);
    }

    /// Drops all wait slots, failing their waiters with `Disconnected`.
    pub(crate) fn abort_all(&self) {
        self.pending.lock().expect("rpc lock poisoned").clear();
    }
}

pub(crate) struct SessionState {
    version: u32,
    client_keys: Keys,
    client_cipher: Cipher,
    sink: tokio::sync::Mutex<Box<dyn TransportSink>>,
    pub(crate) rpc: RpcTracker,
    pub(crate) throttle: ThrottleState,
    closed: AtomicBool,
}

impl SessionState {
    pub(crate) fn new(
        version: u32,
        client_keys: Keys,
        client_cipher: Cipher,
        sink: Box<dyn TransportSink>,
    ) -> Self {
        Self {
            version,
            client_keys,
            client_cipher,
            sink: tokio::sync::Mutex::new(sink),
            rpc: RpcTracker::default(),
            throttle: ThrottleState::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Encrypts an envelope per the negotiated frame crypto mode: version 1
    /// signs every frame, later versions encrypt directly.
    fn seal(&self, plaintext: &[u8]) -> CryptologyResult<Vec<u8>> {
        if self.version == 1 {
            encrypt_and_sign(&self.client_keys, &self.client_cipher, plaintext)
        } else {
            Ok(self.client_cipher.encrypt(plaintext))
        }
    }
}

/// Handle for sending over an established session.
///
/// Clones share the same underlying session; the handle is what the session
/// driver passes to the caller's send routine and read callback.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionState>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(state),
        }
    }

    /// Returns whether the session has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Sends an ordered application message.
    ///
    /// Consumes any pending throttle delay first (sleeping exactly once),
    /// then encodes, encrypts, and writes. Writes are serialized; two
    /// concurrent sends never interleave on the transport.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` on a closed session, or a transport fault.
    pub async fn send_message(&self, sequence_id: i64, payload: &Value) -> CryptologyResult<()> {
        self.ensure_open()?;
        if let Some(delay) = self.inner.throttle.take() {
            tracing::debug!(?delay, sequence_id, "Applying throttle delay before send");
            tokio::time::sleep(delay).await;
        }
        tracing::debug!(sequence_id, "Sending message");
        let blob = self.inner.seal(&messages::encode_inbox(sequence_id, payload)?)?;
        self.write(blob).await
    }

    /// Sends an RPC request and suspends until its response arrives.
    ///
    /// Multiple concurrent requests with distinct ids are supported without
    /// head-of-line blocking; responses are matched by id, not by order.
    ///
    /// # Errors
    ///
    /// Returns `RequestInFlight` if `request_id` is already outstanding,
    /// `Disconnected` if the session tears down before the response, or a
    /// transport fault.
    pub async fn send_request(&self, request_id: i64, payload: &Value) -> CryptologyResult<Value> {
        self.ensure_open()?;
        let rx = self.inner.rpc.register(request_id)?;
        tracing::debug!(request_id, "Sending RPC request");
        let blob = match messages::encode_rpc_request(request_id, payload)
            .and_then(|plain| self.inner.seal(&plain))
        {
            Ok(blob) => blob,
            Err(e) => {
                self.inner.rpc.discard(request_id);
                return Err(e);
            }
        };
        if let Err(e) = self.write(blob).await {
            self.inner.rpc.discard(request_id);
            return Err(e);
        }
        tracing::debug!(request_id, "Waiting for RPC result");
        rx.await.map_err(|_| CryptologyError::Disconnected)
    }

    async fn write(&self, blob: Vec<u8>) -> CryptologyResult<()> {
        let mut sink = self.inner.sink.lock().await;
        sink.send(blob).await
    }

    fn ensure_open(&self) -> CryptologyResult<()> {
        if self.is_closed() {
            tracing::warn!("The session is closed");
            return Err(CryptologyError::NotConnected);
        }
        Ok(())
    }

    pub(crate) fn complete_rpc(&self, request_id: i64, payload: Value) -> bool {
        self.inner.rpc.complete(request_id, payload)
    }

    pub(crate) fn set_throttle(&self, delay: Duration) {
        self.inner.throttle.set(delay);
    }

    /// Marks the session closed, fails pending RPC waiters, and closes the
    /// transport sink.
    pub(crate) async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.rpc.abort_all();
        let mut sink = self.inner.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!("Error closing transport: {e}");
        }
    }
}
