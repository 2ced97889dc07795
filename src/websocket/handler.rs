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

//! Inbound frame dispatcher and liveness monitoring.
//!
//! The [`Dispatcher`] owns the read half of an established session: it
//! receives transport messages under a liveness deadline, decrypts and
//! decodes them, and fans each frame out to its consumer. Its `run` loop
//! only returns on a fault; a clean server-side close is itself a
//! connection fault (`Disconnected` or the close-code mapping).

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    common::consts::{HEARTBEAT_MARKER, HEARTBEAT_SLACK, MIN_RECEIVE_TIMEOUT, TIMEOUT_SENTINEL},
    crypto::{decrypt_and_verify, Cipher, Keys},
    error::{CryptologyError, CryptologyResult},
    transport::{TransportEvent, TransportStream},
    websocket::{
        channel::{delay_for_level, SessionHandle},
        client::{ReadCallback, StateChangeCallback, ThrottleCallback},
        messages::ServerFrame,
    },
};

/// Tracks when the server was last heard from and derives the bounded wait
/// for the next receive.
///
/// Any inbound frame counts as proof of life, including the dedicated
/// heartbeat marker which exists solely to keep an otherwise idle
/// connection alive.
pub(crate) struct LivenessMonitor {
    interval: Option<Duration>,
    last_seen_at: Instant,
    last_seen_wall: DateTime<Utc>,
}

impl LivenessMonitor {
    pub(crate) fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_seen_at: Instant::now(),
            last_seen_wall: Utc::now(),
        }
    }

    /// Records proof of life, pushing the deadline forward.
    pub(crate) fn touch(&mut self) {
        self.last_seen_at = Instant::now();
        self.last_seen_wall = Utc::now();
    }

    /// Returns the bounded wait for the next receive, or `None` when
    /// monitoring is disabled.
    ///
    /// The deadline is the last proof of life plus the interval with slack;
    /// the result is floored so that a slow handler cannot starve a message
    /// already sitting in the read buffer.
    pub(crate) fn receive_timeout(&self) -> Option<Duration> {
        let interval = self.interval?;
        let deadline = self.last_seen_at + interval.mul_f64(HEARTBEAT_SLACK);
        let remaining = deadline.saturating_duration_since(Instant::now());
        Some(remaining.max(MIN_RECEIVE_TIMEOUT))
    }

    pub(crate) fn fault(&self) -> CryptologyError {
        CryptologyError::HeartbeatError {
            last_seen: self.last_seen_wall,
            now: Utc::now(),
        }
    }
}

/// Callbacks a session fans inbound frames out to. All are optional; an
/// absent callback downgrades its frames to a debug log line.
#[derive(Default)]
pub(crate) struct DispatchCallbacks {
    pub(crate) read: Option<ReadCallback>,
    pub(crate) throttle: Option<ThrottleCallback>,
    pub(crate) state_change: Option<StateChangeCallback>,
}

pub(crate) struct Dispatcher {
    stream: Box<dyn TransportStream>,
    handle: SessionHandle,
    server_keys: Keys,
    server_cipher: Cipher,
    version: u32,
    liveness: LivenessMonitor,
    callbacks: DispatchCallbacks,
}

impl Dispatcher {
    pub(crate) fn new(
        stream: Box<dyn TransportStream>,
        handle: SessionHandle,
        server_keys: Keys,
        server_cipher: Cipher,
        version: u32,
        heartbeat_interval: Option<Duration>,
        callbacks: DispatchCallbacks,
    ) -> Self {
        Self {
            stream,
            handle,
            server_keys,
            server_cipher,
            version,
            liveness: LivenessMonitor::new(heartbeat_interval),
            callbacks,
        }
    }

    /// Receives and dispatches frames until a fault occurs.
    pub(crate) async fn run(&mut self) -> CryptologyResult<()> {
        loop {
            let event = match self.stream.receive(self.liveness.receive_timeout()).await {
                Ok(event) => event,
                Err(CryptologyError::Timeout(_)) => return Err(self.liveness.fault()),
                Err(e) => return Err(e),
            };
            match event {
                TransportEvent::Close(code) => {
                    debug!(?code, "Server closed the connection");
                    return Err(CryptologyError::from_close_code(code));
                }
                TransportEvent::Binary(data) => {
                    self.liveness.touch();
                    if data == HEARTBEAT_MARKER {
                        debug!("Received heartbeat marker");
                        continue;
                    }
                    let frame = ServerFrame::decode(&self.open(&data)?)?;
                    self.dispatch(frame)?;
                }
            }
        }
    }

    /// Decrypts one transport message per the negotiated frame crypto mode.
    fn open(&self, data: &[u8]) -> CryptologyResult<Vec<u8>> {
        if self.version == 1 {
            decrypt_and_verify(&self.server_keys, &self.server_cipher, data)
        } else {
            self.server_cipher.decrypt(data)
        }
    }

    fn dispatch(&self, frame: ServerFrame) -> CryptologyResult<()> {
        match frame {
            ServerFrame::Outbox(msg) => {
                debug!(outbox_id = msg.outbox_id, "Received outbox message");
                match &self.callbacks.read {
                    Some(callback) => {
                        // Fire-and-forget so a slow consumer cannot stall
                        // liveness monitoring
                        let callback = callback.clone();
                        let handle = self.handle.clone();
                        tokio::spawn(async move { callback(handle, msg).await });
                    }
                    None => debug!("No read callback registered, dropping message"),
                }
                Ok(())
            }
            ServerFrame::RpcResponse {
                request_id,
                payload,
            } => {
                debug!(request_id, "Received RPC response");
                if !self.handle.complete_rpc(request_id, payload) {
                    warn!(request_id, "No waiter for RPC response");
                }
                Ok(())
            }
            ServerFrame::Throttling(hint) => {
                let delay = delay_for_level(hint.level);
                warn!(
                    level = hint.level,
                    sequence_id = hint.sequence_id,
                    order_id = hint.order_id,
                    ?delay,
                    "Received throttling message",
                );
                let suppressed = self
                    .callbacks
                    .throttle
                    .as_ref()
                    .is_some_and(|callback| callback(&hint));
                if suppressed {
                    debug!("Throttle delay suppressed by callback");
                } else {
                    self.handle.set_throttle(delay);
                }
                Ok(())
            }
            ServerFrame::Error { kind, message } => {
                // The server reports its own read timeout as a plain error
                // frame; surface it as the liveness fault it is.
                if message == TIMEOUT_SENTINEL {
                    return Err(self.liveness.fault());
                }
                Err(kind.into_fault(message))
            }
            ServerFrame::Broadcast(notice) => {
                debug!(?notice, "Received broadcast message");
                match &self.callbacks.state_change {
                    Some(callback) => {
                        let callback = callback.clone();
                        tokio::spawn(async move { callback(notice).await });
                    }
                    None => debug!("No state-change callback registered"),
                }
                Ok(())
            }
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
    use crate::common::consts::HEARTBEAT_INTERVAL;

    #[rstest]
    fn test_liveness_disabled_yields_no_timeout() {
        let liveness = LivenessMonitor::new(None);
        assert_eq!(liveness.receive_timeout(), None);
    }

    #[rstest]
    fn test_liveness_timeout_includes_slack() {
        let liveness = LivenessMonitor::new(Some(HEARTBEAT_INTERVAL));
        let timeout = liveness.receive_timeout().unwrap();
        assert!(timeout <= HEARTBEAT_INTERVAL.mul_f64(HEARTBEAT_SLACK));
        assert!(timeout > HEARTBEAT_INTERVAL);
    }

    #[rstest]
    fn test_liveness_timeout_floored_after_deadline() {
        let mut liveness = LivenessMonitor::new(Some(Duration::from_millis(1)));
        liveness.last_seen_at = Instant::now() - Duration::from_secs(60);
        assert_eq!(liveness.receive_timeout(), Some(MIN_RECEIVE_TIMEOUT));
    }

    #[rstest]
    fn test_liveness_touch_extends_deadline() {
        let mut liveness = LivenessMonitor::new(Some(HEARTBEAT_INTERVAL));
        liveness.last_seen_at = Instant::now() - Duration::from_secs(60);
        liveness.touch();
        assert!(liveness.receive_timeout().unwrap() > HEARTBEAT_INTERVAL);
    }

    #[rstest]
    fn test_liveness_fault_reports_last_seen() {
        let liveness = LivenessMonitor::new(Some(HEARTBEAT_INTERVAL));
        match liveness.fault() {
            CryptologyError::HeartbeatError { last_seen, now } => assert!(last_seen <= now),
            other => panic!("unexpected fault: {other}"),
        }
    }
}
