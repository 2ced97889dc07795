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

//! Protocol constants shared across the client.
//!
//! The wire tag values and close codes here are a compatibility contract with
//! the deployed server, not an implementation choice.

use std::time::Duration;

/// Protocol version this client speaks by default.
pub const PROTOCOL_VERSION: u32 = 2;

/// Bounded wait for the server's handshake reply.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Interval at which the server emits heartbeat markers (protocol
/// generations without transport-level ping/pong).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Slack multiplier applied to the heartbeat interval before declaring the
/// connection dead.
pub const HEARTBEAT_SLACK: f64 = 1.5;

/// Dedicated zero-byte heartbeat marker frame. Resets the liveness deadline
/// but is never dispatched as an application frame.
pub const HEARTBEAT_MARKER: &[u8] = b"\x00";

/// Floor for the computed receive timeout: if handling a message took too
/// long the next message should already be in the read buffer.
pub const MIN_RECEIVE_TIMEOUT: Duration = Duration::from_millis(10);

/// Server error message sentinel re-raised as a liveness fault.
pub const TIMEOUT_SENTINEL: &str = "TimeoutError()";

/// Base throttle delay for severity level 0.
pub const THROTTLE_BASE_DELAY: Duration = Duration::from_millis(250);

/// Upper bound on any throttle delay.
pub const THROTTLE_MAX_DELAY: Duration = Duration::from_secs(10);
