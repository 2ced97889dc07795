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

//! Handshake engine establishing mutual authentication and session keys.
//!
//! A linear state machine, terminal on success or on any step's failure.
//! All failures are fatal to the connection attempt; retry, if any, is the
//! caller's responsibility by reconnecting.

use crate::{
    codec::{Packer, Unpacker, WireError},
    common::consts::{HANDSHAKE_TIMEOUT, PROTOCOL_VERSION},
    config::CryptologyClientConfig,
    crypto::Cipher,
    error::{CryptologyError, CryptologyResult},
    transport::{TransportEvent, TransportSink, TransportStream},
};

/// Outcome of a completed handshake.
#[derive(Debug)]
pub struct Established {
    /// The server's authoritative last-seen sequence number; the client
    /// resumes numbering from `sequence_id + 1`.
    pub sequence_id: i64,
    /// Cipher for inbound frames, built from the key the server sent.
    pub server_cipher: Cipher,
    /// Negotiated server protocol version; permanently gates which message
    /// tags and per-frame crypto modes are legal for this connection.
    pub server_version: u32,
}

/// Runs the handshake over freshly opened transport halves.
///
/// `client_cipher` holds the symmetric key generated for the client-to-server
/// direction; its raw key bytes are shipped inside the asymmetric hello.
///
/// # Errors
///
/// Any decode or crypto failure is fatal to the connection attempt.
pub async fn perform(
    sink: &mut Box<dyn TransportSink>,
    stream: &mut Box<dyn TransportStream>,
    config: &CryptologyClientConfig,
    client_cipher: &Cipher,
) -> CryptologyResult<Established> {
    // Step 1: asymmetric hello. The only multi-field blob encrypted with the
    // server's long-lived public key.
    let mut hello = Packer::new();
    hello.pack_bytes(config.client_id.as_bytes());
    hello.pack_hyper(config.last_seen_order);
    hello.pack_bytes(client_cipher.key());
    hello.pack_u32(PROTOCOL_VERSION);
    sink.send(config.server_keys.encrypt(&hello.into_bytes())?)
        .await?;
    tracing::debug!("Sent handshake hello");

    // Step 2: server challenge, encrypted for this client's public key.
    let response = expect_binary(stream).await?;
    let plain = config.client_keys.decrypt(&response)?;
    let mut xdr = Unpacker::new(&plain);
    let challenge = xdr.unpack_bytes()?.to_vec();
    let last_seen_sequence = xdr.unpack_hyper()?;
    let server_aes_key = xdr.unpack_bytes()?.to_vec();
    let server_version = match xdr.unpack_u32() {
        Ok(version) => version,
        // Servers predating version negotiation omit the trailing field
        Err(WireError::Truncated { .. }) => 1,
        Err(e) => return Err(e.into()),
    };
    tracing::debug!(
        server_version,
        last_seen_sequence,
        "Received handshake challenge"
    );

    // Step 3: prove possession of the private key matching the claimed
    // identity. Raw signature bytes, not further wrapped.
    sink.send(config.client_keys.sign(&challenge)?).await?;
    tracing::debug!("Sent challenge signature");

    Ok(Established {
        sequence_id: last_seen_sequence,
        server_cipher: Cipher::new(&server_aes_key)?,
        server_version,
    })
}

async fn expect_binary(stream: &mut Box<dyn TransportStream>) -> CryptologyResult<Vec<u8>> {
    match stream.receive(Some(HANDSHAKE_TIMEOUT)).await? {
        TransportEvent::Binary(data) => Ok(data),
        TransportEvent::Close(code) => Err(CryptologyError::from_close_code(code)),
    }
}
