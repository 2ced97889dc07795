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

//! XDR-style wire codec for handshake and post-handshake envelopes.
//!
//! Every message exchanged with the server is a flat sequence of big-endian
//! primitives: 32-bit and 64-bit signed integers, IEEE-754 doubles, enum tags
//! encoded as 32-bit integers, and length-prefixed opaque byte strings. The
//! [`Packer`] builds such a sequence; the [`Unpacker`] is a cursor that decodes
//! one, failing with [`WireError::Truncated`] on any read past the end of the
//! buffer. A truncated read means protocol desync, never a recoverable short
//! read.

use thiserror::Error;

/// Wire codec decode error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Premature end of data while decoding a field.
    #[error("Premature end of data: needed {needed} bytes at offset {offset}, {available} remain")]
    Truncated {
        /// Cursor position when the read was attempted.
        offset: usize,
        /// Bytes required by the field.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },
    /// A string field was not valid UTF-8.
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Builder for an outbound wire envelope.
#[derive(Debug, Clone, Default)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    /// Creates an empty packer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a signed 32-bit integer.
    pub fn pack_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends an unsigned 32-bit integer.
    pub fn pack_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a signed 64-bit integer ("hyper").
    pub fn pack_hyper(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends an IEEE-754 double.
    pub fn pack_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends an enum tag, encoded as a signed 32-bit integer.
    pub fn pack_enum(&mut self, value: i32) {
        self.pack_i32(value);
    }

    /// Appends an opaque byte string with a 4-byte length prefix.
    pub fn pack_bytes(&mut self, data: &[u8]) {
        self.pack_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
    }

    /// Appends a UTF-8 string with a 4-byte length prefix.
    pub fn pack_string(&mut self, value: &str) {
        self.pack_bytes(value.as_bytes());
    }

    /// Consumes the packer and returns the encoded envelope.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received wire envelope, decoding fields sequentially.
#[derive(Debug, Clone)]
pub struct Unpacker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    /// Creates a cursor at the start of `buf`.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes remaining from the current position.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a signed 32-bit integer.
    pub fn unpack_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    /// Reads an unsigned 32-bit integer.
    pub fn unpack_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    /// Reads a signed 64-bit integer ("hyper").
    pub fn unpack_hyper(&mut self) -> Result<i64, WireError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    /// Reads an IEEE-754 double.
    pub fn unpack_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    /// Reads an enum tag as its raw 32-bit integer.
    ///
    /// Validation against the declared enum's value set happens at the call
    /// site so unrecognized values can surface as `UnsupportedMessageType`.
    pub fn unpack_enum(&mut self) -> Result<i32, WireError> {
        self.unpack_i32()
    }

    /// Reads a length-prefixed opaque byte string.
    pub fn unpack_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.unpack_u32()? as usize;
        self.take(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn unpack_string(&mut self) -> Result<&'a str, WireError> {
        std::str::from_utf8(self.unpack_bytes()?).map_err(|_| WireError::InvalidUtf8)
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
    fn test_round_trip_mixed_fields() {
        let mut packer = Packer::new();
        packer.pack_enum(3);
        packer.pack_hyper(-42);
        packer.pack_f64(1_514_764_800.25);
        packer.pack_bytes(b"opaque");
        packer.pack_string("{\"@type\":\"Ack\"}");
        let buf = packer.into_bytes();

        let mut xdr = Unpacker::new(&buf);
        assert_eq!(xdr.unpack_enum().unwrap(), 3);
        assert_eq!(xdr.unpack_hyper().unwrap(), -42);
        assert_eq!(xdr.unpack_f64().unwrap(), 1_514_764_800.25);
        assert_eq!(xdr.unpack_bytes().unwrap(), b"opaque");
        assert_eq!(xdr.unpack_string().unwrap(), "{\"@type\":\"Ack\"}");
        assert_eq!(xdr.remaining(), 0);
    }

    #[rstest]
    fn test_empty_byte_string() {
        let mut packer = Packer::new();
        packer.pack_bytes(b"");
        let buf = packer.into_bytes();
        assert_eq!(buf.len(), 4);

        let mut xdr = Unpacker::new(&buf);
        assert_eq!(xdr.unpack_bytes().unwrap(), b"");
    }

    #[rstest]
    fn test_truncated_primitive() {
        let buf = [0u8, 0, 1];
        let mut xdr = Unpacker::new(&buf);
        assert_eq!(
            xdr.unpack_i32(),
            Err(WireError::Truncated {
                offset: 0,
                needed: 4,
                available: 3,
            })
        );
    }

    #[rstest]
    fn test_truncated_byte_string_body() {
        // Length prefix claims 8 bytes but only 2 follow
        let mut packer = Packer::new();
        packer.pack_u32(8);
        let mut buf = packer.into_bytes();
        buf.extend_from_slice(b"ab");

        let mut xdr = Unpacker::new(&buf);
        assert!(matches!(
            xdr.unpack_bytes(),
            Err(WireError::Truncated { needed: 8, .. })
        ));
    }

    #[rstest]
    fn test_invalid_utf8_string() {
        let mut packer = Packer::new();
        packer.pack_bytes(&[0xFF, 0xFE]);
        let buf = packer.into_bytes();

        let mut xdr = Unpacker::new(&buf);
        assert_eq!(xdr.unpack_string(), Err(WireError::InvalidUtf8));
    }
}
