//! # Entry codecs
//!
//! Bit-exact serialize/deserialize of the two on-disk record layouts used by
//! the storage engine: [`CommitEntry`] (commit-log records, tagged) and
//! [`SstEntry`] (per-tag SST records, tagless). Both layouts are
//! little-endian and both are length-prefixed with a `u16 totalLen` when
//! written to a file; neither carries a checksum — corruption below the
//! framing level is reported as [`CodecError::Truncated`].
//!
//! ```text
//! CommitEntry: u16 totalLen || u16 keyLen || key || u64 ts || u64 expiresAt || value
//! SstEntry:    u16 totalLen || u64 ts || u64 expiresAt || value
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Maximum encodable length for either `totalLen` or `keyLen` (both are
/// `u16` on the wire).
pub const MAX_U16_LEN: usize = u16::MAX as usize;

/// Errors raised while encoding or decoding a record.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// `keyLen` or the computed `totalLen` does not fit in a `u16`.
    #[error("value too large to encode (key or total length exceeds 65535 bytes)")]
    ValueTooLarge,

    /// A length prefix was read but the body could not be read in full —
    /// a clean EOF is not an error, but a partial record is.
    #[error("truncated record")]
    Truncated,
}

/// The on-log record written by commit-log `Store` calls (spec §4.1, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub key: Vec<u8>,
    pub timestamp: u64,
    /// `0` means "never expires".
    pub expires_at: u64,
    pub value: Vec<u8>,
}

impl CommitEntry {
    /// `u16 keyLen || key || u64 ts || u64 expiresAt || value`, returned
    /// without the outer `u16 totalLen` prefix.
    pub fn encode_body(&self) -> Result<Vec<u8>, CodecError> {
        if self.key.len() > MAX_U16_LEN {
            return Err(CodecError::ValueTooLarge);
        }
        let mut buf = Vec::with_capacity(2 + self.key.len() + 16 + self.value.len());
        buf.write_u16::<LittleEndian>(self.key.len() as u16)?;
        buf.extend_from_slice(&self.key);
        buf.write_u64::<LittleEndian>(self.timestamp)?;
        buf.write_u64::<LittleEndian>(self.expires_at)?;
        buf.extend_from_slice(&self.value);
        if buf.len() > MAX_U16_LEN {
            return Err(CodecError::ValueTooLarge);
        }
        Ok(buf)
    }

    /// `u16 totalLen || body`, ready to `write_all` to an append-only file.
    pub fn encode_with_length(&self) -> Result<Vec<u8>, CodecError> {
        let body = self.encode_body()?;
        let mut framed = Vec::with_capacity(2 + body.len());
        framed.write_u16::<LittleEndian>(body.len() as u16)?;
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    /// Decodes a record body (without the outer length prefix) of `body_len`
    /// bytes, reading from `r`.
    pub fn decode_body<R: Read>(r: &mut R, body_len: usize) -> Result<Self, CodecError> {
        let mut body = vec![0u8; body_len];
        read_exact_or_truncated(r, &mut body)?;
        Self::decode_from_slice(&body)
    }

    /// Decodes a record body already fully read into memory.
    pub fn decode_from_slice(body: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = body;
        let key_len = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| CodecError::Truncated)? as usize;
        if cursor.len() < key_len + 16 {
            return Err(CodecError::Truncated);
        }
        let mut key = vec![0u8; key_len];
        cursor
            .read_exact(&mut key)
            .map_err(|_| CodecError::Truncated)?;
        let timestamp = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| CodecError::Truncated)?;
        let expires_at = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| CodecError::Truncated)?;
        let value = cursor.to_vec();
        Ok(Self {
            key,
            timestamp,
            expires_at,
            value,
        })
    }
}

/// The per-tag SST record (spec §4.1, §6). Tagless — the tag is implied by
/// which file the record lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstEntry {
    pub timestamp: u64,
    pub expires_at: u64,
    pub value: Vec<u8>,
}

impl SstEntry {
    /// `u64 ts || u64 expiresAt || value`, returned without the outer `u16
    /// totalLen` prefix.
    pub fn encode_body(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(16 + self.value.len());
        buf.write_u64::<LittleEndian>(self.timestamp)?;
        buf.write_u64::<LittleEndian>(self.expires_at)?;
        buf.extend_from_slice(&self.value);
        if buf.len() > MAX_U16_LEN {
            return Err(CodecError::ValueTooLarge);
        }
        Ok(buf)
    }

    /// `u16 totalLen || body`, ready to `write_all` to an SST file.
    pub fn encode_with_length(&self) -> Result<Vec<u8>, CodecError> {
        let body = self.encode_body()?;
        let mut framed = Vec::with_capacity(2 + body.len());
        framed.write_u16::<LittleEndian>(body.len() as u16)?;
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    pub fn decode_body<R: Read>(r: &mut R, body_len: usize) -> Result<Self, CodecError> {
        let mut body = vec![0u8; body_len];
        read_exact_or_truncated(r, &mut body)?;
        Self::decode_from_slice(&body)
    }

    pub fn decode_from_slice(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < 16 {
            return Err(CodecError::Truncated);
        }
        let mut cursor = body;
        let timestamp = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| CodecError::Truncated)?;
        let expires_at = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| CodecError::Truncated)?;
        let value = cursor.to_vec();
        Ok(Self {
            timestamp,
            expires_at,
            value,
        })
    }
}

/// Reads a `u16` length prefix from `r`. Returns `Ok(None)` on a clean EOF
/// (no bytes at all read), `Err(Truncated)` if only part of the prefix was
/// available.
pub fn read_length_prefix<R: Read>(r: &mut R) -> Result<Option<u16>, CodecError> {
    match r.read_u16::<LittleEndian>() {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(CodecError::Io(e)),
    }
}

fn read_exact_or_truncated<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), CodecError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CodecError::Truncated),
        Err(e) => Err(CodecError::Io(e)),
    }
}
