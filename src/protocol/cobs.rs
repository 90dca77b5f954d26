//! COBS frame decoding.
//!
//! The firmware encodes every packet with Consistent Overhead Byte Stuffing
//! so that `0x00` can serve as the frame delimiter on the wire. This module
//! decodes one delimiter-stripped frame back into its payload.
//!
//! Malformed frames are reported, not repaired: the delimiter already
//! provides resynchronization at frame boundaries, so the caller simply
//! drops the frame and moves on.

use thiserror::Error;

/// Decoding failure for a single COBS frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CobsError {
    /// A chunk started with the reserved code byte `0x00`.
    #[error("invalid COBS code 0x00")]
    InvalidCode,
    /// A chunk promised more literal bytes than the frame contains.
    #[error("truncated COBS chunk")]
    Truncated,
}

/// Decode a COBS frame without its trailing `0x00` delimiter.
///
/// Each chunk starts with a code byte `c`: `c - 1` literal bytes follow,
/// then an implicit `0x00`. The implicit zero is omitted when `c == 0xFF`
/// (a full-length chunk) and when the chunk ends the frame.
///
/// An empty frame decodes to an empty payload.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>, CobsError> {
    let mut out = Vec::with_capacity(frame.len());
    let mut i = 0;
    while i < frame.len() {
        let code = frame[i];
        if code == 0 {
            return Err(CobsError::InvalidCode);
        }
        i += 1;

        let literals = code as usize - 1;
        let end = i.checked_add(literals).ok_or(CobsError::Truncated)?;
        if end > frame.len() {
            return Err(CobsError::Truncated);
        }

        out.extend_from_slice(&frame[i..end]);
        i = end;

        if code != 0xFF && i < frame.len() {
            out.push(0x00);
        }
    }
    Ok(out)
}
