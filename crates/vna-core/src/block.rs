//! IEEE-488.2 definite-length arbitrary block codec.
//!
//! Instruments frame bulk responses (file transfers, trace dumps) as a
//! definite-length block: `#<N><len-digits><payload>`, where `N` is a single
//! ASCII digit giving the number of digits in the length field and
//! `<len-digits>` are `N` ASCII decimal digits giving the payload length.
//! `#210HelloWorld` carries the 10-byte payload `HelloWorld`.

use bytes::Bytes;
use thiserror::Error;

/// An error produced while decoding a definite-length block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    /// The buffer does not start with the `#` header byte.
    #[error("block does not start with '#' (got {got:?})")]
    MissingHash {
        /// First byte of the buffer, if any.
        got: Option<u8>,
    },

    /// The digit-count byte is not an ASCII digit `1`-`9`.
    ///
    /// `#0` introduces the indefinite-length form, which this codec does not
    /// accept: the instruments served here always declare their length.
    #[error("block digit count must be an ASCII digit 1-9 (got {got:?})")]
    BadDigitCount {
        /// Second byte of the buffer, if any.
        got: Option<u8>,
    },

    /// A byte of the length field is not an ASCII decimal digit.
    #[error("block length field contains a non-digit byte (got {got:?})")]
    BadLengthDigit {
        /// The offending byte, or `None` if the buffer ended early.
        got: Option<u8>,
    },

    /// The buffer holds fewer payload bytes than the header declares.
    #[error("block payload truncated: header declares {expected} bytes, {available} available")]
    Truncated {
        /// Payload length declared by the header.
        expected: usize,
        /// Payload bytes actually present.
        available: usize,
    },
}

/// Parse the block header, returning `(payload_offset, payload_len)`.
fn parse_header(raw: &[u8]) -> Result<(usize, usize), BlockError> {
    match raw.first() {
        Some(b'#') => {}
        got => return Err(BlockError::MissingHash { got: got.copied() }),
    }

    let digits = match raw.get(1) {
        Some(d @ b'1'..=b'9') => usize::from(d - b'0'),
        got => return Err(BlockError::BadDigitCount { got: got.copied() }),
    };

    let mut len = 0usize;
    for offset in 2..2 + digits {
        match raw.get(offset) {
            Some(d) if d.is_ascii_digit() => len = len * 10 + usize::from(d - b'0'),
            got => return Err(BlockError::BadLengthDigit { got: got.copied() }),
        }
    }

    let start = 2 + digits;
    let available = raw.len() - start;
    if available < len {
        return Err(BlockError::Truncated {
            expected: len,
            available,
        });
    }

    Ok((start, len))
}

/// Decode a definite-length block, returning the payload as a subslice.
///
/// Trailing bytes after the payload (message terminators) are ignored. A
/// buffer holding fewer payload bytes than the header declares is an error:
/// a transfer that dropped bytes must never look like a successful one.
pub fn decode(raw: &[u8]) -> Result<&[u8], BlockError> {
    let (start, len) = parse_header(raw)?;
    Ok(&raw[start..start + len])
}

/// Decode a definite-length block from an owned buffer without copying.
///
/// Same contract as [`decode`], but the payload shares the buffer's
/// allocation.
pub fn decode_bytes(raw: &Bytes) -> Result<Bytes, BlockError> {
    let (start, len) = parse_header(raw)?;
    Ok(raw.slice(start..start + len))
}

/// Encode a payload as a definite-length block.
///
/// Payloads must be shorter than 10^9 bytes so the length fits the
/// single-digit count field.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len_digits = payload.len().to_string();
    debug_assert!(len_digits.len() <= 9, "payload too large for block header");

    let mut out = Vec::with_capacity(2 + len_digits.len() + payload.len());
    out.push(b'#');
    out.push(b'0' + len_digits.len() as u8);
    out.extend_from_slice(len_digits.as_bytes());
    out.extend_from_slice(payload);
    out
}
