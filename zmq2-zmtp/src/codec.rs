//! ZMTP 1.0 framing.
//!
//! Every frame is a length, a flags byte and the payload. The length counts
//! the flags byte too, so it is always at least 1:
//!
//! ```text
//! short: [len + 1: u8][flags][payload]            when len + 1 <= 254
//! long:  [0xFF][len + 1: u64 BE][flags][payload]  otherwise
//! ```
//!
//! Flag bit 0 (MORE) is set on every frame of a multipart message except the
//! last. The format has no resynchronisation marker, so a corrupt length is
//! fatal to the stream carrying it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use zmq2_core::error::ZmqError;
use zmq2_core::options::DEFAULT_MAX_FRAME_SIZE;

/// One multipart message.
pub type Multipart = Vec<Bytes>;

/// Escape byte introducing the 8-byte length form.
pub const LONG_LENGTH_ESCAPE: u8 = 0xFF;

/// MORE flag: another frame of the same message follows.
pub const FLAG_MORE: u8 = 0x01;

/// Largest `len + 1` encodable in the one-byte form.
const SHORT_LENGTH_MAX: usize = 254;

const SHORT_HEADER_LEN: usize = 2;
const LONG_HEADER_LEN: usize = 10;

/// Framing errors. Any of them terminates the stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Protocol violation: zero length prefix")]
    ZeroLength,

    #[error("Protocol violation: frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: u64, max: usize },
}

impl From<CodecError> for ZmqError {
    fn from(err: CodecError) -> Self {
        Self::malformed(err.to_string())
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Number of bytes `encode_frame` produces for a payload of `len` bytes.
#[inline]
pub const fn encoded_frame_len(len: usize) -> usize {
    if len + 1 <= SHORT_LENGTH_MAX {
        SHORT_HEADER_LEN + len
    } else {
        LONG_HEADER_LEN + len
    }
}

/// Append one frame to `dst`.
pub fn encode_frame(dst: &mut BytesMut, payload: &[u8], more: bool) {
    let flags = if more { FLAG_MORE } else { 0 };
    let length = payload.len() + 1;

    dst.reserve(encoded_frame_len(payload.len()));
    if length <= SHORT_LENGTH_MAX {
        dst.put_u8(length as u8);
    } else {
        dst.put_u8(LONG_LENGTH_ESCAPE);
        dst.put_u64(length as u64);
    }
    dst.put_u8(flags);
    dst.put_slice(payload);
}

/// Encode a whole message into one buffer.
///
/// PUB sockets encode a message once and hand the same bytes to every peer.
pub fn encode_message<B: AsRef<[u8]>>(frames: &[B]) -> Bytes {
    let size = frames
        .iter()
        .map(|f| encoded_frame_len(f.as_ref().len()))
        .sum();
    let mut dst = BytesMut::with_capacity(size);
    let last = frames.len().saturating_sub(1);
    for (i, frame) in frames.iter().enumerate() {
        encode_frame(&mut dst, frame.as_ref(), i < last);
    }
    dst.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for a length prefix and flags byte.
    Header,
    /// Header consumed; waiting for `len` payload bytes.
    Body { len: usize, more: bool },
}

/// Incremental ZMTP 1.0 decoder.
///
/// Bytes are fed as they arrive; complete messages are pulled out with
/// [`decode`](Self::decode). Header bytes are consumed as soon as they are
/// parsed, so nothing is rescanned when a frame spans several reads.
///
/// ```
/// use bytes::Bytes;
/// use zmq2_zmtp::codec::{encode_message, FrameDecoder};
///
/// let wire = encode_message(&[Bytes::from_static(b"topic"), Bytes::from_static(b"body")]);
/// let mut decoder = FrameDecoder::new();
///
/// decoder.feed(&wire[..3]);
/// assert_eq!(decoder.decode().unwrap(), None);
///
/// decoder.feed(&wire[3..]);
/// let message = decoder.decode().unwrap().unwrap();
/// assert_eq!(message, vec![Bytes::from_static(b"topic"), Bytes::from_static(b"body")]);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecodeState,
    frames: Multipart,
    max_frame_size: Option<usize>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecodeState::Header,
            frames: Vec::new(),
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
        }
    }

    /// Decoder rejecting frames with payloads larger than `max`, or
    /// accepting any length when `max` is `None`.
    #[must_use]
    pub fn with_max_frame_size(max: Option<usize>) -> Self {
        Self {
            max_frame_size: max,
            ..Self::new()
        }
    }

    /// Append received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet part of a returned message (excluding
    /// frames already decoded into the pending message).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next complete message, if the buffered bytes hold one.
    ///
    /// Returns:
    /// - Ok(Some(message)) → message decoded
    /// - Ok(None) → need more data
    /// - Err → protocol violation; the stream must be closed
    pub fn decode(&mut self) -> Result<Option<Multipart>> {
        loop {
            match self.state {
                DecodeState::Header => {
                    let Some((header_len, length)) = self.peek_length()? else {
                        return Ok(None);
                    };
                    if self.buffer.len() < header_len {
                        return Ok(None);
                    }
                    let flags = self.buffer[header_len - 1];
                    self.buffer.advance(header_len);
                    self.state = DecodeState::Body {
                        len: length,
                        more: flags & FLAG_MORE != 0,
                    };
                }
                DecodeState::Body { len, more } => {
                    if self.buffer.len() < len {
                        return Ok(None);
                    }
                    let frame = self.buffer.split_to(len).freeze();
                    self.frames.push(frame);
                    self.state = DecodeState::Header;
                    if !more {
                        return Ok(Some(std::mem::take(&mut self.frames)));
                    }
                }
            }
        }
    }

    /// Feed `data` and collect every message completed by it.
    pub fn decode_all(&mut self, data: &[u8]) -> Result<Vec<Multipart>> {
        self.feed(data);
        let mut messages = Vec::new();
        while let Some(message) = self.decode()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Parse the length prefix at the head of the buffer.
    ///
    /// Returns the full header length (including the flags byte) and the
    /// payload length, or `None` if the length itself is incomplete.
    fn peek_length(&self) -> Result<Option<(usize, usize)>> {
        let Some(&first) = self.buffer.first() else {
            return Ok(None);
        };

        let (header_len, length) = if first == LONG_LENGTH_ESCAPE {
            if self.buffer.len() < LONG_HEADER_LEN - 1 {
                return Ok(None);
            }
            let mut raw = &self.buffer[1..LONG_HEADER_LEN - 1];
            (LONG_HEADER_LEN, raw.get_u64())
        } else {
            (SHORT_HEADER_LEN, u64::from(first))
        };

        if length == 0 {
            return Err(CodecError::ZeroLength);
        }
        let size = length - 1;
        let limit = self.max_frame_size.unwrap_or(usize::MAX);
        match usize::try_from(size) {
            Ok(size) if size <= limit => Ok(Some((header_len, size))),
            _ => Err(CodecError::FrameTooLarge { size, max: limit }),
        }
    }
}

/// Split a routed message at its first empty delimiter frame into
/// `(envelope, body)`. Returns `None` when there is no delimiter.
pub fn split_envelope(mut message: Multipart) -> Option<(Multipart, Multipart)> {
    let delimiter = message.iter().position(|frame| frame.is_empty())?;
    let body = message.split_off(delimiter + 1);
    message.truncate(delimiter);
    Some((message, body))
}
