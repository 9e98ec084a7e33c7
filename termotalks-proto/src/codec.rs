//! JSON frame encoding for [`Message`].
//!
//! One WebSocket frame carries exactly one JSON object, so no length prefix is
//! needed. Decoding enforces a size cap before parsing.

use crate::message::Message;

/// Error returned when an inbound frame cannot be turned into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a valid JSON message object.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A binary frame did not contain UTF-8 text.
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    /// The frame exceeds the configured size limit.
    #[error("frame too large ({size} bytes, max {max} bytes)")]
    FrameTooLarge {
        /// Actual size of the frame in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Error returned when a [`Message`] cannot be serialized.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Encodes a [`Message`] into its JSON text frame.
///
/// # Errors
///
/// Returns [`EncodeError`] if serialization fails.
pub fn encode(message: &Message) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes a text frame into a [`Message`], rejecting frames over `max_size`.
///
/// # Errors
///
/// Returns [`DecodeError::FrameTooLarge`] for oversized frames and
/// [`DecodeError::Malformed`] when the text is not a message object.
pub fn decode(text: &str, max_size: usize) -> Result<Message, DecodeError> {
    check_size(text.len(), max_size)?;
    Ok(serde_json::from_str(text)?)
}

/// Decodes a binary frame holding UTF-8 JSON into a [`Message`].
///
/// # Errors
///
/// Returns [`DecodeError::NotUtf8`] if the bytes are not UTF-8, otherwise the
/// same errors as [`decode`].
pub fn decode_bytes(bytes: &[u8], max_size: usize) -> Result<Message, DecodeError> {
    check_size(bytes.len(), max_size)?;
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    Ok(serde_json::from_str(text)?)
}

fn check_size(size: usize, max: usize) -> Result<(), DecodeError> {
    if size > max {
        return Err(DecodeError::FrameTooLarge { size, max });
    }
    Ok(())
}
