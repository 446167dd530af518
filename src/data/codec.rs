//! Object codec
//!
//! Serializes [`Value`] trees into byte blobs for fixed-width object cells.
//! Layout of an encoded blob:
//!
//! ```text
//! ┌──────────────────────────────────────────────┬──────────┐
//! │ bincode(Value)  or  lz4(bincode(Value))      │ b'1'     │
//! └──────────────────────────────────────────────┴──────────┘
//! ```
//!
//! Fixed-width byte cells lose trailing zero bytes on read. The sentinel
//! byte is never zero, so the payload length survives even when the payload
//! itself ends in zeros. Decoding strips exactly one trailing byte.

use super::value::{NdArray, Value};

/// Byte appended to every encoded blob
pub const SENTINEL: u8 = b'1';

/// Codec failure
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty input, sentinel byte missing")]
    Empty,

    #[error("trailing byte {0:#04x} is not the sentinel, input truncated or not codec encoded")]
    BadSentinel(u8),

    #[error("unsupported value: {0}")]
    Unsupported(String),

    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("deserialization failed: {0}")]
    Deserialize(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("invalid utf-8 in text cell: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Serialize a value, optionally compress it, and append the sentinel
pub fn encode(value: &Value, compressed: bool) -> Result<Vec<u8>, CodecError> {
    check_encodable(value)?;
    let body = bincode::serialize(value).map_err(|e| CodecError::Serialize(e.to_string()))?;
    let mut out = if compressed {
        lz4_flex::compress_prepend_size(&body)
    } else {
        body
    };
    out.push(SENTINEL);
    Ok(out)
}

/// Strip the sentinel, inflate if needed, and deserialize
pub fn decode(bytes: &[u8], compressed: bool) -> Result<Value, CodecError> {
    let (&last, payload) = bytes.split_last().ok_or(CodecError::Empty)?;
    if last != SENTINEL {
        return Err(CodecError::BadSentinel(last));
    }
    let inflated;
    let body = if compressed {
        inflated = lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        &inflated[..]
    } else {
        payload
    };
    bincode::deserialize(body).map_err(|e| CodecError::Deserialize(e.to_string()))
}

/// Length of the encoded blob of a value
pub fn encoded_len(value: &Value, compressed: bool) -> Result<usize, CodecError> {
    encode(value, compressed).map(|b| b.len())
}

/// Longest encoded blob among `values`, used to size object columns
pub fn longest_encoded_len<'a, I>(values: I, compressed: bool) -> Result<usize, CodecError>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut longest = 0;
    for v in values {
        longest = longest.max(encoded_len(v, compressed)?);
    }
    Ok(longest)
}

/// Longest UTF-8 byte length among `strings`, used to size text columns
pub fn longest_text_len<S: AsRef<str>>(strings: &[S]) -> usize {
    strings.iter().map(|s| s.as_ref().len()).max().unwrap_or(0)
}

/// Arrays must agree with their own shape and element size
fn check_encodable(value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Array(a) => check_array(a),
        Value::List(items) => items.iter().try_for_each(check_encodable),
        Value::Map(pairs) => pairs.iter().try_for_each(|(k, v)| {
            check_encodable(k)?;
            check_encodable(v)
        }),
        _ => Ok(()),
    }
}

fn check_array(a: &NdArray) -> Result<(), CodecError> {
    a.validate().map_err(CodecError::Unsupported)
}
