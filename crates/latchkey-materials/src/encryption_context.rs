//! Canonical encryption context encoding.
//!
//! The encryption context is an ordered string map. Its canonical form is the
//! AAD section of the message format without that section's own length
//! prefix:
//!
//! ```text
//! empty context:   (no bytes)
//! otherwise:       count: u16 BE
//!                  repeated count times, keys ascending by UTF-8 bytes:
//!                      key_len: u16 BE | key | value_len: u16 BE | value
//! ```
//!
//! The same bytes feed cache key hashing and the hierarchical keyring AAD, so
//! both produce identical results for logically equal contexts regardless of
//! insertion order.

use std::collections::BTreeMap;

use crate::error::SerializationError;

/// Ordered string-to-string map bound to every encrypted message.
pub type EncryptionContext = BTreeMap<String, String>;

/// Serialize `context` into its canonical form, without a length prefix.
pub fn serialize_encryption_context(
    context: &EncryptionContext,
) -> Result<Vec<u8>, SerializationError> {
    if context.is_empty() {
        return Ok(Vec::new());
    }

    let count = u16::try_from(context.len())
        .map_err(|_| SerializationError::TooManyPairs { count: context.len() })?;

    let mut out = Vec::with_capacity(
        2 + context.iter().map(|(k, v)| 4 + k.len() + v.len()).sum::<usize>(),
    );
    out.extend_from_slice(&count.to_be_bytes());

    for (key, value) in context {
        write_length_prefixed(&mut out, "encryption context key", key.as_bytes())?;
        write_length_prefixed(&mut out, "encryption context value", value.as_bytes())?;
    }

    Ok(out)
}

/// Serialize `context` with the `u16` length prefix used in message headers.
///
/// An empty context encodes as `[0x00, 0x00]`.
pub fn serialize_encryption_context_with_length(
    context: &EncryptionContext,
) -> Result<Vec<u8>, SerializationError> {
    let body = serialize_encryption_context(context)?;
    let len = u16::try_from(body.len()).map_err(|_| SerializationError::FieldTooLong {
        field: "encryption context",
        len: body.len(),
    })?;

    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse the canonical form produced by [`serialize_encryption_context`].
///
/// Rejects truncated input, trailing bytes, invalid UTF-8, and keys that are
/// not strictly ascending (which also rules out duplicates).
pub fn deserialize_encryption_context(
    bytes: &[u8],
) -> Result<EncryptionContext, SerializationError> {
    let mut context = EncryptionContext::new();
    if bytes.is_empty() {
        return Ok(context);
    }

    let mut reader = Reader { bytes, offset: 0 };
    let count = reader.read_u16()?;

    let mut previous: Option<String> = None;
    for index in 0..usize::from(count) {
        let key = reader.read_utf8()?;
        let value = reader.read_utf8()?;

        if previous.as_deref().is_some_and(|prev| prev.as_bytes() >= key.as_bytes()) {
            return Err(SerializationError::NotCanonical { index });
        }

        previous = Some(key.clone());
        context.insert(key, value);
    }

    let remaining = bytes.len() - reader.offset;
    if remaining != 0 {
        return Err(SerializationError::TrailingBytes { count: remaining });
    }

    Ok(context)
}

/// Append `u16 BE length || data`.
pub(crate) fn write_length_prefixed(
    out: &mut Vec<u8>,
    field: &'static str,
    data: &[u8],
) -> Result<(), SerializationError> {
    let len = u16::try_from(data.len())
        .map_err(|_| SerializationError::FieldTooLong { field, len: data.len() })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, needed: usize) -> Result<&'a [u8], SerializationError> {
        let end = self
            .offset
            .checked_add(needed)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(SerializationError::Truncated { offset: self.offset, needed })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, SerializationError> {
        let slice = self.take(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    fn read_utf8(&mut self) -> Result<String, SerializationError> {
        let len = self.read_u16()?;
        let slice = self.take(usize::from(len))?;
        std::str::from_utf8(slice)
            .map(str::to_owned)
            .map_err(|_| SerializationError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> EncryptionContext {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn empty_context_serializes_to_nothing() {
        assert!(serialize_encryption_context(&EncryptionContext::new()).unwrap().is_empty());
        assert_eq!(
            serialize_encryption_context_with_length(&EncryptionContext::new()).unwrap(),
            vec![0, 0]
        );
    }

    #[test]
    fn pairs_are_sorted_by_key() {
        let ctx = context(&[("b", "2"), ("a", "1")]);
        let bytes = serialize_encryption_context(&ctx).unwrap();

        assert_eq!(bytes, vec![0, 2, 0, 1, b'a', 0, 1, b'1', 0, 1, b'b', 0, 1, b'2']);
    }

    #[test]
    fn length_prefix_covers_body() {
        let ctx = context(&[("key", "value")]);
        let body = serialize_encryption_context(&ctx).unwrap();
        let prefixed = serialize_encryption_context_with_length(&ctx).unwrap();

        assert_eq!(&prefixed[..2], &(body.len() as u16).to_be_bytes());
        assert_eq!(&prefixed[2..], body.as_slice());
    }

    #[test]
    fn oversized_value_rejected() {
        let ctx = context(&[("k", &"x".repeat(usize::from(u16::MAX) + 1))]);
        assert!(matches!(
            serialize_encryption_context(&ctx),
            Err(SerializationError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn deserialize_inverts_serialize() {
        let ctx = context(&[("this", "is"), ("a", "non-empty"), ("encryption", "context")]);
        let bytes = serialize_encryption_context(&ctx).unwrap();

        assert_eq!(deserialize_encryption_context(&bytes).unwrap(), ctx);
    }

    #[test]
    fn deserialize_rejects_unsorted_keys() {
        let bytes = [0, 2, 0, 1, b'b', 0, 0, 0, 1, b'a', 0, 0];
        assert_eq!(
            deserialize_encryption_context(&bytes),
            Err(SerializationError::NotCanonical { index: 1 })
        );
    }

    #[test]
    fn deserialize_rejects_duplicate_keys() {
        let bytes = [0, 2, 0, 1, b'a', 0, 0, 0, 1, b'a', 0, 0];
        assert!(matches!(
            deserialize_encryption_context(&bytes),
            Err(SerializationError::NotCanonical { .. })
        ));
    }

    #[test]
    fn deserialize_rejects_truncation_and_trailing_bytes() {
        let ctx = context(&[("a", "b")]);
        let bytes = serialize_encryption_context(&ctx).unwrap();

        assert!(matches!(
            deserialize_encryption_context(&bytes[..bytes.len() - 1]),
            Err(SerializationError::Truncated { .. })
        ));

        let mut extended = bytes.clone();
        extended.push(0);
        assert_eq!(
            deserialize_encryption_context(&extended),
            Err(SerializationError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn deserialize_rejects_invalid_utf8() {
        let bytes = [0, 1, 0, 1, 0xFF, 0, 0];
        assert_eq!(deserialize_encryption_context(&bytes), Err(SerializationError::InvalidUtf8));
    }
}
