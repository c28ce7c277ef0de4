use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};

use crate::errors::NormalizeError;

/// Decodes a sheet payload as UTF-8, dropping a leading byte-order mark.
///
/// Malformed input is rejected rather than replaced: a lossy decode is how
/// accented cooperative names ended up garbled in the first place.
pub fn decode_payload(payload: &[u8]) -> Result<Cow<'_, str>, NormalizeError> {
    let (text, had_errors) = UTF_8.decode_with_bom_removal(payload);
    if had_errors {
        let body = match Encoding::for_bom(payload) {
            Some((encoding, bom_len)) if encoding == UTF_8 => &payload[bom_len..],
            _ => payload,
        };
        let offset = std::str::from_utf8(body)
            .err()
            .map(|err| err.valid_up_to())
            .unwrap_or_default();
        return Err(NormalizeError::InvalidEncoding { offset });
    }
    Ok(text)
}
