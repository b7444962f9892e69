//! Helpers for parsing idempotency headers in HTTP handlers.

use actix_web::http::header::HeaderMap;

use crate::domain::Error;

/// HTTP header name for idempotency keys.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Longest accepted key; matches the column width.
const MAX_KEY_LENGTH: usize = 100;

/// Extract the idempotency key from request headers.
///
/// The key is an opaque client token: any non-empty string without
/// surrounding whitespace, up to the stored column width.
pub fn extract_idempotency_key(headers: &HeaderMap) -> Result<Option<String>, Error> {
    let Some(header_value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };

    let key = header_value
        .to_str()
        .map_err(|_| Error::invalid_request("idempotency-key header must be valid ASCII"))?;

    if key.is_empty() {
        return Err(Error::invalid_request(
            "idempotency-key header must not be empty",
        ));
    }
    if key.trim() != key {
        return Err(Error::invalid_request(
            "idempotency-key header must not have surrounding whitespace",
        ));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::invalid_request(format!(
            "idempotency-key header must be at most {MAX_KEY_LENGTH} characters"
        )));
    }

    Ok(Some(key.to_owned()))
}
