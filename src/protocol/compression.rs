//! Transparent gzip support.
//!
//! Only responses to requests where the transport added
//! `accept-encoding: gzip` itself are decoded. A caller that asked for gzip
//! explicitly gets the encoded body untouched.

// ============================================================================
// Imports
// ============================================================================

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue, RANGE};
use http::{Method, Request, Response};

use crate::error::{Error, Result};

// ============================================================================
// Request Side
// ============================================================================

/// Adds `accept-encoding: gzip` when the request leaves encoding open.
///
/// Returns `true` if the header was added by us. Range and HEAD requests are
/// left alone.
pub(crate) fn request_gzip(request: &mut Request<Bytes>) -> bool {
    if request.headers().contains_key(ACCEPT_ENCODING)
        || request.headers().contains_key(RANGE)
        || request.method() == Method::HEAD
    {
        return false;
    }

    request
        .headers_mut()
        .insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    true
}

// ============================================================================
// Response Side
// ============================================================================

/// Decodes a gzip body and strips the now-stale encoding headers.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the body is not valid gzip.
pub(crate) fn decode_gzip(response: Response<Bytes>) -> Result<Response<Bytes>> {
    let is_gzip = response
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));

    if !is_gzip {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let mut decoded = Vec::with_capacity(body.len() * 2);
    GzDecoder::new(body.as_ref())
        .read_to_end(&mut decoded)
        .map_err(|e| Error::decode(format!("gzip: {e}")))?;

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);

    Ok(Response::from_parts(parts, Bytes::from(decoded)))
}

// ============================================================================
// Tests
// ============================================================================
