//! Header manipulation between client and origin.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Drop client forwarding headers and `Host` before contacting the origin
//! - Guard framing and forwarding headers against query-supplied overrides
//!
//! # Design Decisions
//! - Headers named in `Connection` are hop-by-hop too (RFC 9110 §7.6.1)
//! - The origin never sees the client's forwarding chain

use axum::http::header::{self, HeaderMap, HeaderName};

/// Headers that apply to a single transport hop.
pub const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Client-side forwarding headers not passed on to the origin.
pub const FORWARDING: [HeaderName; 5] = [
    header::FORWARDED,
    HeaderName::from_static("x-forwarded-for"),
    HeaderName::from_static("x-forwarded-proto"),
    HeaderName::from_static("x-forwarded-host"),
    HeaderName::from_static("x-real-ip"),
];

/// Headers a client may not set on the origin request through `h_` overrides.
pub fn is_protected_request_header(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
        || FORWARDING.contains(name)
        || name == header::HOST
        || name == header::CONTENT_LENGTH
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Prepare client headers for the origin request.
pub fn sanitize_request_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.remove(header::HOST);
    for name in FORWARDING.iter() {
        headers.remove(name);
    }
}

/// Prepare origin headers for the client response.
pub fn sanitize_response_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_standard_and_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-session-hop"));
        headers.insert("x-session-hop", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-99"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-session-hop").is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert_eq!(headers.get(header::RANGE).unwrap(), "bytes=0-99");
    }

    #[test]
    fn request_sanitizing_drops_host_and_forwarding() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.5"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.5"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("player/1.0"));

        sanitize_request_headers(&mut headers);

        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get("x-forwarded-for").is_none());
        assert!(headers.get("x-real-ip").is_none());
        assert_eq!(headers.get(header::USER_AGENT).unwrap(), "player/1.0");
    }

    #[test]
    fn framing_and_forwarding_headers_are_protected() {
        for name in ["connection", "transfer-encoding", "content-length", "host", "x-forwarded-for", "forwarded"] {
            assert!(is_protected_request_header(&HeaderName::from_static(name)), "{name}");
        }
        for name in ["referer", "user-agent", "origin", "cookie", "range"] {
            assert!(!is_protected_request_header(&HeaderName::from_static(name)), "{name}");
        }
    }

    #[test]
    fn response_sanitizing_keeps_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        sanitize_response_headers(&mut headers);
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "1024");
        assert!(headers.get(header::CONNECTION).is_none());
    }
}
