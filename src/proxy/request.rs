//! Inbound request → origin request.
//!
//! # Responsibilities
//! - Read the origin URL from the `d` query parameter
//! - Turn `h_<name>=<value>` parameters into origin request headers
//! - Strip hop-by-hop and client forwarding headers
//!
//! The origin URL is restricted to `http` and `https`. Overrides never
//! reintroduce a header the sanitizer removes, nor set `Host` or
//! `Content-Length`.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use url::Url;

use crate::error::ProxyError;
use crate::resilience::retries::is_replayable;
use crate::security::headers::{is_protected_request_header, sanitize_request_headers};

/// Query parameter carrying the origin URL.
pub const DESTINATION_PARAM: &str = "d";
/// Prefix of query parameters that become origin request headers.
pub const HEADER_PARAM_PREFIX: &str = "h_";

/// Decoded query string of a proxy route, in the order it was sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyQuery {
    pub params: Vec<(String, String)>,
}

impl ProxyQuery {
    pub fn parse(query: Option<&str>) -> Self {
        let params = url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { params }
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, ProxyError> {
        self.get(key)
            .ok_or_else(|| ProxyError::InvalidDestination(format!("missing `{key}` parameter")))
    }

    /// Override headers from `h_` parameters. Protected names are skipped.
    pub fn header_overrides(&self) -> Result<Vec<(HeaderName, HeaderValue)>, ProxyError> {
        let mut overrides = Vec::new();
        for (key, value) in &self.params {
            let Some(name) = key.strip_prefix(HEADER_PARAM_PREFIX) else {
                continue;
            };
            let header = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                .map_err(|_| ProxyError::InvalidDestination(format!("invalid header name {name:?}")))?;
            if is_protected_request_header(&header) {
                tracing::debug!(header = %header, "Ignoring override of protected header");
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|_| ProxyError::InvalidDestination(format!("invalid value for header {name:?}")))?;
            overrides.push((header, value));
        }
        Ok(overrides)
    }

    /// Copy with `drop` removed and `set` replacing any existing values.
    pub fn with(&self, drop: &[&str], set: &[(&str, &str)]) -> Self {
        let mut params: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(k, _)| !drop.contains(&k.as_str()) && !set.iter().any(|(s, _)| s == k))
            .cloned()
            .collect();
        params.extend(set.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Self { params }
    }

    /// `application/x-www-form-urlencoded` rendering.
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }
}

/// Client headers as sent to the origin: sanitized, then overridden.
pub fn origin_headers(mut headers: HeaderMap, query: &ProxyQuery) -> Result<HeaderMap, ProxyError> {
    sanitize_request_headers(&mut headers);
    for (name, value) in query.header_overrides()? {
        headers.insert(name, value);
    }
    Ok(headers)
}

/// A request ready to be sent to the origin.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub target: Uri,
    /// `scheme://host[:port]`, for logs and errors.
    pub origin: String,
    pub headers: HeaderMap,
    pub body: Body,
    /// No request body, so the request may be sent again.
    pub replayable: bool,
}

impl ProxyRequest {
    pub fn from_request(request: Request<Body>) -> Result<Self, ProxyError> {
        let (parts, body) = request.into_parts();
        let query = ProxyQuery::parse(parts.uri.query());
        let (target, origin) = parse_destination(query.require(DESTINATION_PARAM)?)?;

        let replayable = is_replayable(&parts.headers);
        let headers = origin_headers(parts.headers, &query)?;

        Ok(Self {
            method: parts.method,
            target,
            origin,
            headers,
            body,
            replayable,
        })
    }

    /// A bodiless GET of `url`, used for manifests and segments.
    ///
    /// Range and validator headers are dropped: the response is consumed or
    /// reassembled by the proxy, not handed back byte for byte.
    pub fn get(url: &str, mut headers: HeaderMap) -> Result<Self, ProxyError> {
        let (target, origin) = parse_destination(url)?;
        for name in [
            header::RANGE,
            header::IF_RANGE,
            header::IF_NONE_MATCH,
            header::IF_MODIFIED_SINCE,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
        ] {
            headers.remove(name);
        }
        Ok(Self {
            method: Method::GET,
            target,
            origin,
            headers,
            body: Body::empty(),
            replayable: true,
        })
    }
}

fn parse_destination(raw: &str) -> Result<(Uri, String), ProxyError> {
    let url = Url::parse(raw)
        .map_err(|e| ProxyError::InvalidDestination(format!("{raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidDestination(format!(
            "unsupported scheme {:?}",
            url.scheme()
        )));
    }
    let Some(host) = url.host_str() else {
        return Err(ProxyError::InvalidDestination(format!("{raw:?} has no host")));
    };
    let origin = match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    };
    let target = url
        .as_str()
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidDestination(format!("{raw:?}: {e}")))?;
    Ok((target, origin))
}
