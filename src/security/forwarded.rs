//! Trusted-proxy client address resolution.
//!
//! # Responsibilities
//! - Decide whether the connected peer may speak for the client
//! - Extract the client address (and scheme) from forwarding headers
//! - Fall back to the raw peer for untrusted peers and malformed headers
//!
//! # Design Decisions
//! - Trust is an explicit allow-list lookup on the peer address, never
//!   "a forwarding header is present"
//! - Resolution is a pure function of (peer, headers): same input, same output
//! - Malformed headers never fail a request; they are treated as absent

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName};
use cidr::IpCidr;

use crate::config::{ForwardedPick, ForwardingConfig};

/// One parsed `FORWARDED_ALLOW_IPS` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustedEntry {
    /// `*`: every peer is trusted.
    Any,
    /// A single address or a CIDR range.
    Net(IpCidr),
}

/// Parse an allow-list entry: `*`, an address, or a CIDR range.
pub fn parse_trusted_entry(entry: &str) -> Result<TrustedEntry, String> {
    let entry = entry.trim();
    if entry == "*" {
        return Ok(TrustedEntry::Any);
    }
    if entry.contains('/') {
        return entry
            .parse::<IpCidr>()
            .map(TrustedEntry::Net)
            .map_err(|e| format!("invalid CIDR {entry:?}: {e}"));
    }
    entry
        .parse::<IpAddr>()
        .map(|addr| TrustedEntry::Net(IpCidr::new_host(addr)))
        .map_err(|_| format!("invalid address {entry:?}"))
}

/// Where the resolved client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSource {
    /// The socket peer; no usable forwarding header.
    Peer,
    /// A forwarding header supplied by a trusted peer.
    Forwarded,
    /// A forwarding header was sent by an untrusted peer and ignored.
    UntrustedHeaderIgnored,
}

/// Result of resolving the client behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub client: IpAddr,
    pub peer: SocketAddr,
    /// Original scheme reported by a trusted peer.
    pub scheme: Option<&'static str>,
    pub source: ClientSource,
}

impl Resolution {
    /// True when the peer tried to supply forwarding headers it may not.
    pub fn is_forged(&self) -> bool {
        self.source == ClientSource::UntrustedHeaderIgnored
    }
}

/// Allow-list of peers whose forwarding headers are honored.
#[derive(Debug, Clone)]
pub struct TrustedProxies {
    any: bool,
    nets: Vec<IpCidr>,
    client_header: HeaderName,
    proto_header: HeaderName,
    pick: ForwardedPick,
}

impl TrustedProxies {
    /// Build the resolver from configuration.
    pub fn from_config(config: &ForwardingConfig) -> Result<Self, String> {
        let mut any = false;
        let mut nets = Vec::with_capacity(config.allow_ips.len());
        for entry in &config.allow_ips {
            match parse_trusted_entry(entry)? {
                TrustedEntry::Any => any = true,
                TrustedEntry::Net(net) => nets.push(net),
            }
        }
        let client_header = HeaderName::from_bytes(config.client_header.as_bytes())
            .map_err(|e| format!("invalid client header: {e}"))?;
        let proto_header = HeaderName::from_bytes(config.proto_header.as_bytes())
            .map_err(|e| format!("invalid proto header: {e}"))?;

        Ok(Self {
            any,
            nets,
            client_header,
            proto_header,
            pick: config.pick,
        })
    }

    /// Is `addr` allowed to supply forwarding headers?
    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        if self.any {
            return true;
        }
        let addr = addr.to_canonical();
        self.nets.iter().any(|net| net.contains(&addr))
    }

    /// Determine the true client address for a request.
    pub fn resolve(&self, peer: SocketAddr, headers: &HeaderMap) -> Resolution {
        let peer_ip = peer.ip().to_canonical();
        let fallback = Resolution {
            client: peer_ip,
            peer,
            scheme: None,
            source: ClientSource::Peer,
        };

        let has_headers =
            headers.contains_key(&self.client_header) || headers.contains_key(&self.proto_header);
        if !self.is_trusted(peer_ip) {
            return Resolution {
                source: if has_headers {
                    ClientSource::UntrustedHeaderIgnored
                } else {
                    ClientSource::Peer
                },
                ..fallback
            };
        }

        let scheme = self.forwarded_scheme(headers);
        match self.forwarded_client(headers) {
            Some(client) => Resolution {
                client,
                peer,
                scheme,
                source: ClientSource::Forwarded,
            },
            None => Resolution { scheme, ..fallback },
        }
    }

    fn forwarded_client(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let chain = forwarded_chain(headers, &self.client_header)?;
        match self.pick {
            ForwardedPick::Leftmost => chain.first().copied(),
            ForwardedPick::RightmostUntrusted => chain
                .iter()
                .rev()
                .find(|addr| !self.is_trusted(**addr))
                .or_else(|| chain.first())
                .copied(),
        }
    }

    fn forwarded_scheme(&self, headers: &HeaderMap) -> Option<&'static str> {
        let value = headers.get(&self.proto_header)?.to_str().ok()?;
        let first = value.split(',').next()?.trim();
        if first.eq_ignore_ascii_case("https") {
            Some("https")
        } else if first.eq_ignore_ascii_case("http") {
            Some("http")
        } else {
            None
        }
    }
}

/// All addresses in the header, left to right, across repeated header lines.
/// Any unparsable entry makes the whole chain unusable.
fn forwarded_chain(headers: &HeaderMap, name: &HeaderName) -> Option<Vec<IpAddr>> {
    let mut chain = Vec::new();
    for value in headers.get_all(name) {
        let value = value.to_str().ok()?;
        for entry in value.split(',') {
            chain.push(parse_forwarded_addr(entry.trim())?);
        }
    }
    if chain.is_empty() {
        None
    } else {
        Some(chain)
    }
}

/// Accepts `1.2.3.4`, `1.2.3.4:80`, `::1`, `[::1]` and `[::1]:80`.
fn parse_forwarded_addr(entry: &str) -> Option<IpAddr> {
    if let Ok(addr) = entry.parse::<IpAddr>() {
        return Some(addr.to_canonical());
    }
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Some(addr.ip().to_canonical());
    }
    entry
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<IpAddr>().ok())
        .map(|addr| addr.to_canonical())
}
