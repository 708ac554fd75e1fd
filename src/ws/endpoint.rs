//! Endpoint validation run before every connect.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::WsError;

/// Parse and check a WebSocket endpoint.
///
/// The scheme must be `ws` or `wss` and a host must be present. In hardened
/// mode the scheme must be `wss` and hosts that resolve locally (localhost,
/// loopback, private, link-local, unspecified) are refused.
pub fn validate_endpoint(raw: &str, hardened: bool) -> Result<Url, WsError> {
    let url = Url::parse(raw).map_err(|e| WsError::InvalidUrl(format!("{}: {}", raw, e)))?;

    match url.scheme() {
        "wss" => {}
        "ws" if !hardened => {}
        "ws" => return Err(WsError::InvalidUrl(format!("{}: wss required", raw))),
        other => return Err(WsError::InvalidUrl(format!("{}: unsupported scheme '{}'", raw, other))),
    }

    let host = url
        .host()
        .ok_or_else(|| WsError::InvalidUrl(format!("{}: missing host", raw)))?;

    if hardened && is_local_host(&host) {
        return Err(WsError::InvalidUrl(format!("{}: local host not allowed", raw)));
    }

    Ok(url)
}

fn is_local_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_local_v4(ip),
        Host::Ipv6(ip) => is_local_v6(ip),
    }
}

fn is_local_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified() || ip.is_broadcast()
}

fn is_local_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_local_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
