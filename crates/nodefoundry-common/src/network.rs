//! Address and name fields that are rendered into installer answer files.

use crate::error::NodeError;
use std::net::Ipv4Addr;

/// Parse a single IPv4 address field.
pub fn parse_ipv4(field: &'static str, value: &str) -> Result<Ipv4Addr, NodeError> {
    value.trim().parse().map_err(|_| NodeError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Parse a nameserver list, separated by whitespace or commas.
pub fn parse_nameservers(field: &'static str, value: &str) -> Result<Vec<Ipv4Addr>, NodeError> {
    let servers = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| parse_ipv4(field, s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| NodeError::InvalidField {
            field,
            value: value.to_string(),
        })?;

    if servers.is_empty() {
        return Err(NodeError::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    Ok(servers)
}

/// RFC 1123 host name: dot separated labels of letters, digits and hyphens.
pub fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

/// Host part of `host:port`, `[v6]:port`, `[v6]` or a bare host.
///
/// A bare IPv6 literal is returned whole; brackets are removed.
pub fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, "")) => host,
            Some((host, tail)) if tail.strip_prefix(':').map_or(false, is_port) => host,
            _ => addr,
        };
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && is_port(port) => host,
        _ => addr,
    }
}

fn is_port(port: &str) -> bool {
    port.parse::<u16>().is_ok()
}

/// Join a host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
