use std::{collections::HashSet, net::IpAddr, time::Duration};

use tokio::net::lookup_host;
use tracing::debug;

use crate::{
    error::ValidationError,
    models::{Protocol, ScanPlan},
};

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Validates `target` and `ports_spec` and resolves the target to a single
/// address.
pub async fn resolve(
    target: &str,
    ports_spec: &str,
    protocol: Protocol,
    resolve_timeout: Duration,
) -> Result<ScanPlan, ValidationError> {
    let ports = parse_ports(ports_spec)?;
    let host = trim_target(target)?;
    let address = resolve_host(host, resolve_timeout).await?;

    debug!(host, %address, ports = ports.len(), %protocol, "scan plan ready");

    Ok(ScanPlan {
        target: host.to_string(),
        address,
        ports,
        protocol,
    })
}

/// Parses `22,80,1000-1010` style specs. Ranges are inclusive, duplicates are
/// dropped and the first occurrence keeps its position.
pub fn parse_ports(spec: &str) -> Result<Vec<u16>, ValidationError> {
    let mut seen = HashSet::new();
    let mut ports = Vec::new();

    for raw in spec.split(',') {
        let token = raw.trim();
        let (start, end) = match token.split_once('-') {
            Some((start, end)) => (
                parse_port(start.trim(), token)?,
                parse_port(end.trim(), token)?,
            ),
            None => {
                let port = parse_port(token, token)?;
                (port, port)
            }
        };
        if start > end {
            return Err(ValidationError::port_token(token));
        }
        for port in start..=end {
            if seen.insert(port) {
                ports.push(port);
            }
        }
    }

    Ok(ports)
}

fn parse_port(digits: &str, token: &str) -> Result<u16, ValidationError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::port_token(token));
    }
    match digits.parse::<u32>() {
        Ok(port @ 1..=65535) => Ok(port as u16),
        _ => Err(ValidationError::port_token(token)),
    }
}

fn trim_target(target: &str) -> Result<&str, ValidationError> {
    let host = target.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(ValidationError::EmptyTarget);
    }
    Ok(host)
}

/// Literal addresses are returned as is; names go through the system
/// resolver, preferring IPv4 when both families come back.
pub async fn resolve_host(host: &str, timeout: Duration) -> Result<IpAddr, ValidationError> {
    let host = trim_target(host)?;
    if let Ok(address) = host.parse::<IpAddr>() {
        return Ok(address);
    }

    let unresolvable = || ValidationError::UnresolvableHost {
        host: host.to_string(),
    };

    let addresses: Vec<IpAddr> = match tokio::time::timeout(timeout, lookup_host((host, 0))).await
    {
        Ok(Ok(addrs)) => addrs.map(|addr| addr.ip()).collect(),
        Ok(Err(err)) => {
            debug!(host, error = %err, "host lookup failed");
            return Err(unresolvable());
        }
        Err(_) => {
            debug!(host, ?timeout, "host lookup timed out");
            return Err(unresolvable());
        }
    };

    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(unresolvable)
}

/// Normalizes a domain (or address) for WHOIS and DNS queries.
pub fn normalize_domain(target: &str) -> Result<String, ValidationError> {
    let host = trim_target(target)?;
    if host.parse::<IpAddr>().is_ok() {
        return Ok(host.to_string());
    }

    let domain = host.trim_end_matches('.').to_ascii_lowercase();
    let invalid = || ValidationError::InvalidDomain(target.trim().to_string());

    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(invalid());
    }
    let labels_ok = domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    });
    if !labels_ok {
        return Err(invalid());
    }

    Ok(domain)
}
