//! Outbound URL policy: scheme allow-list and local-network block.
//!
//! Every URL the engine fetches (page exports, archive downloads, redirect
//! targets) passes through [`UrlGuard::validate`]. Downloads additionally
//! call [`UrlGuard::validate_resolved`] so a public name that resolves to a
//! private address is refused as well.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ferry_types::error::{MigrationError, BLOCKED_SCHEME, BLOCKED_URL};
use reqwest::Url;

#[derive(Debug, Clone, Default)]
pub struct UrlGuard {
    allow_local_network: bool,
    exact_hosts: HashSet<String>,
    suffix_wildcards: Vec<String>,
}

impl UrlGuard {
    /// Build a guard. `allowed_hosts` entries are exact hosts or `*.domain`
    /// wildcards and are exempt from the local-network block.
    #[must_use]
    pub fn new(allow_local_network: bool, allowed_hosts: &[String]) -> Self {
        let mut guard = Self {
            allow_local_network,
            ..Self::default()
        };
        for raw in allowed_hosts {
            let host = normalize_host(raw);
            if host.is_empty() {
                continue;
            }
            if let Some(suffix) = host.strip_prefix("*.") {
                guard.suffix_wildcards.push(format!(".{suffix}"));
            } else {
                guard.exact_hosts.insert(host);
            }
        }
        guard
    }

    fn is_allowed_host(&self, host: &str) -> bool {
        self.exact_hosts.contains(host)
            || self
                .suffix_wildcards
                .iter()
                .any(|suffix| host.ends_with(suffix.as_str()))
    }

    fn exempt(&self, host: &str) -> bool {
        self.allow_local_network || self.is_allowed_host(host)
    }

    /// Check scheme and host of `url` without touching the network.
    ///
    /// # Errors
    ///
    /// Returns a security error for a non-HTTP scheme, a missing host, or a
    /// local/private destination that is not explicitly allowed.
    pub fn validate(&self, url: &Url) -> Result<(), MigrationError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MigrationError::security(
                BLOCKED_SCHEME,
                format!("url scheme '{}' is not allowed", url.scheme()),
            ));
        }

        let host = url.host_str().map(normalize_host).unwrap_or_default();
        if host.is_empty() {
            return Err(MigrationError::security(BLOCKED_URL, "url has no host"));
        }
        if self.exempt(&host) {
            return Ok(());
        }

        if host == "localhost" || host.ends_with(".localhost") {
            return Err(blocked(&host));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_local_address(ip) {
                return Err(blocked(&host));
            }
        }
        Ok(())
    }

    /// [`validate`](Self::validate), then resolve the host and reject the URL
    /// if any resolved address is local.
    ///
    /// # Errors
    ///
    /// Returns a security error as for `validate`, or a retryable transport
    /// error when the name cannot be resolved.
    pub async fn validate_resolved(&self, url: &Url) -> Result<(), MigrationError> {
        self.validate(url)?;

        let host = url.host_str().map(normalize_host).unwrap_or_default();
        if self.exempt(&host) {
            return Ok(());
        }
        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| {
                MigrationError::transport(
                    "DNS_LOOKUP",
                    format!("failed to resolve '{host}': {e}"),
                    true,
                )
            })?;
        for addr in addrs {
            if is_local_address(addr.ip()) {
                tracing::warn!(host = %host, address = %addr.ip(), "Host resolves to a local address");
                return Err(blocked(&host));
            }
        }
        Ok(())
    }
}

fn blocked(host: &str) -> MigrationError {
    MigrationError::security(
        BLOCKED_URL,
        format!("requests to local network address '{host}' are not allowed"),
    )
}

fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(trimmed);
    unbracketed.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_multicast()
        || a == 0
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_local_v4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

/// Loopback, private, link-local, shared, broadcast and similar
/// non-public addresses.
#[must_use]
pub fn is_local_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => is_local_v6(v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::error::ErrorCategory;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn public_https_is_allowed() {
        let guard = UrlGuard::new(false, &[]);
        assert!(guard.validate(&url("https://gitlab.example.com/a/b")).is_ok());
        assert!(guard.validate(&url("http://93.184.216.34/x")).is_ok());
    }

    #[test]
    fn disallowed_schemes_are_security_errors() {
        let guard = UrlGuard::new(true, &[]);
        for raw in ["file:///etc/passwd", "ftp://example.com/x", "ssh://git@example.com/r"] {
            let err = guard.validate(&url(raw)).unwrap_err();
            assert_eq!(err.category, ErrorCategory::Security, "{raw}");
            assert_eq!(err.code, BLOCKED_SCHEME);
            assert!(!err.should_retry());
        }
    }

    #[test]
    fn local_addresses_are_blocked() {
        let guard = UrlGuard::new(false, &[]);
        for raw in [
            "http://127.0.0.1/",
            "http://localhost:8080/",
            "http://api.localhost/",
            "http://10.1.2.3/",
            "http://172.16.0.1/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://2130706433/",
            "http://0x7f.1/",
        ] {
            let err = guard.validate(&url(raw)).unwrap_err();
            assert_eq!(err.code, BLOCKED_URL, "{raw}");
        }
    }

    #[test]
    fn allow_local_network_lifts_the_block() {
        let guard = UrlGuard::new(true, &[]);
        assert!(guard.validate(&url("http://127.0.0.1:3000/")).is_ok());
    }

    #[test]
    fn allowed_hosts_are_exempt() {
        let guard = UrlGuard::new(
            false,
            &["localhost".to_string(), "*.internal.test".to_string()],
        );
        assert!(guard.validate(&url("http://localhost/")).is_ok());
        assert!(guard.validate(&url("http://git.internal.test/")).is_ok());
        assert!(guard.validate(&url("http://127.0.0.1/")).is_err());
    }

    #[tokio::test]
    async fn resolved_loopback_name_is_blocked() {
        let guard = UrlGuard::new(false, &[]);
        let err = guard
            .validate_resolved(&url("http://127.0.0.1/"))
            .await
            .unwrap_err();
        assert!(err.is_security());
    }

    #[tokio::test]
    async fn resolution_skipped_for_allowed_hosts() {
        let guard = UrlGuard::new(false, &["source.invalid".to_string()]);
        assert!(guard
            .validate_resolved(&url("https://source.invalid/x"))
            .await
            .is_ok());
    }
}
