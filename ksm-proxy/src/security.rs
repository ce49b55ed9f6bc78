//! Address-based access control
//!
//! Two policies exist: the global blacklist, checked before any backend is
//! considered, and each backend's own policy. A backend either runs in
//! deny-list mode (everyone except the blacklist) or default-block mode
//! (nobody except the whitelist). The two modes never combine.

use std::net::IpAddr;

use crate::policy::{BackendConfig, GlobalProxyConfig};

/// Canonical form used for every comparison: IPv4-mapped IPv6 becomes IPv4.
pub fn normalize_address(addr: IpAddr) -> IpAddr {
    addr.to_canonical()
}

/// Parses a textual address and normalizes it.
///
/// Accepts bracketed IPv6 (`[::1]`) as produced by some socket formatters.
pub fn parse_address(text: &str) -> Option<IpAddr> {
    let text = text.trim();
    let text = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    text.parse::<IpAddr>().ok().map(normalize_address)
}

/// Whether `addr` is on the global blacklist
pub fn is_globally_blocked(global: &GlobalProxyConfig, addr: IpAddr) -> bool {
    global.global_blacklist().contains(&normalize_address(addr))
}

/// Whether `backend` admits `addr`.
pub fn is_allowed(backend: &BackendConfig, addr: IpAddr) -> bool {
    let addr = normalize_address(addr);
    let policy = &backend.security;

    if policy.block_by_default() {
        policy.whitelist().contains(&addr)
    } else {
        !policy.blacklist().contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CertPaths, DomainRule, SecurityPolicy};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn backend(security: SecurityPolicy) -> BackendConfig {
        BackendConfig {
            name: "test".to_string(),
            domains: vec![DomainRule::literal("example.com")],
            http_port: 8080,
            https_port: 8443,
            enabled: true,
            security,
        }
    }

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(parse_address("10.0.0.1"), Some(ip("10.0.0.1")));
        assert_eq!(parse_address("::ffff:10.0.0.1"), Some(ip("10.0.0.1")));
        assert_eq!(parse_address("[::1]"), Some(ip("::1")));
        assert_eq!(parse_address("2001:db8::1"), Some(ip("2001:db8::1")));
        assert_eq!(parse_address("not-an-ip"), None);
        assert_eq!(parse_address(""), None);
    }

    #[test]
    fn test_blacklist_mode() {
        let b = backend(SecurityPolicy::new(vec![ip("10.0.0.1")], vec![], false));
        assert!(!is_allowed(&b, ip("10.0.0.1")));
        assert!(!is_allowed(&b, ip("::ffff:10.0.0.1")));
        assert!(is_allowed(&b, ip("10.0.0.2")));
    }

    #[test]
    fn test_default_block_empty_whitelist_denies_everyone() {
        let b = backend(SecurityPolicy::new(vec![], vec![], true));
        for addr in ["10.0.0.1", "127.0.0.1", "::1", "192.168.1.1"] {
            assert!(!is_allowed(&b, ip(addr)), "{} should be denied", addr);
        }
    }

    #[test]
    fn test_default_block_ignores_blacklist() {
        // whitelisted and blacklisted at the same time: whitelist wins
        let b = backend(SecurityPolicy::new(
            vec![ip("10.0.0.1")],
            vec![ip("10.0.0.1")],
            true,
        ));
        assert!(is_allowed(&b, ip("10.0.0.1")));
        assert!(!is_allowed(&b, ip("10.0.0.2")));
    }

    #[test]
    fn test_whitelist_unused_in_blacklist_mode() {
        let b = backend(SecurityPolicy::new(vec![], vec![ip("10.0.0.1")], false));
        assert!(is_allowed(&b, ip("10.0.0.2")));
    }

    #[test]
    fn test_global_blacklist() {
        let global = GlobalProxyConfig::new(true, false, vec![ip("::ffff:1.2.3.4")], CertPaths::default());
        assert!(is_globally_blocked(&global, ip("1.2.3.4")));
        assert!(is_globally_blocked(&global, ip("::ffff:1.2.3.4")));
        assert!(!is_globally_blocked(&global, ip("1.2.3.5")));
    }
}
