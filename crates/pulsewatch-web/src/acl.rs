//! Per-listener ACL bitset (spec.md §4.E "ACL enforcement", §6 "Listen sockets").

use std::fmt;
use std::net::IpAddr;

use parking_lot::RwLock;

/// Which feature classes a listener (or a resolved request) may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AclMask(u32);

impl AclMask {
    pub const NONE: AclMask = AclMask(0);
    pub const DASHBOARD: AclMask = AclMask(1 << 0);
    pub const REGISTRY: AclMask = AclMask(1 << 1);
    pub const BADGES: AclMask = AclMask(1 << 2);
    pub const MANAGEMENT: AclMask = AclMask(1 << 3);
    pub const STREAMING: AclMask = AclMask(1 << 4);
    pub const NETDATA_CONF: AclMask = AclMask(1 << 5);
    pub const ALL: AclMask = AclMask(
        Self::DASHBOARD.0 | Self::REGISTRY.0 | Self::BADGES.0 | Self::MANAGEMENT.0 | Self::STREAMING.0 | Self::NETDATA_CONF.0,
    );

    pub fn union(self, other: AclMask) -> AclMask {
        AclMask(self.0 | other.0)
    }

    pub fn contains(self, other: AclMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: AclMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Parse the textual listener ACL config, e.g.
    /// `"dashboard registry badges management streaming netdata.conf"`.
    pub fn parse(spec: &str) -> AclMask {
        spec.split_whitespace().fold(AclMask::NONE, |acc, token| {
            let flag = match token {
                "dashboard" => AclMask::DASHBOARD,
                "registry" => AclMask::REGISTRY,
                "badges" => AclMask::BADGES,
                "management" => AclMask::MANAGEMENT,
                "streaming" => AclMask::STREAMING,
                "netdata.conf" => AclMask::NETDATA_CONF,
                "all" => AclMask::ALL,
                _ => AclMask::NONE,
            };
            acc.union(flag)
        })
    }
}

impl fmt::Display for AclMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (AclMask::DASHBOARD, "dashboard"),
            (AclMask::REGISTRY, "registry"),
            (AclMask::BADGES, "badges"),
            (AclMask::MANAGEMENT, "management"),
            (AclMask::STREAMING, "streaming"),
            (AclMask::NETDATA_CONF, "netdata.conf"),
        ];
        let present: Vec<&str> = names.iter().filter(|(m, _)| self.contains(*m)).map(|(_, n)| *n).collect();
        write!(f, "{}", present.join(" "))
    }
}

/// Which feature class a dispatched route requires, used to AND against a
/// listener's [`AclMask`].
pub fn required_mask_for_path(top_segment: &str) -> AclMask {
    match top_segment {
        "mcp" | "sse" => AclMask::STREAMING,
        "netdata.conf" => AclMask::NETDATA_CONF,
        "host" | "node" => AclMask::DASHBOARD,
        "v0" | "v1" | "v2" | "v3" => AclMask::DASHBOARD,
        _ if top_segment.starts_with("api") => AclMask::DASHBOARD,
        _ => AclMask::DASHBOARD,
    }
}

/// Cache of simple IP-pattern ACL decisions, keyed by client address, so
/// repeated requests from the same peer on a keep-alive connection don't
/// re-evaluate the pattern list.
#[derive(Default)]
pub struct IpAclCache {
    cache: RwLock<std::collections::HashMap<IpAddr, bool>>,
}

impl IpAclCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, ip: IpAddr, patterns: &[String]) -> bool {
        if patterns.is_empty() {
            return true;
        }
        if let Some(&cached) = self.cache.read().get(&ip) {
            return cached;
        }
        let allowed = patterns.iter().any(|p| matches_ip_pattern(p, ip));
        self.cache.write().insert(ip, allowed);
        allowed
    }
}

/// Minimal glob-style IP matcher: `*` matches any run of characters.
fn matches_ip_pattern(pattern: &str, ip: IpAddr) -> bool {
    if pattern == "*" {
        return true;
    }
    let ip_str = ip.to_string();
    if let Some(prefix) = pattern.strip_suffix('*') {
        return ip_str.starts_with(prefix);
    }
    pattern == ip_str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_textual_acl() {
        let mask = AclMask::parse("dashboard registry badges management streaming netdata.conf");
        assert!(mask.contains(AclMask::DASHBOARD));
        assert!(mask.contains(AclMask::STREAMING));
        assert!(mask.contains(AclMask::NETDATA_CONF));
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let mask = AclMask::parse("dashboard bogus");
        assert_eq!(mask, AclMask::DASHBOARD);
    }

    #[test]
    fn ip_wildcard_matches_prefix() {
        let cache = IpAclCache::new();
        let patterns = vec!["10.0.*".to_string()];
        assert!(cache.is_allowed("10.0.0.5".parse().unwrap(), &patterns));
        assert!(!cache.is_allowed("192.168.0.5".parse().unwrap(), &patterns));
    }
}
