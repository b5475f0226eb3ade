//! Outbound URL validation (SSRF protection).
//!
//! Every URL a tool is about to fetch passes through [`EgressGuard`]:
//!
//! 1. Only `http` and `https` schemes are accepted.
//! 2. A fixed hostname blocklist (loopback names, cloud metadata hosts,
//!    in-cluster DNS names) is applied by exact or suffix match.
//! 3. If an allow-list is configured, the host must match it exactly or be a
//!    subdomain of an entry.
//! 4. The host is resolved and every address is checked against the
//!    private/loopback/link-local/multicast/reserved/test-net ranges.
//!    Resolution failure is a rejection.
//!
//! The resolved addresses are returned with an allowed decision so the caller
//! can pin its connection to exactly the addresses that were checked.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use url::{Host, Url};

use crate::error::{GuardError, Result};

/// Hostnames that are always rejected.
pub const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata",
    "metadata.google.internal",
    "metadata.goog",
    "instance-data",
    "instance-data.ec2.internal",
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
];

/// Hostname suffixes that are always rejected (`*.internal`, `*.local`, ...).
pub const BLOCKED_SUFFIXES: &[&str] = &[
    "localhost",
    "local",
    "localdomain",
    "internal",
    "svc",
    "cluster.local",
];

// ─────────────────────────────────────────────────────────────────────────────
// Address classification
// ─────────────────────────────────────────────────────────────────────────────

const V4_BLOCKED: &[(Ipv4Addr, u8, &str)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8, "unspecified"),
    (Ipv4Addr::new(10, 0, 0, 0), 8, "private"),
    (Ipv4Addr::new(100, 64, 0, 0), 10, "shared address space"),
    (Ipv4Addr::new(127, 0, 0, 0), 8, "loopback"),
    (Ipv4Addr::new(169, 254, 0, 0), 16, "link-local"),
    (Ipv4Addr::new(172, 16, 0, 0), 12, "private"),
    (Ipv4Addr::new(192, 0, 0, 0), 24, "reserved"),
    (Ipv4Addr::new(192, 0, 2, 0), 24, "documentation"),
    (Ipv4Addr::new(192, 88, 99, 0), 24, "reserved"),
    (Ipv4Addr::new(192, 168, 0, 0), 16, "private"),
    (Ipv4Addr::new(198, 18, 0, 0), 15, "benchmarking"),
    (Ipv4Addr::new(198, 51, 100, 0), 24, "documentation"),
    (Ipv4Addr::new(203, 0, 113, 0), 24, "documentation"),
    (Ipv4Addr::new(224, 0, 0, 0), 4, "multicast"),
    (Ipv4Addr::new(240, 0, 0, 0), 4, "reserved"),
];

const V6_BLOCKED: &[(Ipv6Addr, u8, &str)] = &[
    (Ipv6Addr::UNSPECIFIED, 128, "unspecified"),
    (Ipv6Addr::LOCALHOST, 128, "loopback"),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 96, "reserved"),
    (Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0), 64, "discard"),
    (Ipv6Addr::new(0x2001, 0, 0, 0, 0, 0, 0, 0), 23, "reserved"),
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32, "documentation"),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7, "private"),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10, "link-local"),
    (Ipv6Addr::new(0xfec0, 0, 0, 0, 0, 0, 0, 0), 10, "site-local"),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8, "multicast"),
];

fn v4_in(addr: Ipv4Addr, net: Ipv4Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (u32::from(addr) & mask) == (u32::from(net) & mask)
}

fn v6_in(addr: Ipv6Addr, net: Ipv6Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    };
    (u128::from(addr) & mask) == (u128::from(net) & mask)
}

/// IPv4 address carried inside an IPv6 address (mapped, NAT64, 6to4).
fn embedded_v4(addr: Ipv6Addr) -> Option<Ipv4Addr> {
    let bits = u128::from(addr);
    let mapped = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0);
    let nat64 = Ipv6Addr::new(0x64, 0xff9b, 0, 0, 0, 0, 0, 0);
    let six_to_four = Ipv6Addr::new(0x2002, 0, 0, 0, 0, 0, 0, 0);

    if v6_in(addr, mapped, 96) || v6_in(addr, nat64, 96) {
        Some(Ipv4Addr::from(bits as u32))
    } else if v6_in(addr, six_to_four, 16) {
        Some(Ipv4Addr::from((bits >> 80) as u32))
    } else {
        None
    }
}

/// Classify an address: `Some(label)` if it is not publicly routable.
pub fn blocked_range(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => V4_BLOCKED
            .iter()
            .find(|(net, prefix, _)| v4_in(v4, *net, *prefix))
            .map(|(_, _, label)| *label),
        IpAddr::V6(v6) => {
            if let Some(v4) = embedded_v4(v6) {
                return blocked_range(IpAddr::V4(v4));
            }
            V6_BLOCKED
                .iter()
                .find(|(net, prefix, _)| v6_in(v6, *net, *prefix))
                .map(|(_, _, label)| *label)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves hostnames to addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Fixed host table, for tests and air-gapped deployments.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.entries.insert(host.into().to_ascii_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such host: {host}"),
                )
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guard
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of validating one URL.
#[derive(Debug, Clone, Serialize)]
pub struct EgressDecision {
    pub allowed: bool,
    pub reason: String,
    /// Addresses that were checked; the caller should connect only to these.
    #[serde(skip)]
    pub addresses: Vec<SocketAddr>,
}

impl EgressDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            addresses: Vec::new(),
        }
    }
}

/// Validates outbound URLs against SSRF rules.
#[derive(Clone)]
pub struct EgressGuard {
    allowed_domains: Vec<String>,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for EgressGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressGuard")
            .field("allowed_domains", &self.allowed_domains)
            .finish_non_exhaustive()
    }
}

impl Default for EgressGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl EgressGuard {
    /// Guard with no allow-list, using the system resolver.
    pub fn new() -> Self {
        Self {
            allowed_domains: Vec::new(),
            resolver: Arc::new(SystemResolver),
        }
    }

    /// Restrict egress to these domains (and their subdomains).
    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_domains = domains
            .into_iter()
            .map(|d| normalize_host(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    /// Use a custom resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// Validate a URL, returning the decision and a human-readable reason.
    pub async fn validate(&self, raw: &str) -> EgressDecision {
        let decision = self.evaluate(raw).await;
        if decision.allowed {
            tracing::debug!(url = %raw, "Egress allowed");
        } else {
            tracing::warn!(url = %raw, reason = %decision.reason, "Egress blocked");
        }
        decision
    }

    /// Validate a URL, returning the parsed URL and checked addresses.
    pub async fn check(&self, raw: &str) -> Result<(Url, Vec<SocketAddr>)> {
        let decision = self.validate(raw).await;
        if !decision.allowed {
            return Err(GuardError::UnsafeUrl(decision.reason));
        }
        let url = Url::parse(raw).map_err(|e| GuardError::UnsafeUrl(e.to_string()))?;
        Ok((url, decision.addresses))
    }

    async fn evaluate(&self, raw: &str) -> EgressDecision {
        let url = match Url::parse(raw.trim()) {
            Ok(url) => url,
            Err(e) => return EgressDecision::deny(format!("Invalid URL: {e}")),
        };

        // Step 1: scheme
        if !matches!(url.scheme(), "http" | "https") {
            return EgressDecision::deny(format!(
                "Scheme '{}' is not allowed; only http and https are permitted",
                url.scheme()
            ));
        }

        let Some(host) = url.host() else {
            return EgressDecision::deny("URL has no host");
        };
        let port = url.port_or_known_default().unwrap_or(80);

        let host_text = match &host {
            Host::Domain(d) => normalize_host(d),
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
        };

        // Step 2: hostname blocklist
        if let Host::Domain(_) = host {
            if let Some(rule) = blocked_hostname(&host_text) {
                return EgressDecision::deny(format!(
                    "Host '{host_text}' is blocked ({rule})"
                ));
            }
        }

        // Step 3: allow-list
        if !self.allowed_domains.is_empty() && !self.is_allow_listed(&host_text) {
            return EgressDecision::deny(format!(
                "Host '{host_text}' is not in the allowed domain list"
            ));
        }

        // Step 4: address ranges
        let addresses: Vec<IpAddr> = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(_) => match self.resolver.resolve(&host_text, port).await {
                Ok(addrs) if !addrs.is_empty() => addrs,
                Ok(_) => {
                    return EgressDecision::deny(format!(
                        "DNS resolution for '{host_text}' returned no addresses"
                    ));
                }
                Err(e) => {
                    return EgressDecision::deny(format!(
                        "DNS resolution for '{host_text}' failed: {e}"
                    ));
                }
            },
        };

        for ip in &addresses {
            if let Some(label) = blocked_range(*ip) {
                return EgressDecision::deny(format!(
                    "Host '{host_text}' resolves to a private/internal address {ip} ({label})"
                ));
            }
        }

        EgressDecision {
            allowed: true,
            reason: format!("Host '{host_text}' resolves to public address(es)"),
            addresses: addresses
                .into_iter()
                .map(|ip| SocketAddr::new(ip, port))
                .collect(),
        }
    }

    fn is_allow_listed(&self, host: &str) -> bool {
        self.allowed_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn blocked_hostname(host: &str) -> Option<String> {
    if BLOCKED_HOSTS.contains(&host) {
        return Some("reserved hostname".to_string());
    }
    BLOCKED_SUFFIXES
        .iter()
        .find(|s| host == **s || host.ends_with(&format!(".{s}")))
        .map(|s| format!("internal domain suffix '.{s}'"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn public() -> IpAddr {
        "93.184.216.34".parse().unwrap()
    }

    fn guard() -> EgressGuard {
        let resolver = StaticResolver::new()
            .with_host("example.com", vec![public()])
            .with_host("api.example.com", vec![public()])
            .with_host("rebind.example.net", vec![public(), "10.0.0.5".parse().unwrap()])
            .with_host("empty.example.org", vec![]);
        EgressGuard::new().with_resolver(Arc::new(resolver))
    }

    #[tokio::test]
    async fn test_metadata_ip_rejected_with_reason() {
        let decision = guard()
            .validate("http://169.254.169.254/latest/meta-data")
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("private"));
        assert!(decision.reason.contains("link-local"));
    }

    #[tokio::test]
    async fn test_schemes() {
        let g = guard();
        for url in [
            "file:///etc/passwd",
            "ftp://example.com/x",
            "gopher://example.com",
            "data:text/plain,hi",
            "javascript:alert(1)",
            "not a url",
        ] {
            assert!(!g.validate(url).await.allowed, "{url} should be blocked");
        }
        assert!(g.validate("https://example.com/").await.allowed);
    }

    #[tokio::test]
    async fn test_blocked_hostnames() {
        let g = guard();
        for url in [
            "http://localhost:8080/",
            "http://LOCALHOST./",
            "http://metadata.google.internal/computeMetadata/v1/",
            "http://db.internal/",
            "http://printer.local/",
            "http://kubernetes.default.svc/api",
            "http://redis.prod.svc.cluster.local/",
        ] {
            let decision = g.validate(url).await;
            assert!(!decision.allowed, "{url} should be blocked");
            assert!(decision.reason.contains("blocked"), "{}", decision.reason);
        }
    }

    #[tokio::test]
    async fn test_ip_literals() {
        let g = guard();
        for url in [
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://172.20.0.1/",
            "http://192.168.1.1/",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[::ffff:169.254.169.254]/",
            "http://2130706433/",
            "http://0x7f.0.0.1/",
            "http://224.0.0.1/",
            "http://255.255.255.255/",
        ] {
            assert!(!g.validate(url).await.allowed, "{url} should be blocked");
        }
        assert!(g.validate("http://93.184.216.34/").await.allowed);
        assert!(g.validate("http://[2606:4700::1111]/").await.allowed);
    }

    #[tokio::test]
    async fn test_any_private_resolution_rejects() {
        let decision = guard().validate("https://rebind.example.net/").await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_dns_failure_fails_closed() {
        let g = guard();
        assert!(!g.validate("https://unknown.example.io/").await.allowed);
        assert!(!g.validate("https://empty.example.org/").await.allowed);
    }

    #[tokio::test]
    async fn test_allow_list() {
        let g = guard().with_allowed_domains(["example.com"]);
        assert!(g.validate("https://example.com/a").await.allowed);
        assert!(g.validate("https://api.example.com/a").await.allowed);

        let decision = g.validate("https://evil-example.com/").await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("allowed domain list"));
        assert!(!g.validate("http://93.184.216.34/").await.allowed);
    }

    #[tokio::test]
    async fn test_allowed_decision_carries_pinned_addresses() {
        let decision = guard().validate("https://example.com:8443/").await;
        assert!(decision.allowed);
        assert_eq!(
            decision.addresses,
            vec![SocketAddr::new(public(), 8443)]
        );
    }

    #[tokio::test]
    async fn test_check_returns_error() {
        let err = guard().check("http://localhost/").await.unwrap_err();
        assert!(matches!(err, GuardError::UnsafeUrl(_)));
        let (url, addrs) = guard().check("http://example.com/x").await.unwrap();
        assert_eq!(url.path(), "/x");
        assert_eq!(addrs.len(), 1);
    }

    #[test]
    fn test_blocked_range_labels() {
        assert_eq!(blocked_range("169.254.169.254".parse().unwrap()), Some("link-local"));
        assert_eq!(blocked_range("100.64.0.1".parse().unwrap()), Some("shared address space"));
        assert_eq!(blocked_range("198.51.100.7".parse().unwrap()), Some("documentation"));
        assert_eq!(blocked_range("64:ff9b::a00:1".parse().unwrap()), Some("private"));
        assert_eq!(blocked_range("2002:7f00:1::".parse().unwrap()), Some("loopback"));
        assert_eq!(blocked_range("8.8.8.8".parse().unwrap()), None);
        assert_eq!(blocked_range("2001:4860:4860::8888".parse().unwrap()), None);
    }
}
