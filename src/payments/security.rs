//! Source-address checks for inbound gateway callbacks.

use http::HeaderMap;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpDecision {
    Allowed,
    /// Outside the allow-list but let through because enforcement is off.
    Warned,
    Rejected,
}

impl IpDecision {
    pub fn is_rejected(&self) -> bool {
        matches!(self, IpDecision::Rejected)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackIpPolicy {
    /// Reject violations instead of logging them. On in production.
    pub enforce: bool,
    /// Take the client address from `X-Forwarded-For` when behind a proxy.
    pub trust_forwarded_for: bool,
}

impl CallbackIpPolicy {
    pub fn new(enforce: bool, trust_forwarded_for: bool) -> Self {
        Self {
            enforce,
            trust_forwarded_for,
        }
    }

    /// The address the callback came from.
    pub fn source_ip(&self, headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
        if self.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return ip;
            }
        }
        peer.ip()
    }

    pub fn check(&self, provider: &str, allowed: &[IpAddr], source: IpAddr) -> IpDecision {
        if source.is_loopback() || allowed.contains(&source) {
            return IpDecision::Allowed;
        }

        warn!(
            provider = provider,
            source_ip = %source,
            enforce = self.enforce,
            "callback from address outside provider allow-list"
        );
        if self.enforce {
            IpDecision::Rejected
        } else {
            IpDecision::Warned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> IpAddr {
        ip.parse().expect("valid ip")
    }

    #[test]
    fn loopback_and_listed_addresses_pass() {
        let policy = CallbackIpPolicy::new(true, false);
        let allowed = vec![addr("203.0.113.10")];
        assert_eq!(
            policy.check("hosted_form", &allowed, addr("127.0.0.1")),
            IpDecision::Allowed
        );
        assert_eq!(
            policy.check("hosted_form", &allowed, addr("::1")),
            IpDecision::Allowed
        );
        assert_eq!(
            policy.check("hosted_form", &allowed, addr("203.0.113.10")),
            IpDecision::Allowed
        );
    }

    #[test]
    fn unlisted_address_is_rejected_only_when_enforced() {
        let allowed = vec![addr("203.0.113.10")];
        assert!(CallbackIpPolicy::new(true, false)
            .check("hosted_form", &allowed, addr("198.51.100.7"))
            .is_rejected());
        assert_eq!(
            CallbackIpPolicy::new(false, false).check("hosted_form", &allowed, addr("198.51.100.7")),
            IpDecision::Warned
        );
    }

    #[test]
    fn forwarded_for_is_used_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.10, 10.0.0.1".parse().expect("valid header"),
        );
        let peer: SocketAddr = "10.0.0.1:4000".parse().expect("valid addr");

        assert_eq!(
            CallbackIpPolicy::new(true, true).source_ip(&headers, peer),
            addr("203.0.113.10")
        );
        assert_eq!(
            CallbackIpPolicy::new(true, false).source_ip(&headers, peer),
            addr("10.0.0.1")
        );
    }
}
