//! Subscription route patterns and the precedence rule used to pick a
//! handler when more than one registered route matches an inbound call.
//!
//! Precedence, highest first: exact path beats a wildcard suffix; among
//! paths of the same kind, a longer path beats a shorter one; an explicit
//! port beats `*` or `0`. [`SubscriptionPattern::specificity`] encodes this
//! as an orderable tuple so a subscription engine can sort candidates once
//! at insertion time rather than re-deriving precedence on every dispatch.

use fabric_errors::Error;

/// The host a subscription answers to. Only an exact hostname is supported
/// today; `Any` is reserved for a future wildcard host (the spec does not
/// call for host wildcards, but the trie's edge structure accommodates one).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostPattern {
    Exact(String),
    Any,
}

impl HostPattern {
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(h) => h.eq_ignore_ascii_case(host),
            HostPattern::Any => true,
        }
    }
}

/// A subscription's port: either a specific port number or the wildcard
/// group (`*` and `0` are equivalent — both mean "any port").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortPattern {
    Explicit(u16),
    Any,
}

impl PortPattern {
    pub fn parse(raw: &str) -> PortPattern {
        match raw {
            "*" | "0" | "" => PortPattern::Any,
            _ => raw
                .parse::<u16>()
                .map(PortPattern::Explicit)
                .unwrap_or(PortPattern::Any),
        }
    }

    pub fn matches(&self, port: u16) -> bool {
        match self {
            PortPattern::Explicit(p) => *p == port,
            PortPattern::Any => true,
        }
    }

    fn specificity(self) -> u8 {
        match self {
            PortPattern::Explicit(_) => 1,
            PortPattern::Any => 0,
        }
    }
}

/// A path pattern: a fixed sequence of segments, optionally open-ended
/// (trailing `/` in the source pattern) to match any suffix beyond them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<String>,
    open_ended: bool,
}

impl PathPattern {
    pub fn parse(raw: &str) -> PathPattern {
        let open_ended = raw.ends_with('/') && raw != "/";
        let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').map(str::to_owned).collect()
        };
        PathPattern {
            segments,
            open_ended,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let candidate: Vec<&str> = path
            .trim_start_matches('/')
            .trim_end_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if self.open_ended {
            candidate.len() >= self.segments.len()
                && candidate
                    .iter()
                    .zip(self.segments.iter())
                    .all(|(a, b)| *a == b)
        } else {
            candidate.len() == self.segments.len()
                && candidate
                    .iter()
                    .zip(self.segments.iter())
                    .all(|(a, b)| *a == b)
        }
    }

    fn specificity(&self) -> (u8, u32) {
        (u8::from(!self.open_ended), self.segments.len() as u32)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_open_ended(&self) -> bool {
        self.open_ended
    }
}

/// A registered route: `{method, host, port, path pattern}` paired with an
/// opaque handler key. The handler itself lives in the subscription engine;
/// this type only carries enough to match and to rank candidates.
#[derive(Debug, Clone)]
pub struct SubscriptionPattern {
    pub method: String,
    pub host: HostPattern,
    pub port: PortPattern,
    pub path: PathPattern,
}

impl SubscriptionPattern {
    pub fn parse(method: &str, host: &str, port: &str, path: &str) -> Result<Self, Error> {
        if method.is_empty() {
            return Err(Error::new("subscription method must not be empty", vec![]));
        }
        Ok(SubscriptionPattern {
            method: method.to_ascii_uppercase(),
            host: if host == "*" {
                HostPattern::Any
            } else {
                HostPattern::Exact(host.to_owned())
            },
            port: PortPattern::parse(port),
            path: PathPattern::parse(path),
        })
    }

    pub fn matches(&self, method: &str, host: &str, port: u16, path: &str) -> bool {
        (self.method == "*" || self.method.eq_ignore_ascii_case(method))
            && self.host.matches(host)
            && self.port.matches(port)
            && self.path.matches(path)
    }

    /// An orderable specificity tuple: `(exact path, path length, explicit
    /// port)`. Sorting candidates by this value, descending, yields the
    /// precedence order the spec requires.
    pub fn specificity(&self) -> (u8, u32, u8) {
        let (exactness, len) = self.path.specificity();
        (exactness, len, self.port.specificity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_path_outranks_open_ended() {
        let exact = SubscriptionPattern::parse("GET", "svc", "443", "/items/42").unwrap();
        let prefix = SubscriptionPattern::parse("GET", "svc", "443", "/items/").unwrap();
        assert!(exact.specificity() > prefix.specificity());
    }

    #[test]
    fn longer_open_ended_path_outranks_shorter() {
        let longer = SubscriptionPattern::parse("GET", "svc", "443", "/a/b/").unwrap();
        let shorter = SubscriptionPattern::parse("GET", "svc", "443", "/a/").unwrap();
        assert!(longer.specificity() > shorter.specificity());
    }

    #[test]
    fn explicit_port_outranks_wildcard_port() {
        let explicit = SubscriptionPattern::parse("GET", "svc", "443", "/a").unwrap();
        let wildcard = SubscriptionPattern::parse("GET", "svc", "*", "/a").unwrap();
        assert!(explicit.specificity() > wildcard.specificity());
    }

    #[test]
    fn zero_port_behaves_like_wildcard() {
        assert_eq!(PortPattern::parse("0"), PortPattern::Any);
        assert_eq!(PortPattern::parse("*"), PortPattern::Any);
    }

    #[test]
    fn open_ended_path_matches_any_suffix() {
        let p = PathPattern::parse("/items/");
        assert!(p.matches("/items/42/reviews"));
        assert!(!p.matches("/other"));
    }

    #[test]
    fn root_pattern_matches_only_root() {
        let p = PathPattern::parse("/");
        assert!(p.matches("/"));
        assert!(!p.matches("/items"));
    }

    #[test]
    fn subscription_match_is_case_insensitive_on_method_and_host() {
        let s = SubscriptionPattern::parse("get", "Svc.Example", "443", "/items").unwrap();
        assert!(s.matches("GET", "svc.example", 443, "/items"));
    }
}
