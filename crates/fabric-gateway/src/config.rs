//! Gateway configuration loading.
//!
//! TOML is the primary config source, following the same raw-struct-with-
//! `Option` fields-then-apply-defaults shape as the forwarder's config
//! loader; everything here also has a hard-coded default so a gateway can be
//! built with `GatewayConfig::default()` alone (used throughout the tests
//! and the echo demo).

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Leaf parse/validation failures, composed under [`fabric_errors::Error`]
/// by callers that need the richer status/trace-id/cause-chain value; kept
/// as its own small enum here because this crate's config grammar (port
/// mapping rules, origin lists) has failure modes specific to parsing, not
/// to call handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid port mapping rule '{0}': expected 'x:y->z'")]
    PortMapping(String),
    #[error("invalid port in mapping rule '{0}'")]
    PortMappingPort(String),
}

/// One `x:y->z` rule: `x` the external port this gateway is listening on,
/// `y` the internal port requested by the URL path, `z` the port actually
/// used to resolve the internal route (or a pass-through of `y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMappingRule {
    pub external: PortMatch,
    pub requested: PortMatch,
    pub resolved: PortResolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMatch {
    Any,
    Exact(u16),
}

impl PortMatch {
    fn matches(self, value: u16) -> bool {
        match self {
            PortMatch::Any => true,
            PortMatch::Exact(p) => p == value,
        }
    }

    fn specificity(self) -> u8 {
        match self {
            PortMatch::Any => 0,
            PortMatch::Exact(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortResolution {
    PassThrough,
    Exact(u16),
}

fn parse_port_match(s: &str) -> Result<PortMatch, ConfigError> {
    if s == "*" {
        return Ok(PortMatch::Any);
    }
    s.parse::<u16>()
        .map(PortMatch::Exact)
        .map_err(|_| ConfigError::PortMappingPort(s.to_string()))
}

/// Parses the comma-separated `PortMappings` grammar: `x:y->z, x:y->z, ...`.
pub fn parse_port_mappings(spec: &str) -> Result<Vec<PortMappingRule>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_one_port_mapping)
        .collect()
}

fn parse_one_port_mapping(rule: &str) -> Result<PortMappingRule, ConfigError> {
    let (lhs, z) = rule
        .split_once("->")
        .ok_or_else(|| ConfigError::PortMapping(rule.to_string()))?;
    let (x, y) = lhs
        .split_once(':')
        .ok_or_else(|| ConfigError::PortMapping(rule.to_string()))?;
    let external = parse_port_match(x.trim())?;
    let requested = parse_port_match(y.trim())?;
    let resolved = if z.trim() == "*" {
        PortResolution::PassThrough
    } else {
        PortResolution::Exact(
            z.trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::PortMappingPort(z.to_string()))?,
        )
    };
    Ok(PortMappingRule {
        external,
        requested,
        resolved,
    })
}

/// Resolves the internal port to route to, given the external port this
/// gateway instance is bound on and the port requested by the inbound URL.
/// Specific rules (explicit `x`/`y`) dominate wildcard ones; among rules of
/// equal specificity the first one listed wins.
pub fn resolve_port(rules: &[PortMappingRule], external_port: u16, requested_port: u16) -> u16 {
    let mut best: Option<(&PortMappingRule, u8)> = None;
    for rule in rules {
        if !rule.external.matches(external_port) || !rule.requested.matches(requested_port) {
            continue;
        }
        let score = rule.external.specificity() + rule.requested.specificity();
        let better = match best {
            None => true,
            Some((_, current)) => score > current,
        };
        if better {
            best = Some((rule, score));
        }
    }
    match best.map(|(r, _)| r.resolved) {
        Some(PortResolution::Exact(p)) => p,
        Some(PortResolution::PassThrough) | None => requested_port,
    }
}

/// Which HTTP origins the CORS layer accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

/// A blocked path entry: either an exact path or a `*.ext` extension glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedPattern {
    Exact(String),
    Extension(String),
}

impl BlockedPattern {
    pub fn parse(line: &str) -> Option<BlockedPattern> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if let Some(ext) = line.strip_prefix("*.") {
            Some(BlockedPattern::Extension(ext.to_string()))
        } else {
            Some(BlockedPattern::Exact(line.to_string()))
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            BlockedPattern::Exact(p) => p == path,
            BlockedPattern::Extension(ext) => path
                .rsplit('.')
                .next()
                .is_some_and(|got| got.eq_ignore_ascii_case(ext)),
        }
    }
}

pub fn is_blocked(patterns: &[BlockedPattern], path: &str) -> bool {
    patterns.iter().any(|p| p.matches(path))
}

/// The gateway's runtime configuration surface.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub time_budget: Duration,
    pub ports: Vec<u16>,
    pub request_memory_limit_bytes: usize,
    pub allowed_origins: AllowedOrigins,
    pub port_mappings: Vec<PortMappingRule>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub read_header_timeout: Option<Duration>,
    pub middleware: Option<String>,
    pub server_languages: Vec<String>,
    pub blocked_paths: Vec<BlockedPattern>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            time_budget: Duration::from_secs(20),
            ports: vec![8080],
            request_memory_limit_bytes: 4096 * 1024 * 1024,
            allowed_origins: AllowedOrigins::Any,
            port_mappings: parse_port_mappings("8080:*->*, 443:*->443, 80:*->443")
                .expect("default port mapping grammar is valid"),
            read_timeout: None,
            write_timeout: None,
            read_header_timeout: None,
            middleware: None,
            server_languages: Vec::new(),
            blocked_paths: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RawGatewayConfig {
    time_budget_ms: Option<u64>,
    ports: Option<Vec<u16>>,
    request_memory_limit_mb: Option<u64>,
    allowed_origins: Option<Vec<String>>,
    port_mappings: Option<String>,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    read_header_timeout_ms: Option<u64>,
    middleware: Option<String>,
    server_languages: Option<Vec<String>>,
    blocked_paths: Option<String>,
}

impl GatewayConfig {
    /// Loads a gateway config from a TOML string, applying defaults for
    /// anything absent.
    pub fn from_toml_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
        let raw: RawGatewayConfig = toml::from_str(toml_str)?;
        let defaults = GatewayConfig::default();

        let allowed_origins = match raw.allowed_origins {
            None => defaults.allowed_origins,
            Some(list) if list.iter().any(|o| o == "*") => AllowedOrigins::Any,
            Some(list) => AllowedOrigins::List(list),
        };
        let port_mappings = match raw.port_mappings {
            Some(s) => parse_port_mappings(&s)?,
            None => defaults.port_mappings,
        };
        let blocked_paths = match raw.blocked_paths {
            Some(s) => s.lines().filter_map(BlockedPattern::parse).collect(),
            None => defaults.blocked_paths,
        };

        Ok(GatewayConfig {
            time_budget: raw
                .time_budget_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.time_budget),
            ports: raw.ports.unwrap_or(defaults.ports),
            request_memory_limit_bytes: raw
                .request_memory_limit_mb
                .map(|mb| (mb * 1024 * 1024) as usize)
                .unwrap_or(defaults.request_memory_limit_bytes),
            allowed_origins,
            port_mappings,
            read_timeout: raw.read_timeout_ms.map(Duration::from_millis),
            write_timeout: raw.write_timeout_ms.map(Duration::from_millis),
            read_header_timeout: raw.read_header_timeout_ms.map(Duration::from_millis),
            middleware: raw.middleware,
            server_languages: raw.server_languages.unwrap_or(defaults.server_languages),
            blocked_paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_mappings_pass_through_on_8080() {
        let cfg = GatewayConfig::default();
        assert_eq!(resolve_port(&cfg.port_mappings, 8080, 19000), 19000);
    }

    #[test]
    fn default_port_mappings_force_443_on_the_443_listener() {
        let cfg = GatewayConfig::default();
        assert_eq!(resolve_port(&cfg.port_mappings, 443, 8081), 443);
    }

    #[test]
    fn default_port_mappings_force_443_on_the_80_listener() {
        let cfg = GatewayConfig::default();
        assert_eq!(resolve_port(&cfg.port_mappings, 80, 8081), 443);
    }

    #[test]
    fn unmatched_external_port_passes_the_requested_port_through() {
        let cfg = GatewayConfig::default();
        assert_eq!(resolve_port(&cfg.port_mappings, 9999, 1234), 1234);
    }

    #[test]
    fn specific_rule_wins_over_a_wildcard_rule() {
        let rules = parse_port_mappings("8080:*->1111, 8080:443->2222").unwrap();
        assert_eq!(resolve_port(&rules, 8080, 443), 2222);
        assert_eq!(resolve_port(&rules, 8080, 80), 1111);
    }

    #[test]
    fn blocked_extension_matches_case_insensitively() {
        let patterns = vec![BlockedPattern::parse("*.env").unwrap()];
        assert!(is_blocked(&patterns, "/secrets/.ENV"));
        assert!(!is_blocked(&patterns, "/widgets"));
    }

    #[test]
    fn blocked_exact_path_matches_only_that_path() {
        let patterns = vec![BlockedPattern::parse("/internal/debug").unwrap()];
        assert!(is_blocked(&patterns, "/internal/debug"));
        assert!(!is_blocked(&patterns, "/internal/debug/extra"));
    }

    #[test]
    fn from_toml_str_applies_defaults_for_missing_fields() {
        let cfg = GatewayConfig::from_toml_str("ports = [9090]\n").unwrap();
        assert_eq!(cfg.ports, vec![9090]);
        assert_eq!(cfg.time_budget, Duration::from_secs(20));
        assert_eq!(cfg.allowed_origins, AllowedOrigins::Any);
    }

    #[test]
    fn from_toml_str_parses_explicit_origin_list() {
        let cfg =
            GatewayConfig::from_toml_str("allowed_origins = [\"https://a.example\"]\n").unwrap();
        assert_eq!(
            cfg.allowed_origins,
            AllowedOrigins::List(vec!["https://a.example".to_string()])
        );
    }

    #[test]
    fn malformed_port_mapping_rule_is_rejected() {
        assert!(parse_port_mappings("garbage").is_err());
    }
}
