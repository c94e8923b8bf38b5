//! A trie keyed on path segments, used to resolve the handler for an
//! inbound (method, host, port, path) tuple under the spec's precedence
//! rule (exact > wildcard; longer path > shorter; explicit port > `*`/`0`).
//!
//! The trie's job is indexing: it walks segments to narrow down candidate
//! routes quickly, then defers the actual method/host/port/path match to
//! [`fabric_wire::SubscriptionPattern::matches`] and picks the highest
//! [`fabric_wire::SubscriptionPattern::specificity`] among the survivors.

use std::collections::HashMap;

use fabric_wire::SubscriptionPattern;

struct Node<H> {
    children: HashMap<String, Node<H>>,
    here: Vec<(RouteId, SubscriptionPattern, H)>,
}

impl<H> Node<H> {
    fn new() -> Self {
        Node {
            children: HashMap::new(),
            here: Vec::new(),
        }
    }
}

/// A unique handle to a registered route, used to unregister it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u64);

pub struct Trie<H> {
    root: Node<H>,
    next_id: u64,
    // Tracked separately so `remove` can find a route's segment path
    // without re-deriving it from the pattern.
    index: HashMap<u64, Vec<String>>,
}

impl<H: Clone> Default for Trie<H> {
    fn default() -> Self {
        Trie::new()
    }
}

impl<H: Clone> Trie<H> {
    pub fn new() -> Self {
        Trie {
            root: Node::new(),
            next_id: 0,
            index: HashMap::new(),
        }
    }

    pub fn insert(&mut self, pattern: SubscriptionPattern, handler: H) -> RouteId {
        let id = RouteId(self.next_id);
        self.next_id += 1;
        let segments = pattern.path.segments().to_vec();
        self.index.insert(id.0, segments.clone());
        let mut node = &mut self.root;
        for seg in &segments {
            node = node.children.entry(seg.clone()).or_insert_with(Node::new);
        }
        node.here.push((id, pattern, handler));
        id
    }

    /// Unregisters a previously inserted route.
    pub fn remove(&mut self, id: RouteId) {
        let Some(segments) = self.index.remove(&id.0) else {
            return;
        };
        let mut node = &mut self.root;
        for seg in &segments {
            let Some(next) = node.children.get_mut(seg) else {
                return;
            };
            node = next;
        }
        node.here.retain(|(entry_id, _, _)| *entry_id != id);
    }

    /// All currently registered patterns, in no particular order. Used by
    /// the OpenAPI document synthesizer, which only needs the method/path
    /// shape of each route, not its handler.
    pub fn patterns(&self) -> Vec<SubscriptionPattern> {
        let mut out = Vec::new();
        collect_patterns(&self.root, &mut out);
        out
    }

    /// Resolves the best-matching handler, if any, for an inbound call.
    pub fn resolve(&self, method: &str, host: &str, port: u16, path: &str) -> Option<&H> {
        let candidate_segments: Vec<&str> = path
            .trim_start_matches('/')
            .trim_end_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let mut best: Option<(&SubscriptionPattern, &H)> = None;
        let mut node = &self.root;
        let mut depth = 0usize;
        collect_matches(node, method, host, port, path, &mut best);
        while depth < candidate_segments.len() {
            match node.children.get(candidate_segments[depth]) {
                Some(next) => {
                    node = next;
                    depth += 1;
                    collect_matches(node, method, host, port, path, &mut best);
                }
                None => break,
            }
        }
        best.map(|(_, h)| h)
    }
}

fn collect_patterns<H>(node: &Node<H>, out: &mut Vec<SubscriptionPattern>) {
    for (_, pattern, _) in &node.here {
        out.push(pattern.clone());
    }
    for child in node.children.values() {
        collect_patterns(child, out);
    }
}

fn collect_matches<'a, H>(
    node: &'a Node<H>,
    method: &str,
    host: &str,
    port: u16,
    path: &str,
    best: &mut Option<(&'a SubscriptionPattern, &'a H)>,
) {
    for (_, pattern, handler) in &node.here {
        if !pattern.matches(method, host, port, path) {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, _)) => pattern.specificity() > current.specificity(),
        };
        if better {
            *best = Some((pattern, handler));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(method: &str, host: &str, port: &str, path: &str) -> SubscriptionPattern {
        SubscriptionPattern::parse(method, host, port, path).unwrap()
    }

    #[test]
    fn exact_beats_open_ended_prefix() {
        let mut trie: Trie<&'static str> = Trie::new();
        trie.insert(pat("GET", "svc", "443", "/items/"), "prefix");
        trie.insert(pat("GET", "svc", "443", "/items/42"), "exact");
        let got = trie.resolve("GET", "svc", 443, "/items/42");
        assert_eq!(got, Some(&"exact"));
    }

    #[test]
    fn falls_back_to_open_ended_when_no_exact_registered() {
        let mut trie: Trie<&'static str> = Trie::new();
        trie.insert(pat("GET", "svc", "443", "/items/"), "prefix");
        let got = trie.resolve("GET", "svc", 443, "/items/42/reviews");
        assert_eq!(got, Some(&"prefix"));
    }

    #[test]
    fn no_match_returns_none() {
        let trie: Trie<&'static str> = Trie::new();
        assert_eq!(trie.resolve("GET", "svc", 443, "/nope"), None);
    }

    #[test]
    fn patterns_lists_every_registered_route() {
        let mut trie: Trie<&'static str> = Trie::new();
        trie.insert(pat("GET", "svc", "443", "/echo"), "echo");
        trie.insert(pat("POST", "svc", "443", "/work"), "work");
        let patterns = trie.patterns();
        assert_eq!(patterns.len(), 2);
        assert!(patterns.iter().any(|p| p.method == "GET"));
        assert!(patterns.iter().any(|p| p.method == "POST"));
    }

    #[test]
    fn wildcard_port_loses_to_explicit_port() {
        let mut trie: Trie<&'static str> = Trie::new();
        trie.insert(pat("GET", "svc", "*", "/echo"), "any-port");
        trie.insert(pat("GET", "svc", "443", "/echo"), "this-port");
        let got = trie.resolve("GET", "svc", 443, "/echo");
        assert_eq!(got, Some(&"this-port"));
    }
}
