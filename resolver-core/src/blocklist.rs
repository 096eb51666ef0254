// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Exact and subdomain-suffix matching of a queried name against a denylist. No wildcard
//! metacharacters are supported, matching spec behavior exactly: a pattern is a suffix
//! specifier, nothing more.

use crate::config::Configuration;
use crate::hostindex::normalize;
use arc_swap::ArcSwap;
use dmatcher::Dmatcher;

/// Ordered list of lowercased domain patterns, backed by a label-trie for O(depth) matching
/// (depth is bounded by the name's label count, never by pattern count).
pub struct Blocklist {
    matcher: ArcSwap<Dmatcher<()>>,
}

impl Blocklist {
    /// An empty blocklist that blocks nothing.
    pub fn empty() -> Self {
        Self {
            matcher: ArcSwap::from_pointee(Dmatcher::new()),
        }
    }

    /// Build a blocklist from a `Configuration`.
    pub fn new(config: &Configuration) -> Self {
        let list = Self::empty();
        list.rebuild(config);
        list
    }

    /// Atomically replace the pattern set.
    pub fn rebuild(&self, config: &Configuration) {
        let mut matcher = Dmatcher::new();
        for pattern in &config.dns.block_list {
            matcher.insert(&normalize(pattern), ());
        }
        self.matcher.store(std::sync::Arc::new(matcher));
    }

    /// Returns true iff `name` equals some configured pattern, or is a subdomain of one.
    pub fn is_blocked(&self, name: &str) -> bool {
        self.matcher.load().matches(&normalize(name)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, DnsConfig};

    fn list(patterns: &[&str]) -> Blocklist {
        let cfg = Configuration {
            dns: DnsConfig {
                block_list: patterns.iter().map(|s| s.to_string()).collect(),
                ..DnsConfig::default()
            },
            ..Configuration::default()
        };
        Blocklist::new(&cfg)
    }

    #[test]
    fn exact_and_subdomain_match() {
        let bl = list(&["evil.com"]);
        assert!(bl.is_blocked("evil.com"));
        assert!(bl.is_blocked("evil.com."));
        assert!(bl.is_blocked("sub.evil.com"));
        assert!(bl.is_blocked("x.y.evil.com"));
        assert!(!bl.is_blocked("notevil.com"));
        assert!(!bl.is_blocked("evilcom"));
        // A bare parent label of a pattern must never match.
        assert!(!bl.is_blocked("com"));
    }

    #[test]
    fn case_insensitive() {
        let bl = list(&["Evil.COM"]);
        assert!(bl.is_blocked("evil.com"));
        assert!(bl.is_blocked("EVIL.COM"));
    }

    #[test]
    fn empty_list_blocks_nothing() {
        let bl = Blocklist::empty();
        assert!(!bl.is_blocked("anything.com"));
    }
}
