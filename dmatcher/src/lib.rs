#![deny(missing_docs)]
//! This is a simple domain matching algorithm to match domains against a set of user-defined
//! domain rules.
//!
//! Features:
//!
//! -  Super fast
//! -  No wildcard / regex support, exact-label suffix matching only
//!
//! # Getting Started
//!
//! ```
//! use dmatcher::Dmatcher;
//! let mut matcher = Dmatcher::new();
//! matcher.insert("apple.com", 1);
//! assert_eq!(matcher.matches("store.apple.com"), Some(1));
//! assert_eq!(matcher.matches("apple.com"), Some(1));
//! assert_eq!(matcher.matches("notapple.com"), None);
//! ```

use hashbrown::HashMap;
use std::sync::Arc;

/// Type alias for Dmatcher internal usages. Exposed in case that you need it.
pub type Label = Arc<str>;

#[derive(Debug, PartialEq, Clone)]
struct LevelNode<T: Copy> {
    // Set only on the node that terminates an inserted domain. A node reached purely as an
    // intermediate label on the way to a deeper insertion has `dst == None`.
    dst: Option<T>,
    next_lvs: HashMap<Label, LevelNode<T>>,
}

impl<T: Copy> LevelNode<T> {
    fn new() -> Self {
        Self {
            dst: None,
            next_lvs: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
/// Dmatcher matcher algorithm: a label-trie keyed from the TLD down, so that every inserted
/// domain and all of its subdomains share a single path.
pub struct Dmatcher<T: Copy> {
    root: LevelNode<T>,
}

impl<T: Copy> Default for Dmatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> Dmatcher<T> {
    /// Create a matcher.
    pub fn new() -> Self {
        Self {
            root: LevelNode::new(),
        }
    }

    #[cfg(test)]
    fn get_root(&self) -> &LevelNode<T> {
        &self.root
    }

    /// Pass in a string containing `\n`-separated domains, inserting each with the same `dst`.
    pub fn insert_lines(&mut self, domains: &str, dst: T) {
        for lv in domains.split('\n') {
            self.insert(lv, dst);
        }
    }

    /// Pass in a domain and insert it into the matcher.
    pub fn insert(&mut self, domain: &str, dst: T) {
        let mut lvs: Vec<&str> = domain.split('.').filter(|lv| !lv.is_empty()).collect();
        lvs.reverse();
        let mut ptr = &mut self.root;
        for lv in lvs {
            ptr = ptr
                .next_lvs
                .entry(Arc::from(lv))
                .or_insert_with(LevelNode::new);
        }
        ptr.dst = Some(dst);
    }

    /// Match the domain against inserted domain rules. If `apple.com` is inserted, then
    /// `apple.com` itself, `www.apple.com` and `store.www.apple.com` are matched while
    /// `apple.cn` and bare `com` are not. Trailing dots and label case are not normalized here;
    /// callers are expected to normalize (lowercase, strip trailing dot) before calling.
    pub fn matches(&self, domain: &str) -> Option<T> {
        let mut lvs: Vec<&str> = domain.split('.').filter(|lv| !lv.is_empty()).collect();
        lvs.reverse();
        let mut ptr = &self.root;
        for lv in lvs {
            // Once a pattern terminates, every deeper label is a matching subdomain.
            if ptr.dst.is_some() {
                return ptr.dst;
            }
            ptr = match ptr.next_lvs.get(lv) {
                Some(v) => v,
                None => return None,
            };
        }
        ptr.dst
    }
}

#[cfg(test)]
mod tests {
    use super::{Dmatcher, Label, LevelNode};
    use hashbrown::HashMap;
    use std::sync::Arc;

    #[test]
    fn matches() {
        let mut matcher = Dmatcher::new();
        matcher.insert("apple.com", 1);
        matcher.insert("apple.cn", 2);
        assert_eq!(matcher.matches("store.apple.com"), Some(1));
        assert_eq!(matcher.matches("store.apple.com."), Some(1));
        assert_eq!(matcher.matches("apple.com"), Some(1));
        assert_eq!(matcher.matches("baidu.com"), None);
        // A bare parent label of an inserted pattern must not match.
        assert_eq!(matcher.matches("com"), None);
        assert_eq!(matcher.matches("你好.store.www.apple.cn"), Some(2));
    }

    #[test]
    fn insertion() {
        let mut matcher = Dmatcher::new();
        matcher.insert("apple.com", 1);
        matcher.insert("apple.cn", 2);
        println!("{:?}", matcher.get_root());
        assert_eq!(
            matcher.get_root(),
            &LevelNode {
                dst: None,
                next_lvs: [
                    (
                        Arc::from("cn"),
                        LevelNode {
                            dst: None,
                            next_lvs: [(
                                Arc::from("apple"),
                                LevelNode {
                                    dst: Some(2),
                                    next_lvs: []
                                        .iter()
                                        .cloned()
                                        .collect::<HashMap<Label, LevelNode<u32>>>()
                                }
                            )]
                            .iter()
                            .cloned()
                            .collect::<HashMap<Label, LevelNode<u32>>>()
                        }
                    ),
                    (
                        Arc::from("com"),
                        LevelNode {
                            dst: None,
                            next_lvs: [(
                                Arc::from("apple"),
                                LevelNode {
                                    dst: Some(1),
                                    next_lvs: []
                                        .iter()
                                        .cloned()
                                        .collect::<HashMap<Label, LevelNode<u32>>>()
                                }
                            )]
                            .iter()
                            .cloned()
                            .collect::<HashMap<Label, LevelNode<u32>>>()
                        }
                    )
                ]
                .iter()
                .cloned()
                .collect::<HashMap<Label, LevelNode<u32>>>()
            }
        );
    }

    #[test]
    fn no_false_positive_on_sibling_labels() {
        let mut matcher = Dmatcher::new();
        matcher.insert("evil.com", true);
        assert_eq!(matcher.matches("good.com"), None);
        assert_eq!(matcher.matches("evilcom"), None);
    }
}
