//! Frozen decision trie.
//!
//! A [`Program`] is a struct-of-arrays automaton produced by
//! [`TrieBuilder::freeze`](super::TrieBuilder::freeze). Node 0 is the root.
//! Each node owns a contiguous run of `(segment, child)` pairs sorted by
//! segment id, so a transition is one binary search.
//!
//! # Evaluation
//!
//! 1. Root star flags seed the result (deny beats allow).
//! 2. Each visited node's star flags overwrite the result (deeper wins).
//! 3. If the whole path was consumed, an exact flag on the landed node wins
//!    outright.

use super::{Decision, Effect, RuleKind};

pub const EXACT_ALLOW: u8 = 0b0001;
pub const EXACT_DENY: u8 = 0b0010;
pub const STAR_ALLOW: u8 = 0b0100;
pub const STAR_DENY: u8 = 0b1000;

/// Flag bit for a rule of the given kind and effect.
#[inline]
pub const fn flag_for(kind: RuleKind, effect: Effect) -> u8 {
    match (kind, effect) {
        (RuleKind::Exact, Effect::Allow) => EXACT_ALLOW,
        (RuleKind::Exact, Effect::Deny) => EXACT_DENY,
        (RuleKind::Star, Effect::Allow) => STAR_ALLOW,
        (RuleKind::Star, Effect::Deny) => STAR_DENY,
    }
}

#[inline]
fn star_of(flags: u8) -> Decision {
    if flags & STAR_DENY != 0 {
        Decision::Deny
    } else if flags & STAR_ALLOW != 0 {
        Decision::Allow
    } else {
        Decision::Unset
    }
}

#[inline]
fn exact_of(flags: u8) -> Decision {
    if flags & EXACT_DENY != 0 {
        Decision::Deny
    } else if flags & EXACT_ALLOW != 0 {
        Decision::Allow
    } else {
        Decision::Unset
    }
}

/// Immutable flat decision trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub(crate) flags: Vec<u8>,
    pub(crate) child_start: Vec<u32>,
    pub(crate) child_count: Vec<u32>,
    pub(crate) child_segment: Vec<u32>,
    pub(crate) child_node: Vec<u32>,
}

/// Which rule decided an [`Program::explain`] walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explanation {
    pub decision: Decision,
    /// Kind of the winning rule; `None` when nothing matched.
    pub kind: Option<RuleKind>,
    /// Node index holding the winning flag.
    pub node: u32,
    /// Number of path segments above the winning node (0 = root).
    pub depth: usize,
}

impl Default for Program {
    fn default() -> Self {
        Self::empty()
    }
}

impl Program {
    /// A program with only an unflagged root; decides `Unset` for everything.
    pub fn empty() -> Self {
        Self {
            flags: vec![0],
            child_start: vec![0],
            child_count: vec![0],
            child_segment: Vec::new(),
            child_node: Vec::new(),
        }
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.flags.len()
    }

    /// True when no node carries a flag.
    pub fn is_empty(&self) -> bool {
        self.flags.iter().all(|&f| f == 0)
    }

    /// Transition from `node` on `segment`.
    #[inline]
    pub fn child(&self, node: u32, segment: u32) -> Option<u32> {
        let start = self.child_start[node as usize] as usize;
        let count = self.child_count[node as usize] as usize;
        let segments = &self.child_segment[start..start + count];
        segments
            .binary_search(&segment)
            .ok()
            .map(|i| self.child_node[start + i])
    }

    /// Decide a node path. Exact rules at the landed node outrank stars.
    #[inline]
    pub fn decide(&self, path: &[u32]) -> Decision {
        let mut best = star_of(self.flags[0]);
        let mut node = 0u32;
        for &segment in path {
            match self.child(node, segment) {
                Some(next) => {
                    node = next;
                    let star = star_of(self.flags[node as usize]);
                    if star.is_set() {
                        best = star;
                    }
                }
                None => return best,
            }
        }
        let exact = exact_of(self.flags[node as usize]);
        if exact.is_set() { exact } else { best }
    }

    /// Decide a wildcard path: only star rules along the walk participate.
    #[inline]
    pub fn decide_star(&self, path: &[u32]) -> Decision {
        let mut best = star_of(self.flags[0]);
        let mut node = 0u32;
        for &segment in path {
            match self.child(node, segment) {
                Some(next) => {
                    node = next;
                    let star = star_of(self.flags[node as usize]);
                    if star.is_set() {
                        best = star;
                    }
                }
                None => break,
            }
        }
        best
    }

    /// Same walk as [`decide`](Self::decide), also reporting the winning rule.
    pub fn explain(&self, path: &[u32], kind: RuleKind) -> Explanation {
        let mut best = Explanation {
            decision: star_of(self.flags[0]),
            kind: None,
            node: 0,
            depth: 0,
        };
        if best.decision.is_set() {
            best.kind = Some(RuleKind::Star);
        }

        let mut node = 0u32;
        let mut consumed = true;
        for (depth, &segment) in path.iter().enumerate() {
            match self.child(node, segment) {
                Some(next) => {
                    node = next;
                    let star = star_of(self.flags[node as usize]);
                    if star.is_set() {
                        best = Explanation {
                            decision: star,
                            kind: Some(RuleKind::Star),
                            node,
                            depth: depth + 1,
                        };
                    }
                }
                None => {
                    consumed = false;
                    break;
                }
            }
        }

        if consumed && kind == RuleKind::Exact {
            let exact = exact_of(self.flags[node as usize]);
            if exact.is_set() {
                return Explanation {
                    decision: exact,
                    kind: Some(RuleKind::Exact),
                    node,
                    depth: path.len(),
                };
            }
        }
        best
    }
}
