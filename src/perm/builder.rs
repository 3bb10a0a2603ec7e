//! Mutable construction-time trie.
//!
//! Rules are written into a conventional node/child-map tree and then
//! frozen into a [`Program`]. Used only on update paths.

use super::program::{EXACT_ALLOW, EXACT_DENY, Program, STAR_ALLOW, STAR_DENY, flag_for};
use super::{Effect, RuleKind};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Default)]
struct BuildNode {
    flags: u8,
    /// Segment id -> node index. Ordered so freezing is deterministic.
    children: BTreeMap<u32, u32>,
}

/// Mutable rule tree, frozen into a [`Program`].
#[derive(Debug, Clone)]
pub struct TrieBuilder {
    nodes: Vec<BuildNode>,
}

impl Default for TrieBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![BuildNode::default()],
        }
    }

    fn locate_or_create(&mut self, path: &[u32]) -> usize {
        let mut node = 0usize;
        for &segment in path {
            node = match self.nodes[node].children.get(&segment) {
                Some(&next) => next as usize,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(BuildNode::default());
                    self.nodes[node].children.insert(segment, next as u32);
                    next
                }
            };
        }
        node
    }

    /// Write a rule, clearing the opposite effect of the same kind.
    pub fn set(&mut self, kind: RuleKind, path: &[u32], effect: Effect) {
        let node = self.locate_or_create(path);
        let mask = match kind {
            RuleKind::Exact => EXACT_ALLOW | EXACT_DENY,
            RuleKind::Star => STAR_ALLOW | STAR_DENY,
        };
        let flags = &mut self.nodes[node].flags;
        *flags = (*flags & !mask) | flag_for(kind, effect);
    }

    pub fn set_exact(&mut self, path: &[u32], effect: Effect) {
        self.set(RuleKind::Exact, path, effect);
    }

    pub fn set_star(&mut self, prefix: &[u32], effect: Effect) {
        self.set(RuleKind::Star, prefix, effect);
    }

    /// Number of nodes currently in the tree, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[0].flags == 0
    }

    /// Serialize into a flat [`Program`].
    ///
    /// Breadth-first over children in segment order, dropping subtrees that
    /// carry no flags, so equal rule sets give equal layouts.
    pub fn freeze(&self) -> Program {
        // Breadth-first order over the whole tree.
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([0usize]);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            queue.extend(self.nodes[node].children.values().map(|&c| c as usize));
        }

        // Children come after parents in BFS order, so a reverse sweep sees
        // every child before its parent.
        let mut live = vec![false; self.nodes.len()];
        for &node in order.iter().rev() {
            let n = &self.nodes[node];
            live[node] = n.flags != 0 || n.children.values().any(|&c| live[c as usize]);
        }
        live[0] = true;

        let kept: Vec<usize> = order.into_iter().filter(|&n| live[n]).collect();
        let mut index = vec![u32::MAX; self.nodes.len()];
        for (dense, &node) in kept.iter().enumerate() {
            index[node] = dense as u32;
        }

        let mut program = Program {
            flags: Vec::with_capacity(kept.len()),
            child_start: Vec::with_capacity(kept.len()),
            child_count: Vec::with_capacity(kept.len()),
            child_segment: Vec::with_capacity(kept.len().saturating_sub(1)),
            child_node: Vec::with_capacity(kept.len().saturating_sub(1)),
        };
        for &node in &kept {
            let n = &self.nodes[node];
            program.flags.push(n.flags);
            program.child_start.push(program.child_segment.len() as u32);
            let mut count = 0u32;
            for (&segment, &child) in &n.children {
                if live[child as usize] {
                    program.child_segment.push(segment);
                    program.child_node.push(index[child as usize]);
                    count += 1;
                }
            }
            program.child_count.push(count);
        }
        program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::Decision;

    #[test]
    fn test_set_clears_opposite() {
        let mut b = TrieBuilder::new();
        b.set_exact(&[1], Effect::Allow);
        b.set_exact(&[1], Effect::Deny);
        b.set_star(&[1], Effect::Allow);
        let p = b.freeze();
        assert_eq!(p.flags[1], EXACT_DENY | STAR_ALLOW);
    }

    #[test]
    fn test_freeze_is_insertion_order_independent() {
        let mut a = TrieBuilder::new();
        a.set_exact(&[3, 1], Effect::Allow);
        a.set_star(&[2], Effect::Deny);
        a.set_exact(&[1], Effect::Deny);

        let mut b = TrieBuilder::new();
        b.set_exact(&[1], Effect::Deny);
        b.set_star(&[2], Effect::Deny);
        b.set_exact(&[3, 1], Effect::Allow);

        assert_eq!(a.freeze(), b.freeze());
    }

    #[test]
    fn test_children_sorted_by_segment() {
        let mut b = TrieBuilder::new();
        for seg in [9, 2, 5] {
            b.set_exact(&[seg], Effect::Allow);
        }
        let p = b.freeze();
        assert_eq!(p.child_segment, vec![2, 5, 9]);
        assert_eq!(p.child_count[0], 3);
        assert_eq!(p.decide(&[5]), Decision::Allow);
        assert_eq!(p.decide(&[4]), Decision::Unset);
    }

    #[test]
    fn test_deep_path_freezes_without_recursion() {
        let mut b = TrieBuilder::new();
        let path: Vec<u32> = (1..=10_000).collect();
        b.set_exact(&path, Effect::Allow);
        let p = b.freeze();
        assert_eq!(p.node_count(), 10_001);
        assert_eq!(p.decide(&path), Decision::Allow);
    }

    #[test]
    fn test_root_star() {
        let mut b = TrieBuilder::new();
        b.set_star(&[], Effect::Allow);
        let p = b.freeze();
        assert_eq!(p.node_count(), 1);
        assert_eq!(p.decide(&[42]), Decision::Allow);
    }
}
