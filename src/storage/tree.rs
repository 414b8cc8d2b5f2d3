//! In-memory fork tree of unfinalized blocks
//!
//! Nodes live in an arena keyed by block id. Each node owns the ids of its
//! children; the parent id is a plain back-reference used for upward walks.
//! The root is the oldest unfinalized block and the only node without a
//! parent.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;

use thiserror::Error;

use crate::consensus::{balance_over, Block};
use crate::crypto::{Hash, PublicKey};
use crate::validation::Transaction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("block {0} is already in the tree")]
    AlreadyPresent(Hash),
    #[error("parent {0} is not in the tree")]
    ParentNotFound(Hash),
    #[error("block {0} has no parent id")]
    MissingParent(Hash),
    #[error("block {0} is not in the tree")]
    NotFound(Hash),
    #[error("block {0} is not the root")]
    NotARoot(Hash),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    block: Block,
    parent: Option<Hash>,
    children: Vec<Hash>,
}

impl TreeNode {
    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn parent(&self) -> Option<&Hash> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[Hash] {
        &self.children
    }
}

/// Outcome of [`ChainTree::chop`]
#[derive(Debug, Clone)]
pub struct ChopResult {
    /// Root after chopping
    pub root: Hash,
    /// Vacated blocks in root-to-tip order, ready to be finalized
    pub stem: Vec<Block>,
    /// Losing branches, each detached as a standalone subtree
    pub orphaned: Vec<ChainTree>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTree {
    root: Hash,
    nodes: HashMap<Hash, TreeNode>,
}

/// Fork choice: greatest height, then greatest cumulative difficulty,
/// then the smallest block id.
fn fork_choice_key(block: &Block) -> (u64, u64, Reverse<Hash>) {
    (block.height, block.cumulative_difficulty, Reverse(block.id))
}

impl ChainTree {
    /// A tree holding only `root`
    pub fn new(root: Block) -> Self {
        let id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(
            id,
            TreeNode {
                block: root,
                parent: None,
                children: Vec::new(),
            },
        );
        Self { root: id, nodes }
    }

    pub fn root(&self) -> &Block {
        &self.nodes[&self.root].block
    }

    pub fn root_id(&self) -> Hash {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &Hash) -> Option<&Block> {
        self.nodes.get(id).map(|node| &node.block)
    }

    pub fn node(&self, id: &Hash) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn children_of(&self, id: &Hash) -> Vec<&Block> {
        self.nodes
            .get(id)
            .map(|node| node.children.iter().map(|child| &self.nodes[child].block).collect())
            .unwrap_or_default()
    }

    /// Append `block` as a new leaf under its parent.
    ///
    /// # Panics
    /// If the parent's height or id disagree with the block. Callers
    /// validate linkage before inserting, so this indicates a bug.
    pub fn insert(&mut self, block: Block) -> Result<(), TreeError> {
        if self.nodes.contains_key(&block.id) {
            return Err(TreeError::AlreadyPresent(block.id));
        }
        let parent_id = block.parent_id.ok_or(TreeError::MissingParent(block.id))?;
        let parent = self
            .nodes
            .get_mut(&parent_id)
            .ok_or(TreeError::ParentNotFound(parent_id))?;

        assert_eq!(
            parent.block.height + 1,
            block.height,
            "tree insert: height of {} does not follow its parent",
            block.id
        );
        assert_eq!(parent.block.id, parent_id, "tree insert: parent id mismatch");

        parent.children.push(block.id);
        self.nodes.insert(
            block.id,
            TreeNode {
                block,
                parent: Some(parent_id),
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// All blocks in breadth-first order from the root
    pub fn blocks(&self) -> Vec<&Block> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[&id];
            out.push(&node.block);
            queue.extend(node.children.iter().copied());
        }
        out
    }

    /// Leaf chosen by the fork-choice rule. Only leaves compete since a
    /// descendant always outranks its ancestor on height.
    pub fn find_longest_chain_endpoint(&self) -> &Block {
        let mut best = self.root();
        let mut queue = VecDeque::from([self.root]);

        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[&id];
            if node.children.is_empty() {
                if fork_choice_key(&node.block) > fork_choice_key(best) {
                    best = &node.block;
                }
            } else {
                queue.extend(node.children.iter().copied());
            }
        }

        best
    }

    /// Path from the root to the fork-choice endpoint
    pub fn longest_chain(&self) -> Vec<&Block> {
        let endpoint = self.find_longest_chain_endpoint().id;
        self.path_to(&endpoint).unwrap_or_default()
    }

    /// Number of blocks ahead of the root on the longest chain
    pub fn longest_chain_length(&self) -> u64 {
        self.find_longest_chain_endpoint().height - self.root().height
    }

    /// Path from the root to `target_id`, inclusive on both ends
    pub fn get_chain(&self, target_id: &Hash) -> Result<Vec<&Block>, TreeError> {
        self.path_to(target_id).ok_or(TreeError::NotFound(*target_id))
    }

    fn path_to(&self, target_id: &Hash) -> Option<Vec<&Block>> {
        let mut path = Vec::new();
        let mut cursor = Some(*target_id);
        while let Some(id) = cursor {
            let node = self.nodes.get(&id)?;
            path.push(&node.block);
            cursor = node.parent;
        }
        path.reverse();
        Some(path)
    }

    /// Balance change of `account` over the path from `from_id` to `to_id`.
    /// `from_id` must be an ancestor of (or equal to) `to_id`.
    pub fn stake_between(
        &self,
        account: &PublicKey,
        from_id: &Hash,
        from_inclusive: bool,
        to_id: &Hash,
        to_inclusive: bool,
    ) -> Result<i128, TreeError> {
        let path = self.get_chain(to_id)?;
        let start = path
            .iter()
            .position(|block| block.id == *from_id)
            .ok_or(TreeError::NotFound(*from_id))?;

        let begin = if from_inclusive { start } else { start + 1 };
        let end = if to_inclusive { path.len() } else { path.len() - 1 };
        if begin >= end {
            return Ok(0);
        }

        Ok(balance_over(path[begin..end].iter().copied(), account))
    }

    /// Chop from the root. See [`ChainTree::chop_at`].
    pub fn chop(&mut self, max_length: u64) -> Result<ChopResult, TreeError> {
        let root = self.root;
        self.chop_at(&root, max_length)
    }

    /// Advance the root along the longest chain until at most `max_length`
    /// blocks remain ahead of it. Every vacated block lands in the stem;
    /// every branch leaving a vacated block off the longest chain is
    /// detached into `orphaned`.
    pub fn chop_at(&mut self, node: &Hash, max_length: u64) -> Result<ChopResult, TreeError> {
        let target = self.nodes.get(node).ok_or(TreeError::NotFound(*node))?;
        if target.parent.is_some() {
            return Err(TreeError::NotARoot(*node));
        }

        let longest: Vec<Hash> = self.longest_chain().iter().map(|block| block.id).collect();
        let excess = (longest.len() as u64 - 1).saturating_sub(max_length) as usize;

        let mut stem = Vec::with_capacity(excess);
        let mut orphaned = Vec::new();

        for step in 0..excess {
            let current = longest[step];
            let next = longest[step + 1];
            let vacated = self.nodes.remove(&current).ok_or(TreeError::NotFound(current))?;

            for child in vacated.children.iter().filter(|child| **child != next) {
                orphaned.push(self.detach(*child));
            }
            stem.push(vacated.block);
        }

        self.root = longest[excess];
        if let Some(root) = self.nodes.get_mut(&self.root) {
            root.parent = None;
        }

        Ok(ChopResult {
            root: self.root,
            stem,
            orphaned,
        })
    }

    /// Remove the subtree under `id` and return it as its own tree
    fn detach(&mut self, id: Hash) -> ChainTree {
        let mut nodes = HashMap::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.remove(&current) {
                queue.extend(node.children.iter().copied());
                nodes.insert(current, node);
            }
        }
        if let Some(root) = nodes.get_mut(&id) {
            root.parent = None;
        }
        ChainTree { root: id, nodes }
    }

    pub fn transaction(&self, id: &Hash) -> Option<&Transaction> {
        self.nodes.values().find_map(|node| node.block.transaction(id))
    }

    pub fn contains_transaction(&self, id: &Hash) -> bool {
        self.transaction(id).is_some()
    }

    /// Indented outline of the tree, one block per line
    pub fn render(&self) -> String {
        let endpoint = self.find_longest_chain_endpoint().id;
        let mut out = String::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[&id];
            let marker = if id == endpoint { " *" } else { "" };
            let _ = writeln!(
                out,
                "{:indent$}{} h={} cd={}{}",
                "",
                id.short(),
                node.block.height,
                node.block.cumulative_difficulty,
                marker,
                indent = depth * 2
            );
            for child in node.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        out
    }
}
