//! Counters and invariant checks over a subtree.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::{LoadState, Node};
use crate::chunk::GeometryChunk;
use crate::render::RenderSystem;
use crate::resource::{NodeKey, ResourceId};

/// An inconsistency found by [`Node::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeIssue {
    /// Two nodes at the same depth resolve to the same resource.
    DuplicateResource {
        /// Depth at which the duplicate occurs.
        level: u32,
        /// The shared resource.
        resource: ResourceId,
    },
    /// A child's parent key does not match the node holding it.
    ParentMismatch {
        /// The child.
        node: NodeKey,
        /// Key of the node holding the child.
        expected: NodeKey,
        /// Key recorded in the child.
        found: Option<NodeKey>,
    },
    /// A child's level is not one more than its parent's.
    LevelMismatch {
        /// The child.
        node: NodeKey,
        /// Level expected from the parent.
        expected: u32,
        /// Level recorded in the child.
        found: u32,
    },
    /// An unloaded node still holds children or chunks.
    UnloadedWithContent {
        /// The node.
        node: NodeKey,
    },
    /// The load state disagrees with the number of chunks.
    StateMismatch {
        /// The node.
        node: NodeKey,
        /// Recorded state.
        state: LoadState,
        /// Number of chunks held.
        chunks: usize,
    },
}

impl fmt::Display for TreeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeIssue::DuplicateResource { level, resource } => {
                write!(f, "resource {resource} appears twice at level {level}")
            }
            TreeIssue::ParentMismatch {
                node,
                expected,
                found,
            } => match found {
                Some(found) => {
                    write!(f, "node {node} points at parent {found}, held by {expected}")
                }
                None => write!(f, "node {node} has no parent, held by {expected}"),
            },
            TreeIssue::LevelMismatch {
                node,
                expected,
                found,
            } => write!(f, "node {node} is at level {found}, expected {expected}"),
            TreeIssue::UnloadedWithContent { node } => {
                write!(f, "unloaded node {node} still holds content")
            }
            TreeIssue::StateMismatch {
                node,
                state,
                chunks,
            } => write!(f, "node {node} is {state:?} with {chunks} chunks"),
        }
    }
}

/// Counters over a subtree, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Nodes in the tree, loaded or not.
    pub total_nodes: usize,
    /// Loaded nodes.
    pub loaded_nodes: usize,
    /// Pinned nodes.
    pub pinned_nodes: usize,
    /// Geometry chunks.
    pub chunks: usize,
    /// Chunks with GPU resources.
    pub cached_chunks: usize,
    /// Vertex and index bytes.
    pub mesh_bytes: usize,
    /// Texture bytes.
    pub texture_bytes: usize,
    /// Depth of the loaded tree.
    pub depth: usize,
}

impl<R: RenderSystem> Node<R> {
    /// Number of loaded nodes in the subtree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        if !self.is_loaded() {
            return 0;
        }
        1 + self.children.iter().map(Node::node_count).sum::<usize>()
    }

    /// Vertex and index bytes held by the subtree.
    #[must_use]
    pub fn mesh_memory_size(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.mesh().geometry_size())
            .sum::<usize>()
            + self.children.iter().map(Node::mesh_memory_size).sum::<usize>()
    }

    /// Texture bytes held by the subtree, compressed and decoded.
    #[must_use]
    pub fn texture_memory_size(&self) -> usize {
        self.chunks
            .iter()
            .map(GeometryChunk::texture_memory_size)
            .sum::<usize>()
            + self
                .children
                .iter()
                .map(Node::texture_memory_size)
                .sum::<usize>()
    }

    /// Levels of loaded nodes below and including this one.
    #[must_use]
    pub fn depth(&self) -> usize {
        if !self.is_loaded() {
            return 0;
        }
        1 + self.children.iter().map(Node::depth).max().unwrap_or(0)
    }

    /// Resources that more than one node at the same level resolves to.
    #[must_use]
    pub fn find_duplicate_resources(&self) -> Vec<(u32, ResourceId)> {
        let mut seen: HashMap<u32, HashSet<&ResourceId>> = HashMap::new();
        let mut duplicates = Vec::new();
        self.collect_duplicates(&mut seen, &mut duplicates);
        duplicates
    }

    fn collect_duplicates<'n>(
        &'n self,
        seen: &mut HashMap<u32, HashSet<&'n ResourceId>>,
        duplicates: &mut Vec<(u32, ResourceId)>,
    ) {
        if let Some(resource) = &self.resource {
            if !seen.entry(self.level).or_default().insert(resource) {
                duplicates.push((self.level, resource.clone()));
            }
        }
        for child in &self.children {
            child.collect_duplicates(seen, duplicates);
        }
    }

    /// Check structural invariants, logging and returning every issue found.
    #[must_use]
    pub fn validate(&self) -> Vec<TreeIssue> {
        let mut issues: Vec<TreeIssue> = self
            .find_duplicate_resources()
            .into_iter()
            .map(|(level, resource)| TreeIssue::DuplicateResource { level, resource })
            .collect();
        self.validate_node(&mut issues);

        for issue in &issues {
            tracing::warn!("Tree inconsistency: {}", issue);
        }
        issues
    }

    fn validate_node(&self, issues: &mut Vec<TreeIssue>) {
        match self.state {
            LoadState::Unloaded if !self.children.is_empty() || !self.chunks.is_empty() => {
                issues.push(TreeIssue::UnloadedWithContent { node: self.key });
            }
            LoadState::LoadedEmpty if !self.chunks.is_empty() => {
                issues.push(self.state_mismatch());
            }
            LoadState::LoadedDisplayable if self.chunks.is_empty() => {
                issues.push(self.state_mismatch());
            }
            _ => {}
        }

        for child in &self.children {
            if child.parent != Some(self.key) {
                issues.push(TreeIssue::ParentMismatch {
                    node: child.key,
                    expected: self.key,
                    found: child.parent,
                });
            }
            if child.level != self.level + 1 {
                issues.push(TreeIssue::LevelMismatch {
                    node: child.key,
                    expected: self.level + 1,
                    found: child.level,
                });
            }
            child.validate_node(issues);
        }
    }

    fn state_mismatch(&self) -> TreeIssue {
        TreeIssue::StateMismatch {
            node: self.key,
            state: self.state,
            chunks: self.chunks.len(),
        }
    }

    /// Gather all counters in one walk.
    #[must_use]
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            depth: self.depth(),
            ..TreeStats::default()
        };
        self.accumulate(&mut stats);
        stats
    }

    fn accumulate(&self, stats: &mut TreeStats) {
        stats.total_nodes += 1;
        stats.loaded_nodes += usize::from(self.is_loaded());
        stats.pinned_nodes += usize::from(self.pinned);
        stats.chunks += self.chunks.len();
        for chunk in &self.chunks {
            stats.cached_chunks += usize::from(chunk.is_cached());
            stats.mesh_bytes += chunk.mesh().geometry_size();
            stats.texture_bytes += chunk.texture_memory_size();
        }
        for child in &self.children {
            child.accumulate(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DatasetShape, MockRender, cache_for, dataset, root_descriptor};

    type TestNode = Node<MockRender>;

    fn loaded_tree(shape: DatasetShape) -> TestNode {
        let reader = dataset(shape);
        let cache = cache_for(&reader);
        let mut root = TestNode::root(root_descriptor());
        root.load(&cache).unwrap();
        for child in &mut root.children {
            child.load(&cache).unwrap();
        }
        root
    }

    #[test]
    fn test_counters() {
        let root = loaded_tree(DatasetShape {
            grandchildren: true,
            ..DatasetShape::default()
        });

        assert_eq!(root.node_count(), 5);
        assert_eq!(root.depth(), 2);
        let stats = root.stats();
        assert_eq!(stats.total_nodes, 21);
        assert_eq!(stats.loaded_nodes, 5);
        assert_eq!(stats.chunks, 5);
        assert_eq!(stats.cached_chunks, 0);
        assert_eq!(stats.mesh_bytes, root.mesh_memory_size());
        assert_eq!(stats.texture_bytes, root.texture_memory_size());
        assert!(stats.texture_bytes > 0);
    }

    #[test]
    fn test_valid_tree_has_no_issues() {
        let root = loaded_tree(DatasetShape::default());
        assert!(root.find_duplicate_resources().is_empty());
        assert!(root.validate().is_empty());
    }

    #[test]
    fn test_detects_duplicate_resources() {
        let root = loaded_tree(DatasetShape {
            duplicate_child: true,
            ..DatasetShape::default()
        });
        let duplicates = root.find_duplicate_resources();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].0, 1);
        assert_eq!(duplicates[0].1.as_str(), "Data/child_0.tile");
    }

    #[test]
    fn test_detects_structural_issues() {
        let mut root = loaded_tree(DatasetShape::default());
        let root_key = root.key;
        root.children[1].parent = None;
        root.children[2].state = LoadState::Unloaded;
        root.children[3].level = 7;

        let issues = root.validate();
        assert!(issues.contains(&TreeIssue::ParentMismatch {
            node: root.children[1].key,
            expected: root_key,
            found: None,
        }));
        assert!(issues.contains(&TreeIssue::UnloadedWithContent {
            node: root.children[2].key,
        }));
        assert!(issues.contains(&TreeIssue::LevelMismatch {
            node: root.children[3].key,
            expected: 1,
            found: 7,
        }));
        assert_eq!(issues.len(), 3);
    }
}
