//! Leaf-to-root path extraction over a parsed expression tree. Every leaf
//! yields one path, and every internal operator node yields one
//! structure-generic path whose leaf slot is the operator itself, so
//! expressions can also match on shape alone.

use smallvec::SmallVec;

use crate::tex::{symbol, token, ExprNode, ExprTree};
use crate::{Error, NodeId, Result, SymbolId, TokenId, MAX_MATH_PATHS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubpathKind {
    Normal,
    GenericNode,
    Wildcard,
}

impl SubpathKind {
    /// The leaf node is a wildcard slot for every kind but `Normal`.
    pub fn skips_leaf(&self) -> bool {
        !matches!(self, SubpathKind::Normal)
    }

    pub(crate) fn class(&self) -> u8 {
        match self {
            SubpathKind::Normal => 0,
            SubpathKind::GenericNode => 1,
            SubpathKind::Wildcard => 2,
        }
    }

    pub(crate) fn from_class(class: u8) -> SubpathKind {
        match class {
            1 => SubpathKind::GenericNode,
            2 => SubpathKind::Wildcard,
            _ => SubpathKind::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNode {
    pub token: TokenId,
    pub node: NodeId,
}

#[derive(Debug, Clone)]
pub struct Subpath {
    pub kind: SubpathKind,
    /// Leaf first, expression root last.
    pub nodes: SmallVec<[PathNode; 8]>,
    /// 1-based and dense within one expression, so `path_id - 1` is a bit
    /// position in a leaves bitmask.
    pub path_id: u32,
    pub leaf_symbol: SymbolId,
}

impl Subpath {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_bit(&self) -> u64 {
        1 << (self.path_id - 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Subpaths {
    pub paths: Vec<Subpath>,
}

/// Walks the tree in left-to-right preorder, emitting one subpath per leaf
/// and one GENERIC-NODE subpath per internal operator node (rank sentinels
/// carry no structure of their own and are skipped). Preorder makes path
/// ids reproducible for identical expressions; all path ids of one
/// expression must fit a 64-bit bitmask.
pub fn extract(tree: &ExprTree) -> Result<Subpaths> {
    let n_paths = count_paths(&tree.root);
    if n_paths > MAX_MATH_PATHS {
        return Err(Error::Overflow { n_paths });
    }

    let mut paths = Vec::with_capacity(n_paths);
    let mut next_node: NodeId = 0;
    let mut ancestors: Vec<PathNode> = Vec::new();
    walk(&tree.root, &mut next_node, &mut ancestors, &mut paths);

    Ok(Subpaths { paths })
}

fn count_paths(node: &ExprNode) -> usize {
    if node.is_leaf() {
        1
    } else {
        usize::from(!token::is_rank(node.token))
            + node.children.iter().map(count_paths).sum::<usize>()
    }
}

fn walk(
    node: &ExprNode,
    next_node: &mut NodeId,
    ancestors: &mut Vec<PathNode>,
    paths: &mut Vec<Subpath>,
) {
    let id = *next_node;
    *next_node = next_node.wrapping_add(1);

    if node.is_leaf() {
        let kind = if node.token == token::QVAR {
            SubpathKind::Wildcard
        } else {
            SubpathKind::Normal
        };
        push_path(paths, kind, node, id, node.symbol, ancestors);
        return;
    }

    if !token::is_rank(node.token) {
        // the operator node fills its own leaf slot, which comparisons and
        // lookups ignore for this kind
        push_path(paths, SubpathKind::GenericNode, node, id, symbol::WILDCARD, ancestors);
    }

    ancestors.push(PathNode { token: node.token, node: id });
    for child in &node.children {
        walk(child, next_node, ancestors, paths);
    }
    ancestors.pop();
}

fn push_path(
    paths: &mut Vec<Subpath>,
    kind: SubpathKind,
    node: &ExprNode,
    id: NodeId,
    leaf_symbol: SymbolId,
    ancestors: &[PathNode],
) {
    let mut nodes = SmallVec::with_capacity(ancestors.len() + 1);
    nodes.push(PathNode { token: node.token, node: id });
    nodes.extend(ancestors.iter().rev().copied());
    paths.push(Subpath { kind, nodes, path_id: paths.len() as u32 + 1, leaf_symbol });
}
