//! Groups the subpaths of one expression into the index key units: elements
//! of a common prefix, their sector trees and symbol splits.

use std::hash::Hasher;

use fxhash::FxHasher64;

use crate::subpath::{Subpath, SubpathKind, Subpaths};
use crate::tex::token;
use crate::{fold16, NodeId, SymbolId, TokenId, MAX_MATH_PATHS};

/// Outcome of walking two subpaths in parallel over a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Equal,
    OtherShorter,
    OtherLonger,
    TokenMismatch,
    KindMismatch,
}

fn cmp_subpaths(a: &Subpath, b: &Subpath, prefix_len: u32) -> Cmp {
    if a.kind != b.kind {
        return Cmp::KindMismatch;
    }

    // the leaf node is a wildcard slot for these kinds
    let mut skip_first = a.kind.skips_leaf();
    let mut compared = 0;
    let mut a_nodes = a.nodes.iter();
    let mut b_nodes = b.nodes.iter();

    loop {
        let (an, bn) = match (a_nodes.next(), b_nodes.next()) {
            (Some(an), Some(bn)) => (an, bn),
            (Some(_), None) => return Cmp::OtherShorter,
            (None, Some(_)) => return Cmp::OtherLonger,
            (None, None) => return Cmp::Equal,
        };

        if an.token != bn.token && !skip_first {
            return Cmp::TokenMismatch;
        }
        skip_first = false;

        compared += 1;
        if compared == prefix_len {
            return Cmp::Equal;
        }
    }
}

/// The compared token sequence of a prefix: the index key before hashing.
/// For wildcard-slot kinds the leaf token is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixKey {
    pub kind: SubpathKind,
    pub tokens: Vec<TokenId>,
}

impl PrefixKey {
    pub fn of(subpath: &Subpath, prefix_len: u32) -> PrefixKey {
        let start = if subpath.kind.skips_leaf() { 1 } else { 0 };
        let tokens =
            subpath.nodes[start..prefix_len as usize].iter().map(|n| n.token).collect();
        PrefixKey { kind: subpath.kind, tokens }
    }

    /// Stable hash used as the inverted-index key. Collisions are possible;
    /// readers verify against the stored token sequence.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher64::default();
        hasher.write_u8(self.kind.class());
        for token in &self.tokens {
            hasher.write_u16(*token);
        }
        hasher.finish()
    }

    /// 16-bit fingerprint of the prefix's internal structure, shared between
    /// the indexer and the query side as a coarse structural-type filter.
    pub fn ophash(&self) -> u16 {
        let mut hasher = FxHasher64::default();
        for token in &self.tokens {
            hasher.write_u16(*token);
        }
        fold16(hasher.finish())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSplit {
    pub symbol: SymbolId,
    pub weight: u16,
    /// bit (path_id - 1) set for every duplicate with this leaf symbol
    pub leaves: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorTree {
    pub root_id: NodeId,
    pub width: u16,
    pub ophash: u16,
    pub splits: Vec<SymbolSplit>,
}

impl SectorTree {
    pub fn total_weight(&self) -> u32 {
        self.splits.iter().map(|s| s.weight as u32).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub prefix_len: u32,
    /// Duplicates beyond the canonical representative. Keeps counting when
    /// the retained list is full (wildcard paths can blow up combinatorially).
    pub dup_cnt: u32,
    /// Indices into the expression's subpaths; `dups[0]` is canonical.
    pub dups: Vec<usize>,
    /// Per retained duplicate, the prefix root (node id, token).
    pub roots: Vec<(NodeId, TokenId)>,
    pub key: PrefixKey,
    pub sectors: Vec<SectorTree>,
}

impl Element {
    fn new(prefix_len: u32, key: PrefixKey) -> Element {
        Element { prefix_len, dup_cnt: 0, dups: Vec::new(), roots: Vec::new(), key, sectors: Vec::new() }
    }

    fn add_dup(&mut self, idx: usize, subpath: &Subpath) {
        if self.dups.len() < MAX_MATH_PATHS {
            let root = subpath.nodes[self.prefix_len as usize - 1];
            self.dups.push(idx);
            self.roots.push((root.node, root.token));
        }
    }

    fn root_token(&self) -> TokenId {
        self.roots[0].1
    }

    pub fn fingerprint(&self) -> u64 {
        self.key.fingerprint()
    }

    pub fn total_weight(&self) -> u32 {
        self.sectors.iter().map(|s| s.total_weight()).sum()
    }

    fn derive_sectors(&mut self, subpaths: &Subpaths) {
        let ophash = self.key.ophash();
        let mut sectors: Vec<SectorTree> = Vec::new();

        for (&dup_idx, &(root_id, _)) in self.dups.iter().zip(&self.roots) {
            let subpath = &subpaths.paths[dup_idx];
            let sector_idx = match sectors.iter().position(|s| s.root_id == root_id) {
                Some(i) => i,
                None => {
                    sectors.push(SectorTree { root_id, width: 0, ophash, splits: Vec::new() });
                    sectors.len() - 1
                }
            };
            let sector = &mut sectors[sector_idx];

            sector.width += 1;
            match sector.splits.iter().position(|s| s.symbol == subpath.leaf_symbol) {
                Some(i) => {
                    sector.splits[i].weight += 1;
                    sector.splits[i].leaves |= subpath.leaf_bit();
                }
                None => sector.splits.push(SymbolSplit {
                    symbol: subpath.leaf_symbol,
                    weight: 1,
                    leaves: subpath.leaf_bit(),
                }),
            }
        }

        sectors.sort_by_key(|s| s.root_id);
        for sector in &mut sectors {
            sector.splits.sort_by_key(|s| s.symbol);
        }
        self.sectors = sectors;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubpathSet {
    pub elements: Vec<Element>,
}

/// Partitions an expression's subpaths by (prefix length, prefix-equality
/// class). Passes run at prefix length 2, 3, ... until a whole pass groups
/// nothing; paths shorter than the pass length are a residual and index
/// nowhere.
pub fn build(subpaths: &Subpaths) -> SubpathSet {
    let mut elements: Vec<Element> = Vec::new();
    let mut prefix_len = 2u32;

    loop {
        let mut added = 0usize;

        for (idx, subpath) in subpaths.paths.iter().enumerate() {
            if (subpath.len() as u32) < prefix_len {
                continue;
            }

            let matched = elements.iter().position(|e| {
                e.prefix_len == prefix_len
                    && cmp_subpaths(subpath, &subpaths.paths[e.dups[0]], prefix_len) == Cmp::Equal
            });

            match matched {
                Some(i) => {
                    elements[i].dup_cnt += 1;
                    elements[i].add_dup(idx, subpath);
                }
                None => {
                    let mut element = Element::new(prefix_len, PrefixKey::of(subpath, prefix_len));
                    element.add_dup(idx, subpath);
                    elements.push(element);
                }
            }
            added += 1;
        }

        if added == 0 {
            break;
        }
        prefix_len += 1;
    }

    // rank-rooted elements are structural sentinels carrying no retrieval value
    elements.retain(|e| !token::is_rank(e.root_token()));

    for element in &mut elements {
        element.derive_sectors(subpaths);
    }

    SubpathSet { elements }
}
