//! Math query preparation: from query TeX to a bundle of weighted posting
//! iterators ready for the merger.

use serde::{Deserialize, Serialize};

use crate::index::{MathEntryReader, MathIndex};
use crate::subpath::extract;
use crate::subpath_set::{self, Element};
use crate::{score, tex, Error, Result, MAX_MERGE_POSTINGS};

/// Order in which a query's elements are opened. Depth-first favors the
/// longest prefixes, breadth-first the shortest; kept for wire
/// compatibility with clients that tune it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DirMergePolicy {
    #[default]
    Dfs,
    Bfs,
}

/// One query element with its precomputed weight.
#[derive(Debug, Clone)]
pub struct QueryElement {
    pub element: Element,
    pub weight: f32,
}

impl QueryElement {
    /// The largest score this element's iterator can contribute. The
    /// dictionary's `u_max` (heaviest record in the list) tightens the
    /// alignment ceiling below 1 when every indexed record is lighter than
    /// the query element.
    pub fn upper_bound(&self, u_max: u16) -> f32 {
        let q_total = self.element.total_weight();
        if q_total == 0 {
            return 0.0;
        }
        self.weight * (u_max as f32 / q_total as f32).min(1.0)
    }
}

pub struct PreparedMathQuery {
    /// Elements found in the index, each with its open posting reader.
    pub entries: Vec<(QueryElement, MathEntryReader)>,
    /// Self-similarity constant: the sum of all element weights, including
    /// elements absent from this index.
    pub self_similarity: f32,
}

/// Parses the query TeX, derives its element set and opens the matching
/// posting lists. Parser and overflow errors propagate; an expression with
/// no indexable element is an empty query.
pub fn prepare(
    index: &MathIndex,
    tex_source: &str,
    policy: DirMergePolicy,
) -> Result<PreparedMathQuery> {
    let tree = tex::parse(tex_source)?;
    let subpaths = extract(&tree)?;
    let set = subpath_set::build(&subpaths);
    if set.elements.is_empty() {
        return Err(Error::EmptyQuery);
    }

    let mut elements = set.elements;
    match policy {
        DirMergePolicy::Dfs => elements.sort_by(|a, b| b.prefix_len.cmp(&a.prefix_len)),
        DirMergePolicy::Bfs => elements.sort_by(|a, b| a.prefix_len.cmp(&b.prefix_len)),
    }
    if elements.len() > MAX_MERGE_POSTINGS {
        return Err(Error::TooManyElements { n: elements.len() });
    }

    let mut entries = Vec::new();
    let mut self_similarity = 0.0;
    for element in elements {
        let weight = score::element_weight(&element);
        self_similarity += weight;
        // an absent fingerprint is an empty iterator, not an error
        if let Some(entry) = index.lookup(&element.key) {
            entries.push((QueryElement { element, weight }, entry));
        }
    }

    Ok(PreparedMathQuery { entries, self_similarity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MathIndexWriter;
    use crate::subpath::Subpaths;

    fn subpaths_of(tex_src: &str) -> Subpaths {
        extract(&tex::parse(tex_src).unwrap()).unwrap()
    }

    fn small_index(dir: &std::path::Path) -> MathIndex {
        let mut writer = MathIndexWriter::create(dir).unwrap();
        writer.add(1, 0, &subpaths_of("a+b")).unwrap();
        writer.add(2, 0, &subpaths_of("\\frac{x}{y}+b")).unwrap();
        writer.seal(5).unwrap();
        MathIndex::open(dir).unwrap()
    }

    #[test]
    fn prepare_opens_matching_lists_with_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index(dir.path());

        let prepared = prepare(&index, "a+b", DirMergePolicy::Dfs).unwrap();
        assert_eq!(prepared.entries.len(), 1);
        let (element, entry) = &prepared.entries[0];
        assert_eq!(prepared.self_similarity, element.weight);
        assert!(element.upper_bound(entry.u_max) <= element.weight);
        assert!(element.upper_bound(entry.u_max) > 0.0);
    }

    #[test]
    fn dfs_opens_deepest_elements_first() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index(dir.path());

        let dfs = prepare(&index, "\\frac{x}{y}+b", DirMergePolicy::Dfs).unwrap();
        let lens: Vec<u32> = dfs.entries.iter().map(|(e, _)| e.element.prefix_len).collect();
        let mut sorted = lens.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(lens, sorted);

        let bfs = prepare(&index, "\\frac{x}{y}+b", DirMergePolicy::Bfs).unwrap();
        let lens: Vec<u32> = bfs.entries.iter().map(|(e, _)| e.element.prefix_len).collect();
        let mut sorted = lens.clone();
        sorted.sort();
        assert_eq!(lens, sorted);
    }

    #[test]
    fn query_with_only_residual_paths_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index(dir.path());
        // a single variable has one path of length one: below every prefix
        assert!(matches!(prepare(&index, "x", DirMergePolicy::Dfs), Err(Error::EmptyQuery)));
    }

    #[test]
    fn parse_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let index = small_index(dir.path());
        assert!(matches!(prepare(&index, "a+!", DirMergePolicy::Dfs), Err(Error::Parse(_))));
    }
}
