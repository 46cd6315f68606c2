//! Expression similarity scoring: structure overlap through sector trees,
//! symbol overlap through split alignment.

use crate::index::codec::{PostingRecord, RecordSector};
use crate::subpath_set::{Element, SectorTree};
use crate::tex::symbol;
use crate::{DocumentId, ExprId, MAX_HIGHLIGHT_OCCURS};

/// Pure function of the query element: longer prefixes and wider sector
/// trees weigh more. The sum over a query's elements is the score upper
/// bound the merger prunes with.
pub fn element_weight(element: &Element) -> f32 {
    ((element.prefix_len - 1) * element.total_weight()) as f32
}

/// Aligns a query element's symbol splits against one posting record,
/// returning a score in [0, 1].
///
/// Sector trees pair by best split overlap: every (query, document) sector
/// pair passing the operator-hash filter is scored, and pairs are assigned
/// best-gain first, each sector used at most once, with root_id order as
/// the tie break. A positional pairing would miss commutatively reordered
/// operands, which land the same duplicates under differently-placed roots.
/// A mismatched ophash under an equal fingerprint is a hash collision
/// wearing a disguise and contributes nothing. Within a pair, each query
/// split claims at most one document split with the same leaf symbol,
/// gaining the smaller of the two weights; wildcard splits claim the
/// heaviest split left. Gains normalize by the larger of the two total
/// split weights, so adding a matched split never decreases the score.
pub fn alignment(query: &Element, record: &PostingRecord) -> f32 {
    let q_total = query.total_weight();
    let d_total = record.total_weight();
    if q_total == 0 || d_total == 0 {
        return 0.0;
    }

    let ophash = query.key.ophash();
    let mut pairs = Vec::new();
    for (qi, q_sector) in query.sectors.iter().enumerate() {
        for (di, d_sector) in record.sectors.iter().enumerate() {
            if d_sector.ophash != ophash {
                continue;
            }
            let gain = sector_gain(q_sector, d_sector);
            if gain > 0 {
                pairs.push((gain, qi, di));
            }
        }
    }
    pairs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut q_used = vec![false; query.sectors.len()];
    let mut d_used = vec![false; record.sectors.len()];
    let mut gains = 0u32;
    for (gain, qi, di) in pairs {
        if !q_used[qi] && !d_used[di] {
            q_used[qi] = true;
            d_used[di] = true;
            gains += gain;
        }
    }

    gains as f32 / q_total.max(d_total) as f32
}

/// Split-overlap gain of one sector pairing. Heavier query splits pick
/// first.
fn sector_gain(q_sector: &SectorTree, d_sector: &RecordSector) -> u32 {
    let mut used = vec![false; d_sector.splits.len()];
    let mut q_splits: Vec<_> = q_sector.splits.iter().collect();
    q_splits.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.symbol.cmp(&b.symbol)));

    let mut gain = 0u32;
    for q_split in q_splits {
        let candidate = d_sector
            .splits
            .iter()
            .enumerate()
            .filter(|(i, d_split)| {
                !used[*i]
                    && (q_split.symbol == symbol::WILDCARD || d_split.symbol == q_split.symbol)
            })
            .max_by_key(|(_, d_split)| d_split.weight.min(q_split.weight));

        if let Some((i, d_split)) = candidate {
            used[i] = true;
            gain += d_split.weight.min(q_split.weight) as u32;
        }
    }
    gain
}

/// Per-document aggregation: a document scores as its best-matching
/// expression, and the first few matching expression ids are retained for
/// snippet rendering.
#[derive(Debug, Clone, Default)]
pub struct MathScoreAcc {
    pub doc: DocumentId,
    pub score: f32,
    pub exp_ids: Vec<ExprId>,
}

impl MathScoreAcc {
    pub fn reset(&mut self, doc: DocumentId) {
        self.doc = doc;
        self.score = 0.0;
        self.exp_ids.clear();
    }

    pub fn push_expr(&mut self, exp: ExprId, score: f32) {
        if score <= 0.0 {
            return;
        }
        if score > self.score {
            self.score = score;
        }
        if self.exp_ids.len() < MAX_HIGHLIGHT_OCCURS {
            self.exp_ids.push(exp);
        }
    }
}
