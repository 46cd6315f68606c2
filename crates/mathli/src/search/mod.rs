//! The mixed keyword+formula search driver: resolves a query into weighted
//! posting cursors, drives the MaxScore merge and aggregates per-document
//! scores into a top-k.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::index::posting::PostingReader;
use crate::indices::Indices;
use crate::lex::{Lexer, Slice};
use crate::merge::{MaxScoreMerger, PostingCursor};
use crate::query::{self, DirMergePolicy, QueryElement};
use crate::score::{self, MathScoreAcc};
use crate::term::{self, TermCursor};
use crate::{
    key_doc, key_exp, pack_key, DocumentId, Error, ExprId, Result, TimeBudget, EXHAUSTED_KEY,
    MAX_MERGE_POSTINGS, MAX_QUERY_MATH_KW, MAX_QUERY_TERM_KW,
};

/// The language-neutral query the daemon wrapper accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub tex_source: String,
    #[serde(default)]
    pub dir_merge_depth_policy: DirMergePolicy,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// 0 means no deadline.
    #[serde(default)]
    pub deadline_ms: u64,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub doc: DocumentId,
    pub score: f32,
    pub exp_ids: Vec<ExprId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    pub n_candidates: u64,
    pub n_pruned: u64,
    /// The deadline expired and the hits are a partial top-k.
    pub degraded: bool,
    pub iter_errors: u32,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
    pub stats: SearchStats,
}

pub struct Search<'a> {
    indices: &'a Indices,
    query: &'a str,
    top_k: usize,
    time_budget: TimeBudget,
    dir_merge_policy: DirMergePolicy,
}

impl<'a> Search<'a> {
    pub fn new(indices: &'a Indices) -> Search<'a> {
        Search {
            indices,
            query: "",
            top_k: default_top_k(),
            time_budget: TimeBudget::max(),
            dir_merge_policy: DirMergePolicy::default(),
        }
    }

    pub fn from_request(indices: &'a Indices, request: &'a SearchRequest) -> Search<'a> {
        let mut search = Search::new(indices);
        search.query(&request.tex_source);
        search.top_k(request.top_k);
        search.dir_merge_policy(request.dir_merge_depth_policy);
        if request.deadline_ms > 0 {
            search.time_budget(TimeBudget::new(Duration::from_millis(request.deadline_ms)));
        }
        search
    }

    pub fn query(&mut self, query: &'a str) -> &mut Search<'a> {
        self.query = query;
        self
    }

    pub fn top_k(&mut self, top_k: usize) -> &mut Search<'a> {
        self.top_k = top_k;
        self
    }

    pub fn time_budget(&mut self, time_budget: TimeBudget) -> &mut Search<'a> {
        self.time_budget = time_budget;
        self
    }

    pub fn dir_merge_policy(&mut self, policy: DirMergePolicy) -> &mut Search<'a> {
        self.dir_merge_policy = policy;
        self
    }

    pub fn execute(&self) -> Result<SearchResult> {
        let mut term_kws = Vec::new();
        let mut math_kws = Vec::new();
        for slice in Lexer::new(self.query) {
            match slice {
                Slice::Word(word) => term_kws.push(word),
                Slice::Math(tex_src) => math_kws.push(tex_src),
            }
        }
        if term_kws.len() > MAX_QUERY_TERM_KW {
            return Err(Error::TooManyTermKeywords { n: term_kws.len() });
        }
        if math_kws.len() > MAX_QUERY_MATH_KW {
            return Err(Error::TooManyMathKeywords { n: math_kws.len() });
        }
        if term_kws.is_empty() && math_kws.is_empty() {
            return Err(Error::EmptyQuery);
        }

        let mut cursors = Vec::new();
        let mut upps = Vec::new();
        for word in &term_kws {
            // unknown terms contribute nothing
            if let Some((cursor, idf)) = self.indices.term().lookup(word) {
                upps.push(term::bm25_upper_bound(idf));
                cursors.push(QueryCursor::Term { cursor, idf });
            }
        }
        for tex_src in &math_kws {
            let prepared = query::prepare(self.indices.math(), tex_src, self.dir_merge_policy)?;
            for (element, entry) in prepared.entries {
                upps.push(element.upper_bound(entry.u_max));
                cursors.push(QueryCursor::Math { reader: entry.reader, element });
            }
        }
        if cursors.len() > MAX_MERGE_POSTINGS {
            return Err(Error::TooManyElements { n: cursors.len() });
        }

        let total_records: u64 = cursors.iter().map(|c| c.n_records()).sum();
        let mut merger = MaxScoreMerger::new(cursors, upps);
        let mut topk = TopK::new(self.top_k);
        let mut acc = MathScoreAcc::default();
        let mut stats = SearchStats::default();

        let avg_doc_len = self.indices.term().avg_doc_len();

        while merger.min_key() != EXHAUSTED_KEY {
            if self.time_budget.exceeded() {
                stats.degraded = true;
                break;
            }

            let doc = key_doc(merger.min_key());
            stats.n_candidates += 1;

            // pull every iterator (lagging non-essential ones included) into
            // this document's key range before scoring it
            let doc_start = pack_key(doc, 0);
            for i in 0..merger.size() {
                merger.cursor_mut(i).advance_to(doc_start);
            }

            let text_score = self.text_score(&merger, doc, avg_doc_len);
            self.math_score(&mut merger, doc, &mut acc);

            // step term cursors past this document
            for i in 0..merger.size() {
                let at_doc = matches!(
                    merger.cursor(i),
                    QueryCursor::Term { cursor, .. } if key_doc(cursor.cur()) == doc
                );
                if at_doc {
                    merger.cursor_mut(i).next();
                }
            }

            let doc_score = text_score + acc.score;
            if doc_score > topk.threshold() {
                topk.offer(doc, doc_score, acc.exp_ids.clone());
                merger.lift_up_pivot(topk.threshold(), |bound| bound);
            }

            merger.resync();
        }

        stats.iter_errors = merger.all_cursors().iter().filter(|c| c.failed()).count() as u32;
        let visited: u64 = merger.all_cursors().iter().map(|c| c.visited()).sum();
        stats.n_pruned = total_records.saturating_sub(visited);

        Ok(SearchResult { hits: topk.into_hits(), stats })
    }

    fn text_score(&self, merger: &MaxScoreMerger<QueryCursor>, doc: DocumentId, avg: f32) -> f32 {
        let doc_len = self.indices.term().doc_len(doc);
        let mut score = 0.0;
        for i in 0..merger.size() {
            if let QueryCursor::Term { cursor, idf } = merger.cursor(i) {
                if key_doc(cursor.cur()) == doc {
                    if let Some(tf) = cursor.tf() {
                        score += term::bm25(*idf, tf, doc_len, avg);
                    }
                }
            }
        }
        score
    }

    /// Sub-merges the math cursors over this document's expressions: each
    /// expression key is scored across the elements aligned at it, and the
    /// document keeps its best expression.
    fn math_score(&self, merger: &mut MaxScoreMerger<QueryCursor>, doc: DocumentId, acc: &mut MathScoreAcc) {
        acc.reset(doc);

        loop {
            let mut exp_key = EXHAUSTED_KEY;
            for i in 0..merger.size() {
                if let QueryCursor::Math { reader, .. } = merger.cursor(i) {
                    let cur = reader.cur();
                    if cur != EXHAUSTED_KEY && key_doc(cur) == doc && cur < exp_key {
                        exp_key = cur;
                    }
                }
            }
            if exp_key == EXHAUSTED_KEY {
                break;
            }

            let mut similarity = 0.0;
            for i in 0..merger.size() {
                if let QueryCursor::Math { reader, element } = merger.cursor(i) {
                    if reader.cur() == exp_key {
                        if let Some(record) = reader.record() {
                            similarity += element.weight * score::alignment(&element.element, record);
                        }
                    }
                }
            }
            acc.push_expr(key_exp(exp_key), similarity);

            for i in 0..merger.size() {
                let at_key = matches!(
                    merger.cursor(i),
                    QueryCursor::Math { reader, .. } if reader.cur() == exp_key
                );
                if at_key {
                    merger.cursor_mut(i).next();
                }
            }
        }
    }
}

enum QueryCursor {
    Math { reader: PostingReader, element: QueryElement },
    Term { cursor: TermCursor, idf: f32 },
}

impl PostingCursor for QueryCursor {
    fn cur(&self) -> u64 {
        match self {
            QueryCursor::Math { reader, .. } => reader.cur(),
            QueryCursor::Term { cursor, .. } => cursor.cur(),
        }
    }

    fn next(&mut self) -> bool {
        match self {
            QueryCursor::Math { reader, .. } => reader.next(),
            QueryCursor::Term { cursor, .. } => cursor.next(),
        }
    }

    fn advance_to(&mut self, target: u64) -> bool {
        match self {
            QueryCursor::Math { reader, .. } => reader.advance_to(target),
            QueryCursor::Term { cursor, .. } => cursor.advance_to(target),
        }
    }

    fn visited(&self) -> u64 {
        match self {
            QueryCursor::Math { reader, .. } => reader.visited(),
            QueryCursor::Term { cursor, .. } => cursor.visited(),
        }
    }

    fn n_records(&self) -> u64 {
        match self {
            QueryCursor::Math { reader, .. } => reader.n_records(),
            QueryCursor::Term { cursor, .. } => cursor.n_records(),
        }
    }

    fn failed(&self) -> bool {
        match self {
            QueryCursor::Math { reader, .. } => reader.failed(),
            QueryCursor::Term { cursor, .. } => cursor.failed(),
        }
    }
}

struct HeapHit {
    score: f32,
    doc: DocumentId,
    exp_ids: Vec<ExprId>,
}

impl PartialEq for HeapHit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapHit {}

impl PartialOrd for HeapHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapHit {
    fn cmp(&self, other: &Self) -> Ordering {
        // score first; on ties the earlier (smaller) docID ranks higher
        self.score.total_cmp(&other.score).then(other.doc.cmp(&self.doc))
    }
}

struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<HeapHit>>,
}

impl TopK {
    fn new(k: usize) -> TopK {
        TopK { k, heap: BinaryHeap::with_capacity(k + 1) }
    }

    /// Scores at or below this cannot enter the top-k. Candidates arrive in
    /// ascending docID order, so a tie always loses to the incumbent.
    fn threshold(&self) -> f32 {
        if self.heap.len() < self.k {
            0.0
        } else {
            self.heap.peek().map(|Reverse(hit)| hit.score).unwrap_or(0.0)
        }
    }

    fn offer(&mut self, doc: DocumentId, score: f32, exp_ids: Vec<ExprId>) {
        if self.k == 0 {
            return;
        }
        let hit = HeapHit { score, doc, exp_ids };
        if self.heap.len() < self.k {
            self.heap.push(Reverse(hit));
        } else if self.heap.peek().is_some_and(|Reverse(worst)| hit.score > worst.score) {
            self.heap.pop();
            self.heap.push(Reverse(hit));
        }
    }

    fn into_hits(self) -> Vec<Hit> {
        let mut hits: Vec<HeapHit> = self.heap.into_iter().map(|Reverse(hit)| hit).collect();
        hits.sort_by(|a, b| b.cmp(a));
        hits.into_iter().map(|h| Hit { doc: h.doc, score: h.score, exp_ids: h.exp_ids }).collect()
    }
}
