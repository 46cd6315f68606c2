#![allow(clippy::type_complexity)]

mod blob;
mod error;
pub mod index;
pub mod indices;
pub mod lex;
pub mod merge;
pub mod query;
pub mod score;
pub mod search;
pub mod subpath;
pub mod subpath_set;
pub mod term;
pub mod tex;

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::time::{Duration, Instant};

use fxhash::FxHasher64;

pub use self::blob::{BlobReader, BlobWriter};
pub use self::error::{Error, ResponseCode};
pub use self::index::{MathIndex, MathIndexWriter};
pub use self::indices::{Indexer, Indices, IndicesWriter};
pub use self::search::{Hit, Search, SearchRequest, SearchResult, SearchStats};

pub type Result<T> = std::result::Result<T, error::Error>;

pub type DocumentId = u32;
pub type ExprId = u32;
pub type NodeId = u16;
pub type TokenId = u16;
pub type SymbolId = u16;
pub type Position = u32;
pub type FastMap8<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher64>>;

/// Upper bound on leaf-to-root paths per expression; path ids must fit a
/// 64-bit leaves bitmask.
pub const MAX_MATH_PATHS: usize = 64;

/// How many matching expression ids are retained per document for snippet
/// rendering.
pub const MAX_HIGHLIGHT_OCCURS: usize = 8;

/// Hard cap on the number of posting-list iterators a single query may merge.
pub const MAX_MERGE_POSTINGS: usize = 64;

/// Math keywords allowed in one mixed query.
pub const MAX_QUERY_MATH_KW: usize = 4;

/// Term keywords allowed in one mixed query.
pub const MAX_QUERY_TERM_KW: usize = 32;

/// A posting key orders records by document first, expression second.
#[inline]
pub fn pack_key(doc: DocumentId, exp: ExprId) -> u64 {
    (doc as u64) << 32 | exp as u64
}

#[inline]
pub fn key_doc(key: u64) -> DocumentId {
    (key >> 32) as u32
}

#[inline]
pub fn key_exp(key: u64) -> ExprId {
    key as u32
}

/// The key an exhausted posting iterator reports.
pub const EXHAUSTED_KEY: u64 = u64::MAX;

/// Folds a 64-bit hash into 16 bits.
pub(crate) fn fold16(h: u64) -> u16 {
    (h ^ (h >> 16) ^ (h >> 32) ^ (h >> 48)) as u16
}

/// Wall-clock budget for one search. When it expires between candidates the
/// search returns the partial top-k and flags the result as degraded.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    started_at: Instant,
    budget: Duration,
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

impl TimeBudget {
    pub fn new(budget: Duration) -> Self {
        Self { started_at: Instant::now(), budget }
    }

    pub fn max() -> Self {
        Self::new(Duration::MAX)
    }

    pub fn exceeded(&self) -> bool {
        self.budget != Duration::MAX && self.started_at.elapsed() >= self.budget
    }
}
