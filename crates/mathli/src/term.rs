//! A small text inverted index: enough to resolve keywords to
//! `(docID, tf)` posting iterators with BM25 statistics next to the math
//! index. Terms and documents share the math side's docID space.

use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::merge::PostingCursor;
use crate::{pack_key, DocumentId, Error, FastMap8, Result, EXHAUSTED_KEY};

pub const BM25_K1: f32 = 1.2;
pub const BM25_B: f32 = 0.75;

const TERM_DIR: &str = "term";

pub struct TermIndexWriter {
    postings: FastMap8<String, Vec<(DocumentId, u32)>>,
    doc_lens: Vec<u32>,
    cur_doc: Option<DocumentId>,
    cur_counts: FastMap8<String, u32>,
    cur_len: u32,
}

impl TermIndexWriter {
    pub fn create(index_dir: &Path) -> Result<TermIndexWriter> {
        std::fs::create_dir_all(index_dir.join(TERM_DIR))?;
        Ok(TermIndexWriter {
            postings: FastMap8::default(),
            doc_lens: Vec::new(),
            cur_doc: None,
            cur_counts: FastMap8::default(),
            cur_len: 0,
        })
    }

    /// Allocates the next docID. IDs are monotone from 1 and shared with the
    /// math index.
    pub fn doc_begin(&mut self) -> DocumentId {
        let doc = self.doc_lens.len() as DocumentId + 1;
        self.cur_doc = Some(doc);
        self.cur_counts.clear();
        self.cur_len = 0;
        doc
    }

    pub fn add_term(&mut self, term: &str) {
        debug_assert!(self.cur_doc.is_some(), "add_term outside of a document");
        *self.cur_counts.entry(term.to_string()).or_default() += 1;
        self.cur_len += 1;
    }

    pub fn doc_end(&mut self) -> DocumentId {
        let doc = self.cur_doc.take().expect("doc_end without doc_begin");
        let mut terms: Vec<(String, u32)> = self.cur_counts.drain().collect();
        terms.sort();
        for (term, tf) in terms {
            self.postings.entry(term).or_default().push((doc, tf));
        }
        self.doc_lens.push(self.cur_len);
        doc
    }

    pub fn n_docs(&self) -> u32 {
        self.doc_lens.len() as u32
    }

    pub fn avg_doc_len(&self) -> u32 {
        if self.doc_lens.is_empty() {
            return 0;
        }
        (self.doc_lens.iter().map(|&l| l as u64).sum::<u64>() / self.doc_lens.len() as u64) as u32
    }

    pub fn seal(self, index_dir: &Path) -> Result<()> {
        let dir = index_dir.join(TERM_DIR);

        let mut entries: Vec<(String, Vec<(DocumentId, u32)>)> =
            self.postings.into_iter().collect();
        entries.sort();
        let disk = TermDictDisk { postings: entries, doc_lens: self.doc_lens };
        let file = std::fs::File::create(dir.join("dict"))?;
        bincode::serialize_into(std::io::BufWriter::new(file), &disk)?;

        let mut stats = std::io::BufWriter::new(std::fs::File::create(dir.join("stats"))?);
        stats.write_u32::<LittleEndian>(disk.doc_lens.len() as u32)?;
        stats.write_u64::<LittleEndian>(disk.doc_lens.iter().map(|&l| l as u64).sum())?;
        std::io::Write::flush(&mut stats)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct TermDictDisk {
    postings: Vec<(String, Vec<(DocumentId, u32)>)>,
    doc_lens: Vec<u32>,
}

pub struct TermIndex {
    postings: FastMap8<String, Arc<Vec<(DocumentId, u32)>>>,
    doc_lens: Vec<u32>,
    n_docs: u32,
    avg_doc_len: f32,
}

impl TermIndex {
    pub fn open(index_dir: &Path) -> Result<TermIndex> {
        let dir = index_dir.join(TERM_DIR);

        let file = std::fs::File::open(dir.join("dict"))?;
        let disk: TermDictDisk = bincode::deserialize_from(std::io::BufReader::new(file))?;

        let stats_path = dir.join("stats");
        let bytes = std::fs::read(&stats_path)?;
        if bytes.len() != 12 {
            return Err(Error::Corrupt {
                file: stats_path,
                reason: format!("expected 12 bytes, found {}", bytes.len()),
            });
        }
        let mut cursor = std::io::Cursor::new(bytes.as_slice());
        let n_docs = cursor.read_u32::<LittleEndian>()?;
        let total_len = cursor.read_u64::<LittleEndian>()?;
        if n_docs as usize != disk.doc_lens.len() {
            return Err(Error::Corrupt {
                file: stats_path,
                reason: "stats disagree with the dictionary".to_string(),
            });
        }

        let postings =
            disk.postings.into_iter().map(|(term, list)| (term, Arc::new(list))).collect();
        let avg_doc_len =
            if n_docs == 0 { 0.0 } else { total_len as f32 / n_docs as f32 };
        Ok(TermIndex { postings, doc_lens: disk.doc_lens, n_docs, avg_doc_len })
    }

    pub fn n_docs(&self) -> u32 {
        self.n_docs
    }

    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    pub fn doc_len(&self, doc: DocumentId) -> u32 {
        self.doc_lens.get(doc as usize - 1).copied().unwrap_or(0)
    }

    /// Resolves one keyword: an iterator over `(docID, tf)` plus the term's
    /// inverse document frequency. Unknown terms are an empty lookup, not an
    /// error.
    pub fn lookup(&self, term: &str) -> Option<(TermCursor, f32)> {
        let list = self.postings.get(term)?.clone();
        let df = list.len() as f32;
        let n = self.n_docs as f32;
        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
        Some((TermCursor::new(list), idf))
    }
}

/// BM25 contribution of one term occurrence.
pub fn bm25(idf: f32, tf: u32, doc_len: u32, avg_doc_len: f32) -> f32 {
    let tf = tf as f32;
    let norm = if avg_doc_len > 0.0 { doc_len as f32 / avg_doc_len } else { 1.0 };
    idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm))
}

/// The largest score a term iterator can contribute, reached as tf grows.
pub fn bm25_upper_bound(idf: f32) -> f32 {
    idf * (BM25_K1 + 1.0)
}

pub struct TermCursor {
    list: Arc<Vec<(DocumentId, u32)>>,
    pos: usize,
    visited: u64,
}

impl TermCursor {
    fn new(list: Arc<Vec<(DocumentId, u32)>>) -> TermCursor {
        let visited = u64::from(!list.is_empty());
        TermCursor { list, pos: 0, visited }
    }

    pub fn tf(&self) -> Option<u32> {
        self.list.get(self.pos).map(|&(_, tf)| tf)
    }
}

impl PostingCursor for TermCursor {
    fn cur(&self) -> u64 {
        self.list.get(self.pos).map(|&(doc, _)| pack_key(doc, 0)).unwrap_or(EXHAUSTED_KEY)
    }

    fn next(&mut self) -> bool {
        if self.pos >= self.list.len() {
            return false;
        }
        self.pos += 1;
        if self.pos < self.list.len() {
            self.visited += 1;
            true
        } else {
            false
        }
    }

    fn advance_to(&mut self, target: u64) -> bool {
        while self.cur() < target {
            if !self.next() {
                return false;
            }
        }
        self.cur() != EXHAUSTED_KEY
    }

    fn visited(&self) -> u64 {
        self.visited
    }

    fn n_records(&self) -> u64 {
        self.list.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(dir: &Path, docs: &[&str]) {
        let mut writer = TermIndexWriter::create(dir).unwrap();
        for text in docs {
            writer.doc_begin();
            for word in text.split_whitespace() {
                writer.add_term(word);
            }
            writer.doc_end();
        }
        writer.seal(dir).unwrap();
    }

    #[test]
    fn lookup_returns_per_doc_term_frequencies() {
        let dir = tempfile::tempdir().unwrap();
        build(dir.path(), &["the limit of a sequence", "the the the"]);

        let index = TermIndex::open(dir.path()).unwrap();
        assert_eq!(index.n_docs(), 2);

        let (mut cursor, idf) = index.lookup("the").unwrap();
        assert!(idf > 0.0);
        assert_eq!(cursor.cur(), pack_key(1, 0));
        assert_eq!(cursor.tf(), Some(1));
        assert!(cursor.next());
        assert_eq!(cursor.tf(), Some(3));
        assert!(!cursor.next());

        assert!(index.lookup("derivative").is_none());
    }

    #[test]
    fn rarer_terms_have_higher_idf() {
        let dir = tempfile::tempdir().unwrap();
        build(dir.path(), &["a b", "a c", "a d"]);
        let index = TermIndex::open(dir.path()).unwrap();

        let (_, idf_common) = index.lookup("a").unwrap();
        let (_, idf_rare) = index.lookup("b").unwrap();
        assert!(idf_rare > idf_common);
    }

    #[test]
    fn bm25_saturates_below_its_upper_bound() {
        let idf = 1.3;
        let upper = bm25_upper_bound(idf);
        for tf in [1, 2, 10, 1000] {
            assert!(bm25(idf, tf, 10, 10.0) < upper);
        }
        assert!(bm25(idf, 2, 10, 10.0) > bm25(idf, 1, 10, 10.0));
    }
}
