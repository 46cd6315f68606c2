//! One handle over the four sub-indexes of an index directory: the term
//! index, the math index and the two blob stores.
//!
//! ```text
//! <idx>/term/...   text inverted index
//! <idx>/math/...   math inverted index
//! <idx>/url        blob store: docID -> URL, uncompressed
//! <idx>/doc        blob store: docID -> body, gzip
//! <idx>/LOCK       writer exclusivity, removed on clean close
//! ```

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::blob::{BlobReader, BlobWriter};
use crate::index::dict::MathStats;
use crate::index::{MathIndex, MathIndexWriter};
use crate::lex::{Lexer, Slice};
use crate::subpath::extract;
use crate::term::{TermIndex, TermIndexWriter};
use crate::{tex, DocumentId, Error, Position, Result};

const LOCK_FILE: &str = "LOCK";

struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Write-mode handle. Only one writer may hold an index directory; a crash
/// leaves the lock behind and the index must be rebuilt.
pub struct IndicesWriter {
    dir: PathBuf,
    _lock: LockFile,
    pub(crate) term: TermIndexWriter,
    pub(crate) math: MathIndexWriter,
    pub(crate) url: BlobWriter,
    pub(crate) txt: BlobWriter,
}

impl IndicesWriter {
    pub fn create(dir: &Path) -> Result<IndicesWriter> {
        std::fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::Locked { dir: dir.to_path_buf() })
            }
            Err(e) => return Err(e.into()),
        }
        let lock = LockFile { path: lock_path };

        Ok(IndicesWriter {
            term: TermIndexWriter::create(dir)?,
            math: MathIndexWriter::create(dir)?,
            url: BlobWriter::create(&dir.join("url"), false)?,
            txt: BlobWriter::create(&dir.join("doc"), true)?,
            dir: dir.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn n_docs(&self) -> u32 {
        self.term.n_docs()
    }

    /// Flushes every sub-index and releases the lock. Skipping this leaves
    /// the directory unreadable: crash consistency is clean-close-or-rebuild.
    pub fn seal(self) -> Result<()> {
        let avg_doc_len = self.term.avg_doc_len();
        self.math.seal(avg_doc_len)?;
        self.term.seal(&self.dir)?;
        self.url.seal()?;
        self.txt.seal()?;
        tracing::debug!(dir = %self.dir.display(), "sealed indices");
        Ok(())
    }
}

/// Feeds documents through the lexer into every sub-index.
///
/// One position counter advances for both word and math slices, and each
/// math segment also feeds a `math_exp` placeholder term into the text
/// index, so text and math positions stay synchronized. Math positions are
/// never read back by position at query time; the behavior is kept for
/// phrase-search compatibility.
pub struct Indexer<'a> {
    writer: &'a mut IndicesWriter,
    tolerate_parse_errors: bool,
    n_parse_tex: u64,
    n_parse_err: u64,
    cur_position: Position,
    on_parser_exception: Option<Box<dyn FnMut(&str, &Error) + 'a>>,
}

impl<'a> Indexer<'a> {
    pub fn new(writer: &'a mut IndicesWriter) -> Indexer<'a> {
        Indexer {
            writer,
            tolerate_parse_errors: true,
            n_parse_tex: 0,
            n_parse_err: 0,
            cur_position: 0,
            on_parser_exception: None,
        }
    }

    pub fn tolerate_parse_errors(&mut self, tolerate: bool) -> &mut Self {
        self.tolerate_parse_errors = tolerate;
        self
    }

    pub fn on_parser_exception(
        &mut self,
        callback: impl FnMut(&str, &Error) + 'a,
    ) -> &mut Self {
        self.on_parser_exception = Some(Box::new(callback));
        self
    }

    pub fn n_parse_tex(&self) -> u64 {
        self.n_parse_tex
    }

    pub fn n_parse_err(&self) -> u64 {
        self.n_parse_err
    }

    pub fn index_document(&mut self, url: &str, body: &str) -> Result<DocumentId> {
        let doc = self.writer.term.doc_begin();
        self.cur_position = 0;

        for slice in Lexer::new(body) {
            match slice {
                Slice::Word(word) => {
                    self.writer.term.add_term(&word);
                    self.cur_position += 1;
                }
                Slice::Math(tex_src) => {
                    // placeholder term keeps text positions in step with math
                    self.writer.term.add_term("math_exp");
                    let exp = self.cur_position;
                    self.cur_position += 1;
                    self.n_parse_tex += 1;

                    match index_tex(&mut self.writer.math, doc, exp, tex_src) {
                        Ok(()) => {}
                        Err(err @ (Error::Parse(_) | Error::Overflow { .. })) => {
                            self.n_parse_err += 1;
                            if let Some(callback) = self.on_parser_exception.as_mut() {
                                callback(tex_src, &err);
                            }
                            if !self.tolerate_parse_errors {
                                return Err(err);
                            }
                            tracing::warn!(doc, tex = tex_src, %err, "skipped expression");
                        }
                        // Io and friends abort the document
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        self.writer.url.write(doc, url.as_bytes())?;
        self.writer.txt.write(doc, body.as_bytes())?;

        let ended = self.writer.term.doc_end();
        debug_assert_eq!(ended, doc);
        Ok(doc)
    }
}

fn index_tex(
    math: &mut MathIndexWriter,
    doc: DocumentId,
    exp: Position,
    tex_src: &str,
) -> Result<()> {
    let tree = tex::parse(tex_src)?;
    let subpaths = extract(&tree)?;
    math.add(doc, exp, &subpaths)?;
    Ok(())
}

/// Read-mode handle. Any number may coexist on one directory.
pub struct Indices {
    term: TermIndex,
    math: MathIndex,
    url: BlobReader,
    txt: BlobReader,
}

impl Indices {
    pub fn open(dir: &Path) -> Result<Indices> {
        Ok(Indices {
            term: TermIndex::open(dir)?,
            math: MathIndex::open(dir)?,
            url: BlobReader::open(&dir.join("url"))?,
            txt: BlobReader::open(&dir.join("doc"))?,
        })
    }

    /// Pins hot math posting lists in memory. Returns bytes actually used.
    pub fn cache(&mut self, math_budget: u64) -> Result<u64> {
        self.math.load(math_budget)
    }

    pub fn term(&self) -> &TermIndex {
        &self.term
    }

    pub fn math(&self) -> &MathIndex {
        &self.math
    }

    pub fn math_stats(&self) -> &MathStats {
        self.math.stats()
    }

    pub fn n_docs(&self) -> u32 {
        self.term.n_docs()
    }

    pub fn read_url(&self, doc: DocumentId) -> Result<Vec<u8>> {
        self.url.read(doc)
    }

    pub fn read_doc(&self, doc: DocumentId) -> Result<Vec<u8>> {
        self.txt.read(doc)
    }
}
