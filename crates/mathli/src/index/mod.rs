//! The math inverted index: a dictionary from path fingerprints to
//! skip-enabled posting lists, plus a symbol-info side stream that lets
//! readers tell fingerprint collisions from real matches.

pub mod codec;
pub mod dict;
pub mod posting;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use memmap2::Mmap;

use self::codec::{PostingRecord, RecordSector, RecordSplit, FLAG_WILDCARD, FOOTER_LEN, POST_MAGIC};
use self::dict::{DictEntry, MathStats};
use self::posting::{ListBytes, PostingBuilder, PostingReader};
use crate::subpath::{SubpathKind, Subpaths};
use crate::subpath_set::{self, Element, PrefixKey};
use crate::{DocumentId, Error, ExprId, FastMap8, Result};

const MATH_DIR: &str = "math";

pub struct MathIndexWriter {
    dir: PathBuf,
    lists: FastMap8<u64, PostingBuilder>,
    keys: FastMap8<u64, PrefixKey>,
    n_tex: u64,
    n_sector_trees: u64,
}

impl MathIndexWriter {
    /// Files are created lazily at seal time; opening only claims the
    /// directory.
    pub fn create(index_dir: &Path) -> Result<MathIndexWriter> {
        let dir = index_dir.join(MATH_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(MathIndexWriter {
            dir,
            lists: FastMap8::default(),
            keys: FastMap8::default(),
            n_tex: 0,
            n_sector_trees: 0,
        })
    }

    /// Indexes one expression: groups its subpaths into elements and appends
    /// one posting record per element. Returns how many elements were
    /// indexable (rank-rooted groups are dropped, short paths are residual).
    pub fn add(&mut self, doc: DocumentId, exp: ExprId, subpaths: &Subpaths) -> Result<usize> {
        let set = subpath_set::build(subpaths);
        let flags = if subpaths.paths.iter().any(|p| p.kind == SubpathKind::Wildcard) {
            FLAG_WILDCARD
        } else {
            0
        };

        for element in &set.elements {
            let fingerprint = element.fingerprint();
            let record = element_record(doc, exp, flags, element);
            self.n_sector_trees += element.sectors.len() as u64;
            self.lists.entry(fingerprint).or_default().append(&record)?;
            self.keys.entry(fingerprint).or_insert_with(|| element.key.clone());
        }

        self.n_tex += 1;
        Ok(set.elements.len())
    }

    pub fn n_tex(&self) -> u64 {
        self.n_tex
    }

    /// Writes out the posting stream, dictionary, skip tables, symbol-info
    /// stream and stats. Until this returns, the directory is not a valid
    /// read-mode index.
    pub fn seal(self, avg_doc_len: u32) -> Result<()> {
        let mut fingerprints: Vec<u64> = self.lists.keys().copied().collect();
        fingerprints.sort_unstable();

        let mut post = BufWriter::new(File::create(self.dir.join("path.post"))?);
        let mut dict_entries = Vec::with_capacity(fingerprints.len());
        let mut skip_blocks = Vec::with_capacity(fingerprints.len());
        let mut sym_entries = Vec::with_capacity(fingerprints.len());
        let mut offset = 0u64;
        let mut total_records = 0u64;

        for fingerprint in fingerprints {
            let builder = &self.lists[&fingerprint];
            post.write_all(builder.bytes())?;

            dict_entries.push((
                fingerprint,
                DictEntry {
                    offset,
                    length: builder.byte_len(),
                    n_records: builder.n_records(),
                    u_max: builder.u_max(),
                },
            ));
            let spans: Vec<(u64, u64)> =
                builder.skips().iter().map(|&(key, rel)| (key, offset + rel)).collect();
            skip_blocks.push((fingerprint, spans));
            sym_entries.push((fingerprint, self.keys[&fingerprint].clone()));

            offset += builder.byte_len();
            total_records += builder.n_records() as u64;
        }

        post.write_all(POST_MAGIC)?;
        post.write_u64::<LittleEndian>(total_records)?;
        let post = post.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        post.sync_all()?;

        dict::write_dict(&self.dir.join("path.dict"), &dict_entries)?;
        dict::write_skips(&self.dir.join("path.skip"), &skip_blocks)?;
        dict::write_syms(&self.dir.join("path.sym"), &sym_entries)?;
        let stats =
            MathStats { n_tex: self.n_tex, n_sector_trees: self.n_sector_trees, avg_doc_len };
        dict::write_stats(&self.dir.join("stats"), &stats)?;

        tracing::debug!(
            n_tex = self.n_tex,
            n_lists = dict_entries.len(),
            bytes = offset,
            "sealed math index"
        );
        Ok(())
    }
}

fn element_record(doc: DocumentId, exp: ExprId, flags: u8, element: &Element) -> PostingRecord {
    let sectors = element
        .sectors
        .iter()
        .map(|sector| RecordSector {
            root_id: sector.root_id,
            width: sector.width,
            ophash: sector.ophash,
            splits: sector
                .splits
                .iter()
                .map(|split| RecordSplit {
                    symbol: split.symbol,
                    weight: split.weight,
                    leaves: split.leaves,
                })
                .collect(),
        })
        .collect();
    PostingRecord { doc, exp, flags, sectors }
}

/// A successful dictionary lookup: the list iterator plus the side-table
/// facts the query side needs for bounds.
pub struct MathEntryReader {
    pub reader: PostingReader,
    pub n_records: u32,
    pub u_max: u16,
}

pub struct MathIndex {
    post: Arc<Mmap>,
    dict: FastMap8<u64, DictEntry>,
    /// Skip spans with offsets relative to each list's start.
    skips: FastMap8<u64, Arc<Vec<(u64, u64)>>>,
    syms: FastMap8<u64, PrefixKey>,
    cached: FastMap8<u64, Arc<[u8]>>,
    loaded: bool,
    stats: MathStats,
}

impl MathIndex {
    pub fn open(index_dir: &Path) -> Result<MathIndex> {
        let dir = index_dir.join(MATH_DIR);
        let post_path = dir.join("path.post");

        let file = File::open(&post_path)?;
        let post = Arc::new(unsafe { Mmap::map(&file)? });
        let corrupt = |reason: String| Error::Corrupt { file: post_path.clone(), reason };

        if (post.len() as u64) < FOOTER_LEN {
            return Err(corrupt("file shorter than its footer".to_string()));
        }
        let data_len = post.len() - FOOTER_LEN as usize;
        if &post[data_len..data_len + 8] != POST_MAGIC {
            return Err(corrupt("bad footer magic".to_string()));
        }
        let total_records =
            u64::from_le_bytes(post[data_len + 8..].try_into().expect("footer is 16 bytes"));

        let dict = dict::read_dict(&dir.join("path.dict"))?;
        let mut counted = 0u64;
        for entry in dict.values() {
            if entry.offset + entry.length > data_len as u64 {
                return Err(corrupt("posting list extends past the footer".to_string()));
            }
            counted += entry.n_records as u64;
        }
        if counted != total_records {
            return Err(corrupt(format!(
                "footer says {total_records} records, dictionary says {counted}"
            )));
        }

        let mut skips = FastMap8::default();
        for (fingerprint, spans) in dict::read_skips(&dir.join("path.skip"))? {
            let entry = dict
                .get(&fingerprint)
                .ok_or_else(|| corrupt("skip table for unknown fingerprint".to_string()))?;
            let mut rel = Vec::with_capacity(spans.len());
            for (key, abs) in spans {
                let offset = abs
                    .checked_sub(entry.offset)
                    .filter(|o| *o < entry.length)
                    .ok_or_else(|| corrupt("skip span outside its list".to_string()))?;
                rel.push((key, offset));
            }
            skips.insert(fingerprint, Arc::new(rel));
        }

        let syms = dict::read_syms(&dir.join("path.sym"))?;
        for fingerprint in dict.keys() {
            if !syms.contains_key(fingerprint) {
                return Err(corrupt("dictionary entry without symbol info".to_string()));
            }
        }

        let stats = dict::read_stats(&dir.join("stats"))?;

        Ok(MathIndex {
            post,
            dict,
            skips,
            syms,
            cached: FastMap8::default(),
            loaded: false,
            stats,
        })
    }

    pub fn stats(&self) -> &MathStats {
        &self.stats
    }

    /// Greedily pins the highest-frequency posting lists in memory until the
    /// byte budget runs out. The membership is fixed for the session; a
    /// second load is refused.
    pub fn load(&mut self, budget: u64) -> Result<u64> {
        if self.loaded {
            return Err(Error::Budget);
        }
        self.loaded = true;

        let mut order: Vec<(u64, DictEntry)> = self.dict.iter().map(|(f, e)| (*f, *e)).collect();
        order.sort_by(|a, b| b.1.n_records.cmp(&a.1.n_records).then(a.0.cmp(&b.0)));

        let mut used = 0u64;
        for (fingerprint, entry) in order {
            if used + entry.length > budget {
                continue;
            }
            let start = entry.offset as usize;
            let bytes: Arc<[u8]> = self.post[start..start + entry.length as usize].to_vec().into();
            self.cached.insert(fingerprint, bytes);
            used += entry.length;
        }

        tracing::debug!(used, budget, n_lists = self.cached.len(), "loaded math posting cache");
        Ok(used)
    }

    pub fn n_cached(&self) -> usize {
        self.cached.len()
    }

    /// An absent key yields `None`, which callers surface as an empty
    /// iterator rather than an error. A fingerprint whose stored token
    /// sequence disagrees with the probe is a collision and also `None`.
    pub fn lookup(&self, key: &PrefixKey) -> Option<MathEntryReader> {
        let fingerprint = key.fingerprint();
        let entry = self.dict.get(&fingerprint)?;
        let stored = self.syms.get(&fingerprint)?;
        if stored != key {
            return None;
        }

        let skips = self.skips.get(&fingerprint).cloned().unwrap_or_else(|| Arc::new(Vec::new()));
        let bytes = match self.cached.get(&fingerprint) {
            Some(cached) => ListBytes::Memory(cached.clone()),
            None => ListBytes::Disk {
                mmap: self.post.clone(),
                start: entry.offset as usize,
                len: entry.length as usize,
            },
        };

        Some(MathEntryReader {
            reader: PostingReader::new(bytes, skips, entry.n_records),
            n_records: entry.n_records,
            u_max: entry.u_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::PostingCursor;
    use crate::subpath::extract;
    use crate::{pack_key, tex};

    fn subpaths_of(tex_src: &str) -> Subpaths {
        extract(&tex::parse(tex_src).unwrap()).unwrap()
    }

    fn build_small(dir: &Path) {
        let mut writer = MathIndexWriter::create(dir).unwrap();
        writer.add(1, 0, &subpaths_of("a+b")).unwrap();
        writer.add(2, 0, &subpaths_of("a+c")).unwrap();
        writer.add(2, 3, &subpaths_of("\\frac{x}{y}")).unwrap();
        writer.seal(10).unwrap();
    }

    fn probe_key(tex_src: &str) -> PrefixKey {
        let subpaths = subpaths_of(tex_src);
        let set = subpath_set::build(&subpaths);
        set.elements[0].key.clone()
    }

    #[test]
    fn write_then_read_back_postings() {
        let dir = tempfile::tempdir().unwrap();
        build_small(dir.path());

        let index = MathIndex::open(dir.path()).unwrap();
        assert_eq!(index.stats().n_tex, 3);
        assert_eq!(index.stats().avg_doc_len, 10);

        // `a+b` and `a+c` share the VAR/ADD element fingerprint
        let entry = index.lookup(&probe_key("a+b")).unwrap();
        assert_eq!(entry.n_records, 2);
        assert_eq!(entry.u_max, 2);
        let mut reader = entry.reader;
        assert_eq!(reader.cur(), pack_key(1, 0));
        assert!(reader.next());
        assert_eq!(reader.cur(), pack_key(2, 0));
        assert!(!reader.next());
    }

    #[test]
    fn unknown_key_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        build_small(dir.path());
        let index = MathIndex::open(dir.path()).unwrap();
        let missing = PrefixKey { kind: SubpathKind::Normal, tokens: vec![0x4242] };
        assert!(index.lookup(&missing).is_none());
    }

    #[test]
    fn truncated_footer_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        build_small(dir.path());

        let post_path = dir.path().join("math").join("path.post");
        let bytes = std::fs::read(&post_path).unwrap();
        std::fs::write(&post_path, &bytes[..bytes.len() - 16]).unwrap();

        assert!(matches!(MathIndex::open(dir.path()), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn cached_lists_serve_identical_records() {
        let dir = tempfile::tempdir().unwrap();
        build_small(dir.path());

        let mut index = MathIndex::open(dir.path()).unwrap();
        let from_disk: Vec<u64> = {
            let mut reader = index.lookup(&probe_key("a+b")).unwrap().reader;
            let mut keys = vec![reader.cur()];
            while reader.next() {
                keys.push(reader.cur());
            }
            keys
        };

        index.load(u64::MAX).unwrap();
        assert!(index.n_cached() > 0);
        let mut reader = index.lookup(&probe_key("a+b")).unwrap().reader;
        assert!(reader.is_in_memory());
        let mut from_cache = vec![reader.cur()];
        while reader.next() {
            from_cache.push(reader.cur());
        }
        assert_eq!(from_disk, from_cache);

        // membership is fixed once loaded
        assert!(matches!(index.load(0), Err(Error::Budget)));
    }

    #[test]
    fn zero_budget_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        build_small(dir.path());
        let mut index = MathIndex::open(dir.path()).unwrap();
        assert_eq!(index.load(0).unwrap(), 0);
        assert_eq!(index.n_cached(), 0);
        assert!(index.lookup(&probe_key("a+b")).is_some());
    }
}
