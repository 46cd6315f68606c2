//! Append-only, skip-enabled posting lists. A list is built in memory
//! during indexing and sealed into the shared `path.post` stream; readers
//! walk either an mmapped slice of that stream or a cached in-memory copy
//! with identical iterator semantics.

use std::sync::Arc;

use memmap2::Mmap;

use super::codec::{PostingRecord, SKIP_SPAN};
use crate::merge::PostingCursor;
use crate::{Error, Result, EXHAUSTED_KEY};

/// Accumulates one fingerprint's records during a build.
#[derive(Debug, Default)]
pub struct PostingBuilder {
    bytes: Vec<u8>,
    n_records: u32,
    last_key: Option<u64>,
    u_max: u16,
    /// (first key of span, byte offset relative to the list start)
    skips: Vec<(u64, u64)>,
}

impl PostingBuilder {
    pub fn append(&mut self, record: &PostingRecord) -> Result<()> {
        let key = record.key();
        if self.last_key.is_some_and(|last| key <= last) {
            return Err(Error::Arg("posting keys must be strictly increasing".to_string()));
        }

        if self.n_records as usize % SKIP_SPAN == 0 {
            self.skips.push((key, self.bytes.len() as u64));
        }
        record.write_to(&mut self.bytes).expect("writing to a Vec cannot fail");
        self.n_records += 1;
        self.last_key = Some(key);
        self.u_max = self.u_max.max(record.total_weight().min(u16::MAX as u32) as u16);
        Ok(())
    }

    pub fn n_records(&self) -> u32 {
        self.n_records
    }

    pub fn u_max(&self) -> u16 {
        self.u_max
    }

    pub fn byte_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn skips(&self) -> &[(u64, u64)] {
        &self.skips
    }
}

/// Where a reader's bytes live.
#[derive(Clone)]
pub enum ListBytes {
    Disk { mmap: Arc<Mmap>, start: usize, len: usize },
    Memory(Arc<[u8]>),
}

impl ListBytes {
    fn as_slice(&self) -> &[u8] {
        match self {
            ListBytes::Disk { mmap, start, len } => &mmap[*start..*start + *len],
            ListBytes::Memory(bytes) => bytes,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, ListBytes::Memory(_))
    }
}

pub struct PostingReader {
    bytes: ListBytes,
    /// (first key of span, byte offset relative to the list start)
    skips: Arc<Vec<(u64, u64)>>,
    n_records: u32,
    offset: usize,
    current: Option<(PostingRecord, usize)>,
    n_visited: u64,
    failed: bool,
}

impl PostingReader {
    pub fn new(bytes: ListBytes, skips: Arc<Vec<(u64, u64)>>, n_records: u32) -> PostingReader {
        let mut reader = PostingReader {
            bytes,
            skips,
            n_records,
            offset: 0,
            current: None,
            n_visited: 0,
            failed: false,
        };
        reader.decode_at(0);
        reader
    }

    pub fn record(&self) -> Option<&PostingRecord> {
        self.current.as_ref().map(|(record, _)| record)
    }

    pub fn is_in_memory(&self) -> bool {
        self.bytes.is_in_memory()
    }

    fn decode_at(&mut self, offset: usize) {
        self.offset = offset;
        let bytes = self.bytes.as_slice();
        if offset >= bytes.len() {
            self.current = None;
            return;
        }
        match PostingRecord::read_from(&bytes[offset..]) {
            Some((record, len)) => {
                self.current = Some((record, len));
                self.n_visited += 1;
            }
            None => {
                // a truncated record mid-list: report exhausted, best-effort
                self.current = None;
                self.failed = true;
            }
        }
    }
}

impl PostingCursor for PostingReader {
    fn cur(&self) -> u64 {
        self.current.as_ref().map(|(record, _)| record.key()).unwrap_or(EXHAUSTED_KEY)
    }

    fn next(&mut self) -> bool {
        match self.current {
            Some((_, len)) => {
                self.decode_at(self.offset + len);
                self.current.is_some()
            }
            None => false,
        }
    }

    fn advance_to(&mut self, target: u64) -> bool {
        if self.cur() >= target {
            return self.cur() != EXHAUSTED_KEY;
        }

        // jump to the last skip span starting at or before the target
        let pos = self.skips.partition_point(|&(key, _)| key <= target);
        if pos > 0 {
            let (_, span_offset) = self.skips[pos - 1];
            if span_offset as usize > self.offset {
                self.decode_at(span_offset as usize);
            }
        }

        while self.cur() < target {
            if !self.next() {
                return false;
            }
        }
        true
    }

    fn visited(&self) -> u64 {
        self.n_visited
    }

    fn n_records(&self) -> u64 {
        self.n_records as u64
    }

    fn failed(&self) -> bool {
        self.failed
    }
}
