//! Content-addressed blob storage: docID to raw bytes, append-only, with
//! optional gzip for document bodies.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::{DocumentId, Error, Result};

const DATA_FILE: &str = "blob.dat";
const INDEX_FILE: &str = "blob.idx";

pub struct BlobWriter {
    dir: PathBuf,
    data: BufWriter<File>,
    offsets: Vec<(u64, u32)>,
    written: u64,
    compress: bool,
}

impl BlobWriter {
    pub fn create(dir: &Path, compress: bool) -> Result<BlobWriter> {
        std::fs::create_dir_all(dir)?;
        let data = BufWriter::new(File::create(dir.join(DATA_FILE))?);
        Ok(BlobWriter { dir: dir.to_path_buf(), data, offsets: Vec::new(), written: 0, compress })
    }

    /// docIDs are allocated monotonically from 1, one blob each.
    pub fn write(&mut self, doc: DocumentId, bytes: &[u8]) -> Result<()> {
        if doc as usize != self.offsets.len() + 1 {
            return Err(Error::Arg(format!(
                "blob docIDs must be dense from 1: got {doc}, expected {}",
                self.offsets.len() + 1
            )));
        }

        let payload: Vec<u8>;
        let stored: &[u8] = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            payload = encoder.finish()?;
            &payload
        } else {
            bytes
        };

        self.data.write_all(stored)?;
        self.offsets.push((self.written, stored.len() as u32));
        self.written += stored.len() as u64;
        Ok(())
    }

    pub fn seal(self) -> Result<()> {
        let data = self.data.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        data.sync_all()?;

        let mut index = BufWriter::new(File::create(self.dir.join(INDEX_FILE))?);
        index.write_u8(u8::from(self.compress))?;
        index.write_u32::<LittleEndian>(self.offsets.len() as u32)?;
        for (offset, len) in &self.offsets {
            index.write_u64::<LittleEndian>(*offset)?;
            index.write_u32::<LittleEndian>(*len)?;
        }
        index.flush()?;
        Ok(())
    }
}

pub struct BlobReader {
    data: Vec<u8>,
    offsets: Vec<(u64, u32)>,
    compressed: bool,
}

impl BlobReader {
    pub fn open(dir: &Path) -> Result<BlobReader> {
        let index_path = dir.join(INDEX_FILE);
        let corrupt = |reason: &str| Error::Corrupt {
            file: index_path.clone(),
            reason: reason.to_string(),
        };

        let index_bytes = std::fs::read(&index_path)?;
        let mut cursor = Cursor::new(index_bytes.as_slice());
        let compressed = cursor.read_u8().map_err(|_| corrupt("missing header"))? != 0;
        let n = cursor.read_u32::<LittleEndian>().map_err(|_| corrupt("missing count"))?;
        let mut offsets = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let offset = cursor.read_u64::<LittleEndian>().map_err(|_| corrupt("short entry"))?;
            let len = cursor.read_u32::<LittleEndian>().map_err(|_| corrupt("short entry"))?;
            offsets.push((offset, len));
        }

        let data = std::fs::read(dir.join(DATA_FILE))?;
        if let Some(&(offset, len)) = offsets.last() {
            if offset + len as u64 != data.len() as u64 {
                return Err(corrupt("data file length disagrees with the offset table"));
            }
        }

        Ok(BlobReader { data, offsets, compressed })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn read(&self, doc: DocumentId) -> Result<Vec<u8>> {
        let (offset, len) = *self
            .offsets
            .get(doc as usize - 1)
            .ok_or_else(|| Error::Arg(format!("unknown docID {doc}")))?;
        let stored = &self.data[offset as usize..offset as usize + len as usize];

        if self.compressed {
            let mut decoder = GzDecoder::new(stored);
            let mut bytes = Vec::new();
            decoder.read_to_end(&mut bytes)?;
            Ok(bytes)
        } else {
            Ok(stored.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BlobWriter::create(dir.path(), false).unwrap();
        writer.write(1, b"https://example.org/seq").unwrap();
        writer.write(2, b"https://example.org/frac").unwrap();
        writer.seal().unwrap();

        let reader = BlobReader::open(dir.path()).unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.read(1).unwrap(), b"https://example.org/seq");
        assert_eq!(reader.read(2).unwrap(), b"https://example.org/frac");
        assert!(reader.read(3).is_err());
    }

    #[test]
    fn compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let body = "the limit of a sequence ".repeat(64);

        let mut writer = BlobWriter::create(dir.path(), true).unwrap();
        writer.write(1, body.as_bytes()).unwrap();
        writer.seal().unwrap();

        let reader = BlobReader::open(dir.path()).unwrap();
        assert_eq!(reader.read(1).unwrap(), body.as_bytes());
        // it actually compressed
        assert!(reader.data.len() < body.len());
    }

    #[test]
    fn sparse_doc_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BlobWriter::create(dir.path(), false).unwrap();
        writer.write(1, b"one").unwrap();
        assert!(writer.write(3, b"three").is_err());
    }
}
