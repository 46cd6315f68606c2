//! The fingerprint dictionary and its sibling side files. These formats are
//! contractual: little-endian, explicit field order, no padding.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::subpath::SubpathKind;
use crate::subpath_set::PrefixKey;
use crate::{Error, FastMap8, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictEntry {
    /// Byte offset of the list in `path.post`.
    pub offset: u64,
    /// Encoded byte length of the list.
    pub length: u64,
    pub n_records: u32,
    /// Maximum total split weight over the list's records; the query side
    /// tightens its upper bounds with it.
    pub u_max: u16,
}

const DICT_ENTRY_LEN: u64 = 8 + 8 + 8 + 4 + 2;

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::Corrupt { file: path.to_path_buf(), reason: reason.into() }
}

fn truncated(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |_| corrupt(path, "unexpected end of file")
}

pub fn write_dict(path: &Path, entries: &[(u64, DictEntry)]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_u32::<LittleEndian>(entries.len() as u32)?;
    for (fingerprint, entry) in entries {
        writer.write_u64::<LittleEndian>(*fingerprint)?;
        writer.write_u64::<LittleEndian>(entry.offset)?;
        writer.write_u64::<LittleEndian>(entry.length)?;
        writer.write_u32::<LittleEndian>(entry.n_records)?;
        writer.write_u16::<LittleEndian>(entry.u_max)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_dict(path: &Path) -> Result<FastMap8<u64, DictEntry>> {
    let bytes = std::fs::read(path)?;
    let mut cursor = Cursor::new(bytes.as_slice());

    let n = cursor.read_u32::<LittleEndian>().map_err(truncated(path))? as u64;
    if bytes.len() as u64 != 4 + n * DICT_ENTRY_LEN {
        return Err(corrupt(path, format!("expected {n} entries")));
    }

    let mut dict = FastMap8::default();
    for _ in 0..n {
        let fingerprint = cursor.read_u64::<LittleEndian>().map_err(truncated(path))?;
        let offset = cursor.read_u64::<LittleEndian>().map_err(truncated(path))?;
        let length = cursor.read_u64::<LittleEndian>().map_err(truncated(path))?;
        let n_records = cursor.read_u32::<LittleEndian>().map_err(truncated(path))?;
        let u_max = cursor.read_u16::<LittleEndian>().map_err(truncated(path))?;
        dict.insert(fingerprint, DictEntry { offset, length, n_records, u_max });
    }
    Ok(dict)
}

/// `path.skip`: per-list blocks of (first key, absolute offset) spans.
pub fn write_skips(path: &Path, blocks: &[(u64, Vec<(u64, u64)>)]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (fingerprint, spans) in blocks {
        writer.write_u64::<LittleEndian>(*fingerprint)?;
        writer.write_u32::<LittleEndian>(spans.len() as u32)?;
        for (first_key, offset) in spans {
            writer.write_u64::<LittleEndian>(*first_key)?;
            writer.write_u64::<LittleEndian>(*offset)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_skips(path: &Path) -> Result<FastMap8<u64, Vec<(u64, u64)>>> {
    let bytes = std::fs::read(path)?;
    let len = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes.as_slice());

    let mut skips = FastMap8::default();
    while cursor.position() < len {
        let fingerprint = cursor.read_u64::<LittleEndian>().map_err(truncated(path))?;
        let n = cursor.read_u32::<LittleEndian>().map_err(truncated(path))?;
        let mut spans = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let first_key = cursor.read_u64::<LittleEndian>().map_err(truncated(path))?;
            let offset = cursor.read_u64::<LittleEndian>().map_err(truncated(path))?;
            spans.push((first_key, offset));
        }
        skips.insert(fingerprint, spans);
    }
    Ok(skips)
}

/// `path.sym`: the full compared token sequence per fingerprint, so lookups
/// can tell hash collisions from matches.
pub fn write_syms(path: &Path, entries: &[(u64, PrefixKey)]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (fingerprint, key) in entries {
        writer.write_u64::<LittleEndian>(*fingerprint)?;
        writer.write_u8(key.kind.class())?;
        writer.write_u8(key.tokens.len() as u8)?;
        for token in &key.tokens {
            writer.write_u16::<LittleEndian>(*token)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_syms(path: &Path) -> Result<FastMap8<u64, PrefixKey>> {
    let bytes = std::fs::read(path)?;
    let len = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes.as_slice());

    let mut syms = FastMap8::default();
    while cursor.position() < len {
        let fingerprint = cursor.read_u64::<LittleEndian>().map_err(truncated(path))?;
        let class = cursor.read_u8().map_err(truncated(path))?;
        if class > 2 {
            return Err(corrupt(path, format!("invalid subpath kind {class}")));
        }
        let n = cursor.read_u8().map_err(truncated(path))?;
        let mut tokens = Vec::with_capacity(n as usize);
        for _ in 0..n {
            tokens.push(cursor.read_u16::<LittleEndian>().map_err(truncated(path))?);
        }
        syms.insert(fingerprint, PrefixKey { kind: SubpathKind::from_class(class), tokens });
    }
    Ok(syms)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MathStats {
    /// Total expressions indexed.
    pub n_tex: u64,
    /// Total sector-tree occurrences.
    pub n_sector_trees: u64,
    pub avg_doc_len: u32,
}

pub fn write_stats(path: &Path, stats: &MathStats) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_u64::<LittleEndian>(stats.n_tex)?;
    writer.write_u64::<LittleEndian>(stats.n_sector_trees)?;
    writer.write_u32::<LittleEndian>(stats.avg_doc_len)?;
    writer.flush()?;
    Ok(())
}

pub fn read_stats(path: &Path) -> Result<MathStats> {
    let bytes = std::fs::read(path)?;
    if bytes.len() != 20 {
        return Err(corrupt(path, format!("expected 20 bytes, found {}", bytes.len())));
    }
    let mut cursor = Cursor::new(bytes.as_slice());
    Ok(MathStats {
        n_tex: cursor.read_u64::<LittleEndian>().map_err(truncated(path))?,
        n_sector_trees: cursor.read_u64::<LittleEndian>().map_err(truncated(path))?,
        avg_doc_len: cursor.read_u32::<LittleEndian>().map_err(truncated(path))?,
    })
}
