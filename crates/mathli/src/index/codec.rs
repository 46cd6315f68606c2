//! On-disk posting record layout. The byte format is contractual: all
//! integers little-endian, emitted field by field, never via struct packing.

use std::io::{self, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{pack_key, DocumentId, ExprId, NodeId, SymbolId};

pub const POST_MAGIC: &[u8; 8] = b"MI3\0POST";
pub const FOOTER_LEN: u64 = 16;

/// Records per skip span.
pub const SKIP_SPAN: usize = 16;

/// The indexed expression contained wildcard subpaths.
pub const FLAG_WILDCARD: u8 = 0b0000_0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSplit {
    pub symbol: SymbolId,
    pub weight: u16,
    pub leaves: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSector {
    pub root_id: NodeId,
    pub width: u16,
    pub ophash: u16,
    pub splits: Vec<RecordSplit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingRecord {
    pub doc: DocumentId,
    pub exp: ExprId,
    pub flags: u8,
    pub sectors: Vec<RecordSector>,
}

impl PostingRecord {
    pub fn key(&self) -> u64 {
        pack_key(self.doc, self.exp)
    }

    pub fn total_weight(&self) -> u32 {
        self.sectors.iter().flat_map(|s| &s.splits).map(|s| s.weight as u32).sum()
    }

    /// docID u32, expID u32, flags u8, n_sectors u8, per sector
    /// (root_id u16, width u16, ophash u16), n_splits u8 per sector, then
    /// per split (symbol u16, weight u16, leaves u64) in sector order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.doc)?;
        writer.write_u32::<LittleEndian>(self.exp)?;
        writer.write_u8(self.flags)?;
        writer.write_u8(self.sectors.len() as u8)?;
        for sector in &self.sectors {
            writer.write_u16::<LittleEndian>(sector.root_id)?;
            writer.write_u16::<LittleEndian>(sector.width)?;
            writer.write_u16::<LittleEndian>(sector.ophash)?;
        }
        for sector in &self.sectors {
            writer.write_u8(sector.splits.len() as u8)?;
        }
        for sector in &self.sectors {
            for split in &sector.splits {
                writer.write_u16::<LittleEndian>(split.symbol)?;
                writer.write_u16::<LittleEndian>(split.weight)?;
                writer.write_u64::<LittleEndian>(split.leaves)?;
            }
        }
        Ok(())
    }

    /// Decodes one record from the head of `bytes`, returning it with its
    /// encoded length. `None` means a truncated record.
    pub fn read_from(bytes: &[u8]) -> Option<(PostingRecord, usize)> {
        let mut cursor = io::Cursor::new(bytes);
        let record = Self::read_cursor(&mut cursor).ok()?;
        Some((record, cursor.position() as usize))
    }

    fn read_cursor(cursor: &mut io::Cursor<&[u8]>) -> io::Result<PostingRecord> {
        let doc = cursor.read_u32::<LittleEndian>()?;
        let exp = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u8()?;
        let n_sectors = cursor.read_u8()? as usize;

        let mut sectors = Vec::with_capacity(n_sectors);
        for _ in 0..n_sectors {
            let root_id = cursor.read_u16::<LittleEndian>()?;
            let width = cursor.read_u16::<LittleEndian>()?;
            let ophash = cursor.read_u16::<LittleEndian>()?;
            sectors.push(RecordSector { root_id, width, ophash, splits: Vec::new() });
        }

        let mut n_splits = Vec::with_capacity(n_sectors);
        for _ in 0..n_sectors {
            n_splits.push(cursor.read_u8()? as usize);
        }

        for (sector, n) in sectors.iter_mut().zip(n_splits) {
            sector.splits.reserve(n);
            for _ in 0..n {
                let symbol = cursor.read_u16::<LittleEndian>()?;
                let weight = cursor.read_u16::<LittleEndian>()?;
                let leaves = cursor.read_u64::<LittleEndian>()?;
                sector.splits.push(RecordSplit { symbol, weight, leaves });
            }
        }

        Ok(PostingRecord { doc, exp, flags, sectors })
    }
}
