//! The cold tier: append-only files of finalized ancient blocks, keyed by
//! contiguous block number.

use crate::kv::io_err;
use rbtp_interfaces::provider::{ProviderError, ProviderResult};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// The freezer table names, one pair of data+index files each.
const TABLES: [&str; 5] = ["headers", "bodies", "receipts", "hashes", "diffs"];

/// Data tables of the freezer by position in its table array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FreezerTable {
    /// RLP encoded headers.
    Headers = 0,
    /// RLP encoded bodies.
    Bodies = 1,
    /// RLP encoded receipt lists.
    Receipts = 2,
    /// Canonical block hashes.
    Hashes = 3,
    /// RLP encoded total difficulties.
    Diffs = 4,
}

/// One append-only table: a data file of concatenated blobs plus an index
/// file of cumulative big-endian `u64` end offsets.
#[derive(Debug)]
struct Table {
    data: File,
    index: File,
    /// `offsets[i]` is the end of item `i` in the data file.
    offsets: Vec<u64>,
}

impl Table {
    fn open(dir: &Path, name: &str) -> ProviderResult<Self> {
        let open = |path: PathBuf| {
            OpenOptions::new().read(true).append(true).create(true).open(path).map_err(io_err)
        };
        let data = open(dir.join(format!("{name}.dat")))?;
        let mut index = open(dir.join(format!("{name}.idx")))?;

        let mut raw = Vec::new();
        index.read_to_end(&mut raw).map_err(io_err)?;
        if raw.len() % 8 != 0 {
            return Err(ProviderError::Freezer(format!("truncated index for table {name}")))
        }
        let offsets =
            raw.chunks_exact(8).map(|c| u64::from_be_bytes(c.try_into().expect("8 bytes"))).collect();

        Ok(Self { data, index, offsets })
    }

    fn len(&self) -> u64 {
        self.offsets.len() as u64
    }

    fn append(&mut self, blob: &[u8]) -> ProviderResult<()> {
        self.data.write_all(blob).map_err(io_err)?;
        let end = self.offsets.last().copied().unwrap_or(0) + blob.len() as u64;
        self.index.write_all(&end.to_be_bytes()).map_err(io_err)?;
        self.offsets.push(end);
        Ok(())
    }

    fn get(&mut self, id: u64) -> ProviderResult<Option<Vec<u8>>> {
        let Some(&end) = self.offsets.get(id as usize) else { return Ok(None) };
        let start = if id == 0 { 0 } else { self.offsets[id as usize - 1] };
        let mut blob = vec![0u8; (end - start) as usize];
        self.data.seek(SeekFrom::Start(start)).map_err(io_err)?;
        self.data.read_exact(&mut blob).map_err(io_err)?;
        Ok(Some(blob))
    }

    fn sync(&mut self) -> ProviderResult<()> {
        self.data.sync_data().map_err(io_err)?;
        self.index.sync_data().map_err(io_err)
    }
}

/// The ancient store. Items are strictly contiguous from block zero; all
/// tables always hold the same number of items.
#[derive(Debug)]
pub struct Freezer {
    tables: Vec<Table>,
}

impl Freezer {
    /// Opens (or creates) the freezer in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> ProviderResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(io_err)?;
        let tables = TABLES.iter().map(|name| Table::open(dir, name)).collect::<Result<_, _>>()?;
        let freezer = Self { tables };

        let lens: Vec<u64> = freezer.tables.iter().map(Table::len).collect();
        if lens.windows(2).any(|w| w[0] != w[1]) {
            return Err(ProviderError::Freezer(format!("uneven freezer tables: {lens:?}")))
        }
        Ok(freezer)
    }

    /// Number of frozen blocks; block numbers `0..frozen()` are ancient.
    pub fn frozen(&self) -> u64 {
        self.tables[0].len()
    }

    pub(crate) fn append(
        &mut self,
        number: u64,
        header: &[u8],
        body: &[u8],
        receipts: &[u8],
        hash: &[u8],
        td: &[u8],
    ) -> ProviderResult<()> {
        if number != self.frozen() {
            return Err(ProviderError::Freezer(format!(
                "non-contiguous freeze: got block {number}, expected {}",
                self.frozen()
            )))
        }
        let blobs = [header, body, receipts, hash, td];
        for (table, blob) in self.tables.iter_mut().zip(blobs) {
            table.append(blob)?;
        }
        Ok(())
    }

    pub(crate) fn get(&mut self, table: FreezerTable, number: u64) -> ProviderResult<Option<Vec<u8>>> {
        self.tables[table as usize].get(number)
    }

    pub(crate) fn sync(&mut self) -> ProviderResult<()> {
        for table in &mut self.tables {
            table.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = Freezer::open(dir.path()).unwrap();
        assert_eq!(freezer.frozen(), 0);

        freezer.append(0, b"h0", b"b0", b"r0", b"x0", b"t0").unwrap();
        freezer.append(1, b"h1", b"b1", b"r1", b"x1", b"t1").unwrap();
        assert_eq!(freezer.frozen(), 2);

        assert_eq!(freezer.get(FreezerTable::Headers, 0).unwrap(), Some(b"h0".to_vec()));
        assert_eq!(freezer.get(FreezerTable::Bodies, 1).unwrap(), Some(b"b1".to_vec()));
        assert_eq!(freezer.get(FreezerTable::Diffs, 1).unwrap(), Some(b"t1".to_vec()));
        assert_eq!(freezer.get(FreezerTable::Headers, 2).unwrap(), None);
    }

    #[test]
    fn rejects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = Freezer::open(dir.path()).unwrap();
        assert!(freezer.append(3, b"", b"", b"", b"", b"").is_err());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut freezer = Freezer::open(dir.path()).unwrap();
            freezer.append(0, b"header", b"body", b"receipts", b"hash", b"td").unwrap();
            freezer.sync().unwrap();
        }
        let mut reopened = Freezer::open(dir.path()).unwrap();
        assert_eq!(reopened.frozen(), 1);
        assert_eq!(reopened.get(FreezerTable::Headers, 0).unwrap(), Some(b"header".to_vec()));
    }
}
