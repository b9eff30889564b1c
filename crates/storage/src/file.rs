//! The file-backed hot tier: a write-through cache over a log-structured
//! backend.
//!
//! Every mutation is appended to a single log as a CRC-framed batch before
//! the in-memory view changes, so a crash can only cost the trailing
//! unsynced batch, never half of one. Reopening replays the log and drops a
//! torn tail; [`FileStore::compact`] rewrites the log from the live view.

use crate::kv::{io_err, BatchOp, KeyValueStore, MemoryStore};
use parking_lot::Mutex;
use rbtp_interfaces::provider::ProviderResult;
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const PUT_TAG: u8 = 0;
const DELETE_TAG: u8 = 1;

/// Length and checksum framing one batch in the log.
const FRAME_HEADER: usize = 8;

/// A durable [`KeyValueStore`]: an append-only record log under one path,
/// fronted by the full key space in memory.
#[derive(Debug)]
pub struct FileStore {
    map: MemoryStore,
    log: Mutex<File>,
    path: PathBuf,
}

impl FileStore {
    /// Opens (or creates) the store at `path`, replaying the log into the
    /// in-memory view. A torn tail left by a crash is truncated away, which
    /// rolls the store back to the last fully written batch.
    pub fn open(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut raw = Vec::new();
        {
            let mut reader = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)
                .map_err(io_err)?;
            reader.read_to_end(&mut raw).map_err(io_err)?;
        }

        let map = MemoryStore::new();
        let mut cursor = 0usize;
        loop {
            let Some((ops, consumed)) = read_frame(&raw[cursor..]) else { break };
            map.write_batch(ops)?;
            cursor += consumed;
        }

        if cursor < raw.len() {
            warn!(
                target: "storage",
                dropped = raw.len() - cursor,
                path = %path.display(),
                "Dropping torn batch at the end of the store log"
            );
            let file = OpenOptions::new().write(true).open(&path).map_err(io_err)?;
            file.set_len(cursor as u64).map_err(io_err)?;
            file.sync_data().map_err(io_err)?;
        }

        let log = OpenOptions::new().append(true).open(&path).map_err(io_err)?;
        debug!(target: "storage", entries = map.len(), path = %path.display(), "Opened store log");
        Ok(Self { map, log: Mutex::new(log), path })
    }

    /// Rewrites the log as one snapshot batch of the live view, shedding
    /// every superseded record.
    pub fn compact(&self) -> ProviderResult<()> {
        let snapshot: Vec<BatchOp> = {
            let entries = self.map.entries();
            entries.into_iter().map(|(key, value)| BatchOp::Put(key, value)).collect()
        };

        let tmp = self.path.with_extension("compact");
        {
            let mut file = File::create(&tmp).map_err(io_err)?;
            file.write_all(&encode_frame(&snapshot)).map_err(io_err)?;
            file.sync_data().map_err(io_err)?;
        }

        // swap the log under the write lock so no append lands in between
        let mut log = self.log.lock();
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        *log = OpenOptions::new().append(true).open(&self.path).map_err(io_err)?;
        debug!(target: "storage", path = %self.path.display(), "Compacted store log");
        Ok(())
    }

    fn append(&self, ops: &[BatchOp]) -> ProviderResult<()> {
        let frame = encode_frame(ops);
        let mut log = self.log.lock();
        log.write_all(&frame).map_err(io_err)?;
        log.sync_data().map_err(io_err)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &[u8]) -> ProviderResult<Option<Vec<u8>>> {
        self.map.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> ProviderResult<()> {
        self.append(&[BatchOp::Put(key.to_vec(), value.to_vec())])?;
        self.map.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> ProviderResult<()> {
        self.append(&[BatchOp::Delete(key.to_vec())])?;
        self.map.delete(key)
    }

    fn write_batch(&self, batch: Vec<BatchOp>) -> ProviderResult<()> {
        // durable first, visible second
        self.append(&batch)?;
        self.map.write_batch(batch)
    }
}

/// `len ++ crc32 ++ records`, records being `tag ++ key_len ++ value_len ++
/// key ++ value`.
fn encode_frame(ops: &[BatchOp]) -> Vec<u8> {
    let mut payload = Vec::new();
    for op in ops {
        match op {
            BatchOp::Put(key, value) => {
                payload.push(PUT_TAG);
                payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
                payload.extend_from_slice(&(value.len() as u32).to_be_bytes());
                payload.extend_from_slice(key);
                payload.extend_from_slice(value);
            }
            BatchOp::Delete(key) => {
                payload.push(DELETE_TAG);
                payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
                payload.extend_from_slice(&0u32.to_be_bytes());
                payload.extend_from_slice(key);
            }
        }
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Parses one frame off the front of `raw`; `None` on a short or corrupt
/// tail.
fn read_frame(raw: &[u8]) -> Option<(Vec<BatchOp>, usize)> {
    if raw.len() < FRAME_HEADER {
        return None
    }
    let len = u32::from_be_bytes(raw[0..4].try_into().expect("4 bytes")) as usize;
    let crc = u32::from_be_bytes(raw[4..8].try_into().expect("4 bytes"));
    let payload = raw.get(FRAME_HEADER..FRAME_HEADER + len)?;
    if crc32fast::hash(payload) != crc {
        return None
    }

    let mut ops = Vec::new();
    let mut cursor = 0usize;
    while cursor < payload.len() {
        let tag = *payload.get(cursor)?;
        let key_len =
            u32::from_be_bytes(payload.get(cursor + 1..cursor + 5)?.try_into().ok()?) as usize;
        let value_len =
            u32::from_be_bytes(payload.get(cursor + 5..cursor + 9)?.try_into().ok()?) as usize;
        cursor += 9;
        let key = payload.get(cursor..cursor + key_len)?.to_vec();
        cursor += key_len;
        match tag {
            PUT_TAG => {
                let value = payload.get(cursor..cursor + value_len)?.to_vec();
                cursor += value_len;
                ops.push(BatchOp::Put(key, value));
            }
            DELETE_TAG => ops.push(BatchOp::Delete(key)),
            _ => return None,
        }
    }
    Some((ops, FRAME_HEADER + len))
}
