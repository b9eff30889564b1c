//! The local transaction journal: line-delimited hex-encoded RLP, replayed
//! at startup so locally submitted transactions survive restarts.

use alloy_rlp::{Decodable, Encodable};
use rbtp_primitives::{hex, TransactionSigned};
use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// The append-only journal of local transactions.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    writer: Option<File>,
}

impl Journal {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }

    /// Replays the journal, feeding each decoded transaction to `load`.
    /// Undecodable lines are skipped, not fatal.
    pub(crate) fn load(&self, mut load: impl FnMut(TransactionSigned)) -> std::io::Result<()> {
        if !self.path.exists() {
            return Ok(())
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut total = 0usize;
        let mut dropped = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue
            }
            total += 1;
            match hex::decode(line.trim()) {
                Ok(raw) => match TransactionSigned::decode(&mut raw.as_slice()) {
                    Ok(tx) => load(tx),
                    Err(_) => dropped += 1,
                },
                Err(_) => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!(target: "txpool", total, dropped, "Journal contained undecodable entries");
        } else {
            debug!(target: "txpool", total, "Replayed transaction journal");
        }
        Ok(())
    }

    /// Appends one transaction.
    pub(crate) fn insert(&mut self, tx: &TransactionSigned) -> std::io::Result<()> {
        if self.writer.is_none() {
            self.writer =
                Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        let writer = self.writer.as_mut().expect("opened above");
        let mut raw = Vec::new();
        tx.encode(&mut raw);
        writeln!(writer, "{}", hex::encode(raw))
    }

    /// Rewrites the journal with exactly the given transactions, dropping
    /// mined and evicted entries.
    pub(crate) fn rotate<'a>(
        &mut self,
        keep: impl Iterator<Item = &'a TransactionSigned>,
    ) -> std::io::Result<()> {
        self.writer = None;
        let mut file = File::create(&self.path)?;
        let mut kept = 0usize;
        for tx in keep {
            let mut raw = Vec::new();
            tx.encode(&mut raw);
            writeln!(file, "{}", hex::encode(raw))?;
            kept += 1;
        }
        file.sync_data()?;
        debug!(target: "txpool", kept, path = %self.path.display(), "Rotated transaction journal");
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
