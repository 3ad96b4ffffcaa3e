//! Optional write-ahead log. Off by default (see `Config::wal_path`); when
//! configured, every insert/delete is appended here before it reaches the
//! MemTable, and `Engine::recover_from` replays it on startup.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use thiserror::Error;

use crate::kv::Entry;

#[derive(Error, Debug)]
pub enum WalError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt WAL record: {line:?}")]
    Corrupt {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

type Result<T> = std::result::Result<T, WalError>;

pub struct Wal {
    file: File,
}

impl Wal {
    pub fn new(file: File) -> Self {
        Wal { file }
    }

    pub fn append(&mut self, entry: &Entry) -> Result<()> {
        let line = serde_json::to_string(entry).map_err(|source| WalError::Corrupt {
            line: format!("{entry:?}"),
            source,
        })?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }

    /// Replays every record from the start of the log, in write order.
    pub fn read_from_start(&self) -> Result<Vec<Entry>> {
        let reader = BufReader::new(&self.file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line)
                .map_err(|source| WalError::Corrupt { line: line.clone(), source })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub(crate) fn into_file(self) -> File {
        self.file
    }
}
