//! The unit of storage: a single key-value record as it appears both in the
//! MemTable and, JSON-encoded, as one line of a segment file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

#[derive(Error, Debug)]
pub enum EntryError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
