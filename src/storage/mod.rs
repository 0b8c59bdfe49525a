// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Storage Module
//!
//! Keyed CRUD store for sensor readings. Request handlers only see the
//! `SensorStore` trait; every method is one atomic operation, the
//! implementation owns all locking.
//!
//! Ids are positive, allocated as one past the highest id ever handed out,
//! and never reused after a delete.

use std::collections::BTreeMap;

use chrono::Local;
use serde::{Deserialize, Serialize};

pub use json_store::JsonFileStore;
pub use memory_store::MemoryStore;

mod json_store;
mod memory_store;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("record {0} not found")]
    NotFound(u32),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt storage file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("record id space exhausted")]
    IdExhausted,
}

pub trait SensorStore: Send + Sync + 'static {
    /// Stores a new reading and returns its id.
    fn add(&self, value: &str) -> StorageResult<u32>;

    fn get(&self, id: u32) -> StorageResult<String>;

    fn update(&self, id: u32, value: &str) -> StorageResult<()>;

    fn delete(&self, id: u32) -> StorageResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub id: u32,
    pub ts: String,
    pub value: String,
}

impl SensorRecord {
    fn new(id: u32, value: &str) -> Self {
        SensorRecord {
            id,
            ts: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            value: value.to_owned(),
        }
    }
}

/// In-memory state shared by the store implementations.
#[derive(Debug, Default, Clone)]
pub(crate) struct StoreState {
    last_id: u32,
    records: BTreeMap<u32, SensorRecord>,
}

impl StoreState {
    pub(crate) fn from_records(last_id: u32, records: Vec<SensorRecord>) -> Self {
        let records: BTreeMap<u32, SensorRecord> =
            records.into_iter().map(|rec| (rec.id, rec)).collect();
        let max_id = records.keys().next_back().copied().unwrap_or(0);
        StoreState {
            last_id: last_id.max(max_id),
            records,
        }
    }

    pub(crate) fn last_id(&self) -> u32 {
        self.last_id
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &SensorRecord> {
        self.records.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn add(&mut self, value: &str) -> StorageResult<u32> {
        let id = self
            .last_id
            .checked_add(1)
            .ok_or(StorageError::IdExhausted)?;
        self.records.insert(id, SensorRecord::new(id, value));
        self.last_id = id;
        Ok(id)
    }

    /// Reverts the most recent `add`.
    pub(crate) fn undo_add(&mut self, id: u32) {
        self.records.remove(&id);
        self.last_id = id - 1;
    }

    pub(crate) fn get(&self, id: u32) -> StorageResult<String> {
        self.records
            .get(&id)
            .map(|rec| rec.value.clone())
            .ok_or(StorageError::NotFound(id))
    }

    /// Returns the replaced record.
    pub(crate) fn update(&mut self, id: u32, value: &str) -> StorageResult<SensorRecord> {
        let slot = self
            .records
            .get_mut(&id)
            .ok_or(StorageError::NotFound(id))?;
        Ok(std::mem::replace(slot, SensorRecord::new(id, value)))
    }

    pub(crate) fn delete(&mut self, id: u32) -> StorageResult<SensorRecord> {
        self.records.remove(&id).ok_or(StorageError::NotFound(id))
    }

    pub(crate) fn restore(&mut self, record: SensorRecord) {
        self.records.insert(record.id, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_not_reused_after_delete() {
        let mut state = StoreState::default();
        assert_eq!(state.add("1.0").unwrap(), 1);
        assert_eq!(state.add("2.0").unwrap(), 2);
        state.delete(2).unwrap();
        assert_eq!(state.add("3.0").unwrap(), 3);
    }

    #[test]
    fn test_from_records_tracks_max_id() {
        let state = StoreState::from_records(
            0,
            vec![SensorRecord::new(4, "a"), SensorRecord::new(9, "b")],
        );
        assert_eq!(state.last_id(), 9);

        let state = StoreState::from_records(12, vec![SensorRecord::new(4, "a")]);
        assert_eq!(state.last_id(), 12);
    }

    #[test]
    fn test_undo_add() {
        let mut state = StoreState::default();
        state.add("a").unwrap();
        let id = state.add("b").unwrap();
        state.undo_add(id);
        assert_eq!(state.len(), 1);
        assert_eq!(state.add("c").unwrap(), 2);
    }
}
