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

use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{SensorRecord, SensorStore, StorageResult, StoreState};

/// On-disk layout. A bare array of records is what older data files contain;
/// it is still accepted on load and rewritten in the current layout on the
/// next mutation.
#[derive(Deserialize)]
#[serde(untagged)]
enum DataFile {
    Current {
        last_id: u32,
        records: Vec<SensorRecord>,
    },
    Legacy(Vec<SensorRecord>),
}

#[derive(Serialize)]
struct DataFileRef<'a> {
    last_id: u32,
    records: Vec<&'a SensorRecord>,
}

/// Sensor readings kept in memory and mirrored to a JSON file.
///
/// The file is read once in `open` and rewritten (temp file + rename) after
/// every mutation while the write lock is held, so the file always matches
/// the state readers can observe. A mutation whose flush fails is rolled
/// back.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    /// Opens the data file, creating an empty one if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<JsonFileStore> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let state = if contents.trim().is_empty() {
            StoreState::default()
        } else {
            match serde_json::from_str::<DataFile>(&contents)? {
                DataFile::Current { last_id, records } => {
                    StoreState::from_records(last_id, records)
                }
                DataFile::Legacy(records) => StoreState::from_records(0, records),
            }
        };
        info!(
            "opened sensor store {} with {} records, last id {}",
            path.display(),
            state.len(),
            state.last_id()
        );

        let store = JsonFileStore {
            path,
            state: RwLock::new(state),
        };
        store.flush(&store.state.read())?;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&self, state: &StoreState) -> StorageResult<()> {
        let snapshot = DataFileRef {
            last_id: state.last_id(),
            records: state.records().collect(),
        };
        let contents = serde_json::to_string_pretty(&snapshot)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, contents.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        debug!("flushed {} records to {}", state.len(), self.path.display());
        Ok(())
    }
}

impl SensorStore for JsonFileStore {
    fn add(&self, value: &str) -> StorageResult<u32> {
        let mut state = self.state.write();
        let id = state.add(value)?;
        if let Err(e) = self.flush(&state) {
            state.undo_add(id);
            return Err(e);
        }
        Ok(id)
    }

    fn get(&self, id: u32) -> StorageResult<String> {
        self.state.read().get(id)
    }

    fn update(&self, id: u32, value: &str) -> StorageResult<()> {
        let mut state = self.state.write();
        let previous = state.update(id, value)?;
        if let Err(e) = self.flush(&state) {
            state.restore(previous);
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, id: u32) -> StorageResult<()> {
        let mut state = self.state.write();
        let removed = state.delete(id)?;
        if let Err(e) = self.flush(&state) {
            state.restore(removed);
            return Err(e);
        }
        Ok(())
    }
}
