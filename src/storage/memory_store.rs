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

use parking_lot::RwLock;

use super::{SensorStore, StorageResult, StoreState};

/// Non-persistent store, used for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SensorStore for MemoryStore {
    fn add(&self, value: &str) -> StorageResult<u32> {
        self.state.write().add(value)
    }

    fn get(&self, id: u32) -> StorageResult<String> {
        self.state.read().get(id)
    }

    fn update(&self, id: u32, value: &str) -> StorageResult<()> {
        self.state.write().update(id, value).map(|_| ())
    }

    fn delete(&self, id: u32) -> StorageResult<()> {
        self.state.write().delete(id).map(|_| ())
    }
}
