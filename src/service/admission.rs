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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use super::{AppError, AppResult};

/// Bounds the number of requests being processed at once.
///
/// `admit` waits until a slot is free; the slot is handed back when the
/// returned `AdmissionSlot` is dropped or passed to `release`. Clones share
/// the same bound.
#[derive(Debug, Clone)]
pub struct ConcurrencyManager {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    bound: usize,
}

/// Proof of admission. Holding one counts as one in-flight request.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        trace!("released admission slot, {} in flight", previous - 1);
    }
}

impl ConcurrencyManager {
    pub fn new(max_concurrent: usize) -> Self {
        ConcurrencyManager {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            bound: max_concurrent,
        }
    }

    pub async fn admit(&self) -> AppResult<AdmissionSlot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::IllegalStateError("admission semaphore closed".to_string()))?;
        Ok(self.slot(permit))
    }

    /// Admits only if a slot is free right now.
    pub fn try_admit(&self) -> Option<AdmissionSlot> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.slot(permit))
    }

    pub fn release(&self, slot: AdmissionSlot) {
        drop(slot);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    fn slot(&self, permit: OwnedSemaphorePermit) -> AdmissionSlot {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        AdmissionSlot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;

    use super::*;

    #[tokio::test]
    async fn test_bound_holds() {
        let manager = ConcurrencyManager::new(2);
        let first = manager.admit().await.unwrap();
        let _second = manager.admit().await.unwrap();
        assert_eq!(manager.in_flight(), 2);
        assert_eq!(manager.available(), 0);
        assert!(manager.try_admit().is_none());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.admit().await.map(|_| ()) })
        };
        time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        manager.release(first);
        time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        // the waiter dropped its slot on return
        assert_eq!(manager.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_slot_drop_releases() {
        let manager = ConcurrencyManager::new(1);
        {
            let _slot = manager.try_admit().unwrap();
            assert_eq!(manager.in_flight(), 1);
        }
        assert_eq!(manager.in_flight(), 0);
        assert_eq!(manager.available(), manager.bound());
    }
}
