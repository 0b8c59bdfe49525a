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

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ExchangeKey {
    peer: SocketAddr,
    message_id: u16,
}

#[derive(Debug, Clone)]
enum ExchangeState {
    InFlight,
    Completed(Bytes),
}

#[derive(Debug, Clone)]
struct CachedExchange {
    state: ExchangeState,
    stored_at: Instant,
}

impl CachedExchange {
    fn in_flight() -> Self {
        CachedExchange {
            state: ExchangeState::InFlight,
            stored_at: Instant::now(),
        }
    }
}

/// Outcome of [`ExchangeCache::begin`].
#[derive(Debug)]
pub enum Exchange<'a> {
    /// First copy of the request. The caller dispatches it and completes
    /// the reservation with the encoded response.
    New(ExchangeReservation<'a>),
    /// Same request is being processed by another worker.
    InFlight,
    /// Same request was already answered; these are the bytes sent back.
    Completed(Bytes),
}

/// Exchanges keyed by (peer, message id).
///
/// The first copy of a request reserves its key before dispatch, so a
/// retransmission that arrives while the first copy is still being processed
/// is not dispatched again, and one arriving afterwards within `lifetime` gets
/// the stored bytes back. A retried POST therefore never creates a second
/// record. When full, expired entries go first, then the oldest one.
#[derive(Debug)]
pub struct ExchangeCache {
    entries: DashMap<ExchangeKey, CachedExchange>,
    lifetime: Duration,
    max_entries: usize,
}

impl ExchangeCache {
    pub fn new(lifetime: Duration, max_entries: usize) -> Self {
        ExchangeCache {
            entries: DashMap::new(),
            lifetime,
            max_entries,
        }
    }

    pub fn begin(&self, peer: SocketAddr, message_id: u16) -> Exchange<'_> {
        let key = ExchangeKey { peer, message_id };
        if self.max_entries == 0 {
            return Exchange::New(ExchangeReservation::detached(self, key));
        }
        if !self.entries.contains_key(&key) {
            self.make_room();
        }

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().stored_at.elapsed() >= self.lifetime {
                    occupied.insert(CachedExchange::in_flight());
                    return Exchange::New(ExchangeReservation::new(self, key));
                }
                match &occupied.get().state {
                    ExchangeState::InFlight => {
                        debug!("exchange from {peer} mid={message_id} still in flight");
                        Exchange::InFlight
                    }
                    ExchangeState::Completed(encoded) => {
                        debug!("duplicate exchange from {peer} mid={message_id}");
                        Exchange::Completed(encoded.clone())
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedExchange::in_flight());
                Exchange::New(ExchangeReservation::new(self, key))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.lifetime);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!("purged {removed} expired exchanges");
        }
    }

    fn make_room(&self) {
        if self.entries.len() >= self.max_entries {
            self.purge_expired();
        }
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().stored_at)
            .map(|entry| *entry.key());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Holds the in-flight marker of a request until its response is stored.
/// Dropping it unfinished (encode failure, timeout) frees the key so a later
/// retransmission is dispatched normally.
#[derive(Debug)]
pub struct ExchangeReservation<'a> {
    cache: &'a ExchangeCache,
    key: ExchangeKey,
    done: bool,
}

impl<'a> ExchangeReservation<'a> {
    fn new(cache: &'a ExchangeCache, key: ExchangeKey) -> Self {
        ExchangeReservation {
            cache,
            key,
            done: false,
        }
    }

    fn detached(cache: &'a ExchangeCache, key: ExchangeKey) -> Self {
        ExchangeReservation {
            cache,
            key,
            done: true,
        }
    }

    pub fn complete(mut self, encoded: Bytes) {
        if self.done {
            return;
        }
        self.done = true;
        self.cache.entries.insert(
            self.key,
            CachedExchange {
                state: ExchangeState::Completed(encoded),
                stored_at: Instant::now(),
            },
        );
    }
}

impl Drop for ExchangeReservation<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.cache
            .entries
            .remove_if(&self.key, |_, entry| {
                matches!(entry.state, ExchangeState::InFlight)
            });
        trace!(
            "released unfinished exchange from {} mid={}",
            self.key.peer,
            self.key.message_id
        );
    }
}
