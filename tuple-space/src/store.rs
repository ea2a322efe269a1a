//! The shared tuple space and its operation counters.
//!
//! A single `std::sync::Mutex` guards the map and the counters together, so
//! every operation updates both as one unit and the store is linearizable.
//! The lock is only taken inside the synchronous methods below and never held
//! across an `.await`.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use thiserror::Error;

use crate::protocol::char_len;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{key} does not exist")]
    NotFound { key: String },
    #[error("{key} already exists")]
    AlreadyExists { key: String },
}

/// Process-wide counters. Every field only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounters {
    pub clients: u64,
    pub operations: u64,
    pub reads: u64,
    pub gets: u64,
    pub puts: u64,
    pub errors: u64,
}

/// Point-in-time view of the store taken under a single lock window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub tuples: usize,
    pub avg_tuple_size: f64,
    pub avg_key_size: f64,
    pub avg_value_size: f64,
    #[serde(flatten)]
    pub counters: OperationCounters,
}

#[derive(Default)]
struct Inner {
    tuples: HashMap<String, String>,
    counters: OperationCounters,
}

#[derive(Default)]
pub struct TupleStore {
    inner: Mutex<Inner>,
}

impl TupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the value stored under `key`.
    pub fn read(&self, key: &str) -> Result<String, StoreError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.counters.operations += 1;

        match inner.tuples.get(key) {
            Some(value) => {
                inner.counters.reads += 1;
                Ok(value.clone())
            }
            None => {
                inner.counters.errors += 1;
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Removes `key` and returns the value it held.
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.counters.operations += 1;

        match inner.tuples.remove(key) {
            Some(value) => {
                inner.counters.gets += 1;
                Ok(value)
            }
            None => {
                inner.counters.errors += 1;
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Inserts the tuple unless `key` is already present.
    pub fn put(&self, key: String, value: String) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.counters.operations += 1;

        match inner.tuples.entry(key) {
            Entry::Occupied(entry) => {
                inner.counters.errors += 1;
                Err(StoreError::AlreadyExists {
                    key: entry.key().clone(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
                inner.counters.puts += 1;
                Ok(())
            }
        }
    }

    /// Counts a newly accepted connection and returns its 1-based number.
    pub fn register_client(&self) -> u64 {
        let mut inner = self.lock();
        inner.counters.clients += 1;
        inner.counters.clients
    }

    pub fn len(&self) -> usize {
        self.lock().tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> OperationCounters {
        self.lock().counters
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        let tuples = inner.tuples.len();
        let (key_chars, value_chars) = inner
            .tuples
            .iter()
            .fold((0usize, 0usize), |(keys, values), (key, value)| {
                (keys + char_len(key), values + char_len(value))
            });

        StatsSnapshot {
            tuples,
            avg_tuple_size: average(key_chars + value_chars, tuples),
            avg_key_size: average(key_chars, tuples),
            avg_value_size: average(value_chars, tuples),
            counters: inner.counters,
        }
    }

    // Nothing inside a critical section can panic halfway through an update,
    // so the data behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn average(total: usize, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}
