//! In-process store with the same semantics as the Redis backend.
//!
//! Used for single-instance deployments and tests. A pipeline runs under one
//! lock, which gives it the same all-or-nothing visibility as MULTI/EXEC.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{glob_match, Command, Pipeline, Reply, SharedStore, StoreError};

/// Expired keys are purged once every this many pipelines.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Sorted(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A thread-safe in-memory [`SharedStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    ops: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key, as a store restart would.
    pub fn flush(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn apply(entries: &mut HashMap<String, Entry>, command: &Command, now: Instant) -> Result<Reply, StoreError> {
        match command {
            Command::Get { key } => match live(entries, key, now) {
                None => Ok(Reply::Nil),
                Some(Entry { value: Value::Bytes(b), .. }) => Ok(Reply::Bytes(b.clone())),
                Some(_) => Err(StoreError::WrongType { key: key.clone() }),
            },
            Command::Set { key, value, ttl } => {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Bytes(value.clone()),
                        expires_at: ttl.map(|t| now + t),
                    },
                );
                Ok(Reply::Ok)
            }
            Command::Del { keys } => {
                let mut removed = 0;
                for key in keys {
                    if let Some(entry) = entries.remove(key) {
                        if !entry.is_expired(now) {
                            removed += 1;
                        }
                    }
                }
                Ok(Reply::Int(removed))
            }
            Command::Incr { key } => {
                let current = match live(entries, key, now) {
                    None => 0,
                    Some(Entry { value: Value::Bytes(b), .. }) => Reply::Bytes(b.clone())
                        .as_int()
                        .ok_or_else(|| StoreError::NotAnInteger { key: key.clone() })?,
                    Some(_) => return Err(StoreError::WrongType { key: key.clone() }),
                };
                let next = current + 1;
                let expires_at = live(entries, key, now).and_then(|e| e.expires_at);
                entries.insert(
                    key.clone(),
                    Entry {
                        value: Value::Bytes(next.to_string().into_bytes()),
                        expires_at,
                    },
                );
                Ok(Reply::Int(next))
            }
            Command::Expire { key, ttl } => match live_mut(entries, key, now) {
                None => Ok(Reply::Int(0)),
                Some(entry) => {
                    entry.expires_at = Some(now + *ttl);
                    Ok(Reply::Int(1))
                }
            },
            Command::ZRemRangeByScore { key, min, max } => match live_mut(entries, key, now) {
                None => Ok(Reply::Int(0)),
                Some(Entry { value: Value::Sorted(members), .. }) => {
                    let before = members.len();
                    members.retain(|_, score| *score < *min || *score > *max);
                    Ok(Reply::Int((before - members.len()) as i64))
                }
                Some(_) => Err(StoreError::WrongType { key: key.clone() }),
            },
            Command::ZCard { key } => match live(entries, key, now) {
                None => Ok(Reply::Int(0)),
                Some(Entry { value: Value::Sorted(members), .. }) => Ok(Reply::Int(members.len() as i64)),
                Some(_) => Err(StoreError::WrongType { key: key.clone() }),
            },
            Command::ZAdd { key, score, member } => {
                if live(entries, key, now).is_none() {
                    entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Sorted(HashMap::new()),
                            expires_at: None,
                        },
                    );
                }
                match entries.get_mut(key) {
                    Some(Entry { value: Value::Sorted(members), .. }) => {
                        let added = members.insert(member.clone(), *score).is_none();
                        Ok(Reply::Int(i64::from(added)))
                    }
                    _ => Err(StoreError::WrongType { key: key.clone() }),
                }
            }
        }
    }
}

fn touched_keys(command: &Command) -> Vec<&str> {
    match command {
        Command::Del { keys } => keys.iter().map(String::as_str).collect(),
        Command::Get { key }
        | Command::Set { key, .. }
        | Command::Incr { key }
        | Command::Expire { key, .. }
        | Command::ZRemRangeByScore { key, .. }
        | Command::ZCard { key }
        | Command::ZAdd { key, .. } => vec![key.as_str()],
    }
}

fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a Entry> {
    entries.get(key).filter(|e| !e.is_expired(now))
}

fn live_mut<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    entries.get_mut(key).filter(|e| !e.is_expired(now))
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        // Snapshot touched keys so a failing command leaves nothing half-applied.
        let snapshot: Vec<(String, Option<Entry>)> = pipeline
            .commands()
            .iter()
            .flat_map(touched_keys)
            .map(|k| (k.to_string(), entries.get(k).cloned()))
            .collect();

        let mut replies = Vec::with_capacity(pipeline.len());
        for command in pipeline.commands() {
            match Self::apply(&mut entries, command, now) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    for (key, previous) in snapshot.into_iter().rev() {
                        match previous {
                            Some(entry) => entries.insert(key, entry),
                            None => entries.remove(&key),
                        };
                    }
                    return Err(e);
                }
            }
        }

        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == 0 {
            entries.retain(|_, e| !e.is_expired(now));
        }
        Ok(replies)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Remaining TTL helper for tests and diagnostics.
impl MemoryStore {
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        live(&entries, key, now)?
            .expires_at
            .map(|at| at.saturating_duration_since(now))
    }
}
