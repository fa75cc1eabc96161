//! Shared state client.
//!
//! # Data Flow
//! ```text
//! circuit breaker / retry metrics / rate limiter / caches
//!     → Pipeline (typed commands, executed atomically)
//!     → SharedStore::exec
//!         → redis.rs  (MULTI/EXEC against a shared Redis)
//!         → memory.rs (single-lock, in-process)
//! ```
//!
//! # Design Decisions
//! - The store is the single source of truth for cross-instance state
//! - Check-then-act sequences on one key are one atomic pipeline
//! - Callers own their fail-open policy; the store only reports errors

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Key namespaces shared by every gateway replica.
pub mod keys {
    pub const CIRCUIT_PREFIX: &str = "circuit:";
    pub const RETRY_METRICS_PREFIX: &str = "retry:metrics:";
    pub const RATE_LIMIT_PREFIX: &str = "ratelimit:";
    pub const QUERY_CACHE_PREFIX: &str = "gql:query:";
    pub const SCHEMA_CACHE_PREFIX: &str = "gql:schema:";
    pub const SUBGRAPH_STATUS_PREFIX: &str = "gql:subgraph:status:";
}

/// Errors reported by a [`SharedStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("value at '{key}' is not an integer")]
    NotAnInteger { key: String },

    #[error("value at '{key}' holds the wrong kind of data")]
    WrongType { key: String },

    #[error("unexpected reply from store: {0}")]
    UnexpectedReply(String),
}

/// A single store command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: Vec<u8>, ttl: Option<Duration> },
    Del { keys: Vec<String> },
    Incr { key: String },
    Expire { key: String, ttl: Duration },
    /// Remove sorted-set members whose score is within `[min, max]`.
    ZRemRangeByScore { key: String, min: i64, max: i64 },
    ZCard { key: String },
    ZAdd { key: String, score: i64, member: String },
}

/// Reply to one [`Command`], positionally matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Bytes(Vec<u8>),
}

impl Reply {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Reply::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Integer view of the reply; stored counters come back as strings.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(i) => Some(*i),
            Reply::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }
}

/// An ordered batch of commands executed as one atomic unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.commands.push(Command::Get { key: key.into() });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Option<Duration>) -> Self {
        self.commands.push(Command::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn del(mut self, keys: Vec<String>) -> Self {
        self.commands.push(Command::Del { keys });
        self
    }

    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.commands.push(Command::Incr { key: key.into() });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(Command::Expire { key: key.into(), ttl });
        self
    }

    pub fn zrem_range_by_score(mut self, key: impl Into<String>, min: i64, max: i64) -> Self {
        self.commands.push(Command::ZRemRangeByScore {
            key: key.into(),
            min,
            max,
        });
        self
    }

    pub fn zcard(mut self, key: impl Into<String>) -> Self {
        self.commands.push(Command::ZCard { key: key.into() });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, score: i64, member: impl Into<String>) -> Self {
        self.commands.push(Command::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        });
        self
    }
}

/// External key-value store shared by all gateway replicas.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Execute every command of the pipeline atomically, returning one reply per command.
    async fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, StoreError>;

    /// List keys matching a glob pattern (`*`, `?`).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let reply = single(self.exec(Pipeline::new().get(key)).await?)?;
        Ok(reply.into_bytes())
    }

    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.get(key).await? {
            None => Ok(None),
            Some(bytes) => Reply::Bytes(bytes)
                .as_int()
                .map(Some)
                .ok_or_else(|| StoreError::NotAnInteger { key: key.to_string() }),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.exec(Pipeline::new().set(key, value, ttl)).await?;
        Ok(())
    }

    async fn del(&self, keys: Vec<String>) -> Result<i64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let reply = single(self.exec(Pipeline::new().del(keys)).await?)?;
        Ok(reply.as_int().unwrap_or(0))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.exec(Pipeline::new().expire(key, ttl)).await?;
        Ok(())
    }

    /// Atomically increment a counter and (re)arm its TTL, returning the new value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let replies = self.exec(Pipeline::new().incr(key).expire(key, ttl)).await?;
        replies
            .first()
            .and_then(Reply::as_int)
            .ok_or_else(|| StoreError::UnexpectedReply(format!("INCR {key}")))
    }
}

fn single(replies: Vec<Reply>) -> Result<Reply, StoreError> {
    replies
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::UnexpectedReply("empty pipeline reply".into()))
}

/// Glob match with `*` (any run) and `?` (any single char), as used by SCAN MATCH.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    let (mut pi, mut ci) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ci < c.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == c[ci]) {
            pi += 1;
            ci += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ci));
            pi += 1;
        } else if let Some((sp, sc)) = star {
            pi = sp + 1;
            ci = sc + 1;
            star = Some((sp, sc + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("gql:query:*", "gql:query:abc"));
        assert!(glob_match("*", ""));
        assert!(glob_match("circuit:?:state", "circuit:a:state"));
        assert!(!glob_match("circuit:?:state", "circuit:ab:state"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("gql:schema:*", "gql:query:abc"));
    }

    #[test]
    fn test_reply_integer_view() {
        assert_eq!(Reply::Int(4).as_int(), Some(4));
        assert_eq!(Reply::Bytes(b"17".to_vec()).as_int(), Some(17));
        assert_eq!(Reply::Bytes(b"x".to_vec()).as_int(), None);
        assert_eq!(Reply::Nil.as_int(), None);
    }
}
