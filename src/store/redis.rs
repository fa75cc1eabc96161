//! Redis-backed shared store.

use std::future::Future;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::Value;
use async_trait::async_trait;

use super::{Command, Pipeline, Reply, SharedStore, StoreError};

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 200;

/// Shared store backed by Redis with automatic reconnection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect and verify the server answers PING.
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        let conn = with_timeout(op_timeout, ConnectionManager::new(client)).await??;
        let store = Self { conn, op_timeout };
        store.ping().await?;
        tracing::info!(url = %redact(url), "Connected to shared store");
        Ok(store)
    }

    fn build(pipeline: &Pipeline) -> ::redis::Pipeline {
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for command in pipeline.commands() {
            match command {
                Command::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
                Command::Set { key, value, ttl } => {
                    let cmd = pipe.cmd("SET").arg(key).arg(value.as_slice());
                    if let Some(ttl) = ttl {
                        cmd.arg("PX").arg(millis(*ttl));
                    }
                }
                Command::Del { keys } => {
                    pipe.cmd("DEL").arg(keys);
                }
                Command::Incr { key } => {
                    pipe.cmd("INCR").arg(key);
                }
                Command::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl));
                }
                Command::ZRemRangeByScore { key, min, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg(*min).arg(*max);
                }
                Command::ZCard { key } => {
                    pipe.cmd("ZCARD").arg(key);
                }
                Command::ZAdd { key, score, member } => {
                    pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
                }
            }
        }
        pipe
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>, StoreError> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }
        let pipe = Self::build(&pipeline);
        let mut conn = self.conn.clone();
        let values: Vec<Value> = with_timeout(self.op_timeout, pipe.query_async(&mut conn)).await??;
        values.into_iter().map(to_reply).collect()
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let cmd = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .to_owned();
            let (next, batch): (u64, Vec<String>) =
                with_timeout(self.op_timeout, cmd.query_async(&mut conn)).await??;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let cmd = ::redis::cmd("PING");
        let _: String = with_timeout(self.op_timeout, cmd.query_async(&mut conn)).await??;
        Ok(())
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))
}

fn to_reply(value: Value) -> Result<Reply, StoreError> {
    match value {
        Value::Nil => Ok(Reply::Nil),
        Value::Okay => Ok(Reply::Ok),
        Value::Int(i) => Ok(Reply::Int(i)),
        Value::BulkString(bytes) => Ok(Reply::Bytes(bytes)),
        Value::SimpleString(s) => Ok(Reply::Bytes(s.into_bytes())),
        other => Err(StoreError::UnexpectedReply(format!("{other:?}"))),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Hide credentials embedded in a connection URL before logging it.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<invalid url>".to_string(),
    }
}
