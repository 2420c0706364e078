use super::{TaskStore, DEFAULT_TASK_TTL};
use crate::error::StoreError;
use crate::executor::types::{TaskId, TaskRecord};

use async_trait::async_trait;
use ::redis::aio::MultiplexedConnection;
use std::time::Duration;

/// Redis-backed task store.
///
/// Records are JSON strings under `task:{task_id}`, written with `SET ... EX` so
/// Redis evicts them after the TTL on its own.
#[derive(Clone)]
pub struct RedisTaskStore {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisTaskStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            ttl: DEFAULT_TASK_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let _: () = ::redis::cmd("SET")
            .arg(record.task_id.store_key())
            .arg(json)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = ::redis::cmd("GET")
            .arg(task_id.store_key())
            .query_async(&mut conn)
            .await?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
