//! SQLite 持久化策略
//!
//! 后台 SET 钩子把每次写入追加到 `state_history` 表（在 blocking 线程上执行）；
//! `latest_values` 读取每个字段最后一次写入的值，可作为新实例的初始值。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::core::PolicyError;
use crate::state::{Event, Policy, PolicyResult};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS state_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    recorded_at TEXT NOT NULL
)";

#[derive(Clone)]
pub struct SqlitePolicy {
    agent: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePolicy {
    /// 打开（或创建）数据库文件；agent 用于区分同一库中的多个 Agent
    pub fn open(path: impl AsRef<Path>, agent: impl Into<String>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, agent)
    }

    pub fn in_memory(agent: impl Into<String>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, agent)
    }

    fn with_connection(conn: Connection, agent: impl Into<String>) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            agent: agent.into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 某字段最后一次持久化的值
    pub fn latest(&self, field: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM state_history WHERE agent = ?1 AND field = ?2 ORDER BY id DESC LIMIT 1",
                params![self.agent, field],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// 每个字段最后一次持久化的值
    pub fn latest_values(&self) -> Result<HashMap<String, Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT field, value FROM state_history
             WHERE id IN (SELECT MAX(id) FROM state_history WHERE agent = ?1 GROUP BY field)",
        )?;
        let rows = stmt.query_map(params![self.agent], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut values: HashMap<String, Value> = HashMap::new();
        for row in rows {
            let (field, raw) = row?;
            values.insert(field, serde_json::from_str(&raw)?);
        }
        Ok(values)
    }

    pub fn count(&self, field: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM state_history WHERE agent = ?1 AND field = ?2",
            params![self.agent, field],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[async_trait]
impl Policy for SqlitePolicy {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn background_set(&self, event: &Event, value: &Value) -> PolicyResult {
        let conn = self.conn.clone();
        let agent = self.agent.clone();
        let field = event.name.clone();
        let raw = value.to_string();
        let recorded_at = event.timestamp.to_rfc3339();

        tokio::task::spawn_blocking(move || {
            conn.lock().execute(
                "INSERT INTO state_history (agent, field, value, recorded_at) VALUES (?1, ?2, ?3, ?4)",
                params![agent, field, raw, recorded_at],
            )
        })
        .await
        .map_err(|e| PolicyError::Failed(e.to_string()))?
        .map_err(|e| PolicyError::Failed(e.to_string()))?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::{FieldType, PromptTemplates, StateField, StateSchema, StateStore};

    #[tokio::test]
    async fn test_writes_are_persisted_and_restorable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let policy = SqlitePolicy::open(&path, "counter").unwrap();

        let schema = StateSchema::new()
            .with(StateField::new("count", FieldType::Integer).default(json!(0)).policy(policy.clone()))
            .with(StateField::new("label", FieldType::String).default(json!("")).policy(policy.clone()));
        let store = StateStore::new(schema.clone(), PromptTemplates::default());
        store.set("count", json!(1)).unwrap();
        store.set("count", json!(2)).unwrap();
        store.set("label", json!("two")).unwrap();
        store.drain().await;

        assert_eq!(policy.count("count").unwrap(), 2);
        assert_eq!(policy.latest("count").unwrap(), Some(json!(2)));
        assert_eq!(policy.latest("missing").unwrap(), None);

        let reopened = SqlitePolicy::open(&path, "counter").unwrap();
        let restored = StateStore::with_values(schema, PromptTemplates::default(), reopened.latest_values().unwrap()).unwrap();
        assert_eq!(restored.snapshot(), json!({"count": 2, "label": "two"}));
    }

    #[tokio::test]
    async fn test_background_set_inserts_row() {
        let a = SqlitePolicy::in_memory("a").unwrap();
        let ev = Event::set("x", json!(1), json!(0));
        a.background_set(&ev, &ev.value).await.unwrap();
        assert_eq!(a.count("x").unwrap(), 1);
        assert!(a.latest_values().unwrap().contains_key("x"));
    }
}
