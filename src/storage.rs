//! Two-tier key-value storage: a tier synced across devices and a
//! local-only tier. Values are JSON.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{CovlayError, Result};

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = include_str!("../schema.sql");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Sync,
    Local,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Sync => "sync",
            Tier::Local => "local",
        }
    }
}

#[async_trait(?Send)]
pub trait Storage {
    async fn get(&self, tier: Tier, key: &str) -> Result<Option<Value>>;
    async fn set(&self, tier: Tier, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, tier: Tier, key: &str) -> Result<()>;
}

/// Storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<(Tier, String), Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl Storage for MemoryStorage {
    async fn get(&self, tier: Tier, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.borrow().get(&(tier, key.to_string())).cloned())
    }

    async fn set(&self, tier: Tier, key: &str, value: Value) -> Result<()> {
        self.entries.borrow_mut().insert((tier, key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, tier: Tier, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(&(tier, key.to_string()));
        Ok(())
    }
}

/// Storage persisted in a SQLite file.
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Ensure the schema is initialized. Safe to call on an already-initialized DB.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(CovlayError::Other(format!(
                "Storage schema version {} is newer than this binary supports ({}). \
                 Please upgrade covlay.",
                v, SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

#[async_trait(?Send)]
impl Storage for SqliteStorage {
    async fn get(&self, tier: Tier, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM storage WHERE tier = ?1 AND key = ?2",
                params![tier.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, tier: Tier, key: &str, value: Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO storage (tier, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tier, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![tier.as_str(), key, value.to_string(), now],
        )?;
        Ok(())
    }

    async fn remove(&self, tier: Tier, key: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM storage WHERE tier = ?1 AND key = ?2",
            params![tier.as_str(), key],
        )?;
        Ok(())
    }
}
