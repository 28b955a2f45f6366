// SQLite storage for tokens and automations.
// One database file, tables created on open, soft deletes for automations
// so a removed rule can be audited later.

use crate::engine::tokens::Tokens;
use crate::engine::{Automation, AutomationRange};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening database at {}", db_path.as_ref().display()))?;
        let store = Self { conn };
        store.initialize_tables()?;
        Ok(store)
    }

    fn initialize_tables(&self) -> Result<()> {
        // Single-account design: the token row is pinned to id = 1
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS api_tokens (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS automations (
                automation_id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id TEXT NOT NULL,
                title TEXT NOT NULL,
                range_start INTEGER,
                range_end INTEGER,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                deleted_at TEXT
            )",
            [],
        )?;

        // Uniqueness only among live rows, so a removed automation can be
        // re-added for the same track
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_automations_live_track
             ON automations(track_id) WHERE deleted_at IS NULL",
            [],
        )?;

        Ok(())
    }

    pub fn load_tokens(&self) -> Result<Option<Tokens>> {
        let mut stmt = self.conn.prepare(
            "SELECT access_token, refresh_token, expires_at FROM api_tokens WHERE id = 1",
        )?;

        let tokens = stmt
            .query_row([], |row| self.row_to_tokens(row))
            .optional()?;

        Ok(tokens)
    }

    pub fn save_tokens(&self, tokens: &Tokens) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO api_tokens (id, access_token, refresh_token, expires_at, updated_at)
             VALUES (1, ?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![
                tokens.access_token,
                tokens.refresh_token,
                tokens.expires_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Persists a refreshed access token without touching the refresh token.
    pub fn update_access_token(
        &self,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE api_tokens
             SET access_token = ?1, expires_at = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = 1",
            params![access_token, expires_at.to_rfc3339()],
        )?;

        Ok(())
    }

    pub fn load_automations(&self) -> Result<Vec<Automation>> {
        let mut stmt = self.conn.prepare(
            "SELECT track_id, title, range_start, range_end
             FROM automations WHERE deleted_at IS NULL
             ORDER BY automation_id",
        )?;

        let automations = stmt
            .query_map([], |row| self.row_to_automation(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(automations)
    }

    pub fn insert_automation(&self, automation: &Automation) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO automations (track_id, title, range_start, range_end)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    automation.track_id,
                    automation.title,
                    automation.range.start.map(|ms| ms as i64),
                    automation.range.end.map(|ms| ms as i64),
                ],
            )
            .with_context(|| {
                format!("inserting automation for track {}", automation.track_id)
            })?;

        Ok(())
    }

    /// Soft-deletes the live automation for a track. Returns whether one
    /// existed.
    pub fn remove_automation(&self, track_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE automations SET deleted_at = CURRENT_TIMESTAMP
             WHERE track_id = ?1 AND deleted_at IS NULL",
            params![track_id],
        )?;

        Ok(changed > 0)
    }

    fn row_to_tokens(&self, row: &Row) -> rusqlite::Result<Tokens> {
        let expires_at_str: String = row.get(2)?;
        let expires_at = DateTime::parse_from_rfc3339(&expires_at_str)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?
            .with_timezone(&Utc);

        Ok(Tokens {
            access_token: row.get(0)?,
            refresh_token: row.get(1)?,
            expires_at,
        })
    }

    fn row_to_automation(&self, row: &Row) -> rusqlite::Result<Automation> {
        let range_start: Option<i64> = row.get(2)?;
        let range_end: Option<i64> = row.get(3)?;

        Ok(Automation {
            track_id: row.get(0)?,
            title: row.get(1)?,
            range: AutomationRange {
                start: range_start.map(|ms| ms as u64),
                end: range_end.map(|ms| ms as u64),
            },
        })
    }
}
