// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Persistent state backed by SQLite.
//!
//! The entire persistent state lives in one SQLite database file. Buckets are
//! not separate tables. Instead, every entry is a row of a single table keyed
//! by its bucket and key, so a bucket exists exactly as long as it holds at
//! least one key.
//!
//! # Traversal Order
//!
//! Bucket traversal visits entries in ascending byte order of their keys.

use crate::state::{PersistentState, Result, StateError, Visitor};

use rusqlite::{params, Connection, OptionalExtension};
use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS state (
        bucket BLOB NOT NULL,
        key BLOB NOT NULL,
        value BLOB NOT NULL,
        PRIMARY KEY (bucket, key)
    ) WITHOUT ROWID;
"#;

/// Persistent state stored in a single SQLite database file.
///
/// Nothing touches the file system until
/// [`open_or_create`](PersistentState::open_or_create) is called.
#[derive(Debug)]
pub struct SqliteState {
    path: PathBuf,
    connection: Option<Connection>,
}

impl SqliteState {
    /// Construct new persistent state for database file at target path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connection: None,
        }
    }

    /// Path to database file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Check if database file has been opened.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or_else(|| StateError::NotOpen {
            path: self.path.clone(),
        })
    }
}

impl PersistentState for SqliteState {
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let value = self
            .connection()?
            .query_row(
                "SELECT value FROM state WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;

        Ok(value.unwrap_or_default())
    }

    fn set(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.connection()?.execute(
            "INSERT INTO state (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
            params![bucket, key, value],
        )?;

        Ok(())
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.connection()?.execute(
            "DELETE FROM state WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
        )?;

        Ok(())
    }

    fn for_each(&self, bucket: &[u8], visit: &mut Visitor<'_>) -> Result<()> {
        let connection = self.connection()?;

        // INVARIANT: Hold one read transaction for the entire traversal. Nested
        // traversals run inside the transaction of the outermost one.
        let tx = if connection.is_autocommit() {
            Some(connection.unchecked_transaction()?)
        } else {
            None
        };

        {
            let mut stmt =
                connection.prepare("SELECT key, value FROM state WHERE bucket = ?1 ORDER BY key")?;
            let mut rows = stmt.query(params![bucket])?;
            while let Some(row) = rows.next()? {
                let key: Vec<u8> = row.get(0)?;
                let value: Vec<u8> = row.get(1)?;
                visit(&key, &value)?;
            }
        }

        if let Some(tx) = tx {
            tx.commit()?;
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn open_or_create(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(|err| StateError::Io {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        debug!("open persistent state: {:?}", self.path.display());
        let connection = Connection::open(&self.path)?;
        connection.execute_batch(SCHEMA)?;
        self.connection = Some(connection);

        Ok(())
    }
}

/// Check that SQLite refused a write because the database is read-only.
pub(crate) fn is_read_only_backend(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == rusqlite::ErrorCode::ReadOnly
    )
}
