use anyhow::{bail, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

use crate::schema;

/// Transient relation holding cleaned-but-unnormalized raw rows
pub const STAGING_TABLE: &str = "staging";

/// A single value in a query result
pub type Cell = serde_json::Value;

// ============================================================================
// LOAD STATE
// ============================================================================

/// Lifecycle of the store: `Empty → Staged → Complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadState {
    /// Neither staging nor a populated fact table
    Empty,

    /// Staging relation present, normalization not committed
    Staged,

    /// Fact table exists and has rows; pipeline is a no-op
    Complete,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Empty => "empty",
            LoadState::Staged => "staged",
            LoadState::Complete => "complete",
        }
    }
}

// ============================================================================
// QUERY RESULT
// ============================================================================

/// Tabular result of a read-only query: ordered columns, rows as tuples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` under column `name`
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// Per-column profile of a table (declared constraints + population counts)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub count: i64,
    pub non_null: i64,
    pub distinct: i64,
}

// ============================================================================
// DATABASE HANDLE
// ============================================================================

/// Owned storage handle; every stage borrows it instead of reaching for
/// ambient state, so tests get an isolated in-memory store each.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign key enforcement")?;
        Ok(Database { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Idempotence probe used by bootstrap before serving any query
    pub fn state(&self) -> Result<LoadState> {
        if schema::is_populated(&self.conn)? {
            Ok(LoadState::Complete)
        } else if table_exists(&self.conn, STAGING_TABLE)? {
            Ok(LoadState::Staged)
        } else {
            Ok(LoadState::Empty)
        }
    }

    pub fn is_complete(&self) -> Result<bool> {
        Ok(self.state()? == LoadState::Complete)
    }

    /// Run one read-only statement and collect the full result.
    ///
    /// Writes are rejected: the normalized schema is immutable once loaded.
    pub fn execute(&self, sql: &str) -> Result<QueryResult> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare query: {}", sql.trim()))?;

        if !stmt.readonly() {
            bail!("only read-only statements are accepted");
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(to_cell(row.get_ref(idx)?));
            }
            rows.push(values);
        }

        Ok(QueryResult { columns, rows })
    }

    pub fn tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn columns(&self, table: &str) -> Result<Vec<String>> {
        self.ensure_table(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let names = stmt
            .query_map([], |row| row.get(1))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// (row count, column count)
    pub fn shape(&self, table: &str) -> Result<(i64, usize)> {
        let columns = self.columns(table)?;
        let rows = count_rows(&self.conn, table)?;
        Ok((rows, columns.len()))
    }

    pub fn column_profile(&self, table: &str) -> Result<Vec<ColumnProfile>> {
        self.ensure_table(table)?;

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let declared = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, i64>(5)? > 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut profiles = Vec::with_capacity(declared.len());
        for (name, declared_type, not_null, primary_key) in declared {
            let column = quote_ident(&name);
            let (count, non_null, distinct) = self.conn.query_row(
                &format!(
                    "SELECT COUNT(*), COUNT({column}), COUNT(DISTINCT {column}) FROM {}",
                    quote_ident(table)
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            profiles.push(ColumnProfile {
                name,
                declared_type,
                not_null,
                primary_key,
                count,
                non_null,
                distinct,
            });
        }

        Ok(profiles)
    }

    fn ensure_table(&self, table: &str) -> Result<()> {
        if !table_exists(&self.conn, table)? {
            bail!("unknown table: {}", table);
        }
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    Ok(found)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| {
            row.get(0)
        })
        .with_context(|| format!("failed to count rows of {}", table))?;
    Ok(count)
}

/// Double-quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_cell(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Cell::Number)
            .unwrap_or(Cell::Null),
        ValueRef::Text(bytes) => Cell::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Cell::String(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
    }
}
