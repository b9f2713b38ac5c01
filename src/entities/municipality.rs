// Municipality entity - natural key (name, state code)

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::extract_surrogate;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Municipality {
    pub id: i64,
    pub name: String,
    pub state: String,
}

/// Insert one `Municipio` per (name, state) and backfill `staging.municipio_id`.
///
/// Rows missing either part stay unassigned (NULL), never dropped.
pub fn extract(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT rowid, municipio, uf
         FROM staging
         WHERE municipio IS NOT NULL AND uf IS NOT NULL
         ORDER BY rowid",
    )?;
    let keyed_rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                (row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut insert = conn.prepare("INSERT INTO Municipio (ID, Nome, UF) VALUES (?1, ?2, ?3)")?;
    let registry = extract_surrogate(conn, keyed_rows, "municipio_id", |id, (name, state)| {
        insert.execute(params![id, name, state])?;
        Ok(())
    })?;

    Ok(registry.len())
}

pub fn load_all(conn: &Connection) -> Result<Vec<Municipality>> {
    let mut stmt = conn.prepare("SELECT ID, Nome, UF FROM Municipio ORDER BY ID")?;
    let municipalities = stmt
        .query_map([], |row| {
            Ok(Municipality {
                id: row.get(0)?,
                name: row.get(1)?,
                state: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(municipalities)
}
