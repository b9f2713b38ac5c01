// Cause entity - one row per distinct cause description

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::extract_surrogate;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cause {
    pub id: i64,
    pub description: String,
}

/// Insert one `Causa` row per description and backfill `staging.causa_id`
pub fn extract(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT rowid, causa_acidente
         FROM staging
         WHERE causa_acidente IS NOT NULL
         ORDER BY rowid",
    )?;
    let keyed_rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut insert = conn.prepare("INSERT INTO Causa (ID, Descricao) VALUES (?1, ?2)")?;
    let registry = extract_surrogate(conn, keyed_rows, "causa_id", |id, description| {
        insert.execute(params![id, description])?;
        Ok(())
    })?;

    Ok(registry.len())
}

pub fn load_all(conn: &Connection) -> Result<Vec<Cause>> {
    let mut stmt = conn.prepare("SELECT ID, Descricao FROM Causa ORDER BY ID")?;
    let causes = stmt
        .query_map([], |row| {
            Ok(Cause {
                id: row.get(0)?,
                description: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(causes)
}
