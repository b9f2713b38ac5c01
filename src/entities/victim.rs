// Victim entity - keyed by the export's person id (pesid)

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Victim {
    pub id: i64,
    pub sex: Option<String>,
}

pub fn extract(conn: &Connection) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO Vitima (ID, Sexo)
         SELECT pesid, sexo
         FROM staging
         WHERE pesid IS NOT NULL
         ORDER BY rowid",
        [],
    )?;

    let conflicting: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM staging s
         JOIN Vitima p ON p.ID = s.pesid
         WHERE s.sexo IS NOT p.Sexo",
        [],
        |row| row.get(0),
    )?;
    if conflicting > 0 {
        warn!(rows = conflicting, "victim rows disagree with the first row for their id");
    }

    Ok(inserted)
}

pub fn load_all(conn: &Connection) -> Result<Vec<Victim>> {
    let mut stmt = conn.prepare("SELECT ID, Sexo FROM Vitima ORDER BY ID")?;
    let victims = stmt
        .query_map([], |row| {
            Ok(Victim {
                id: row.get(0)?,
                sex: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(victims)
}
