// Weather condition entity - natural key (day phase, description)

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::extract_surrogate;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherCondition {
    pub id: i64,
    pub day_phase: Option<String>,
    pub description: Option<String>,
}

type WeatherKey = (Option<String>, Option<String>);

/// Insert one `Condicao_climatica` per (phase, description) pair.
///
/// Either half may be missing; keys compare null-safely, so two rows with the
/// same description and no phase share one condition. A row missing both has
/// nothing to describe and stays unassigned.
pub fn extract(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT rowid, fase_dia, condicao_metereologica
         FROM staging
         WHERE fase_dia IS NOT NULL OR condicao_metereologica IS NOT NULL
         ORDER BY rowid",
    )?;
    let keyed_rows: Vec<(i64, WeatherKey)> = stmt
        .query_map([], |row| Ok((row.get(0)?, (row.get(1)?, row.get(2)?))))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut insert =
        conn.prepare("INSERT INTO Condicao_climatica (ID, Fase_dia, Descricao) VALUES (?1, ?2, ?3)")?;
    let registry = extract_surrogate(conn, keyed_rows, "clima_id", |id, (phase, description)| {
        insert.execute(params![id, phase, description])?;
        Ok(())
    })?;

    Ok(registry.len())
}

pub fn load_all(conn: &Connection) -> Result<Vec<WeatherCondition>> {
    let mut stmt = conn.prepare("SELECT ID, Fase_dia, Descricao FROM Condicao_climatica ORDER BY ID")?;
    let conditions = stmt
        .query_map([], |row| {
            Ok(WeatherCondition {
                id: row.get(0)?,
                day_phase: row.get(1)?,
                description: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conditions)
}
