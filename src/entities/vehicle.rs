// Vehicle entity - keyed by the export's vehicle id

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: i64,
    pub kind: Option<String>,
    pub make: Option<String>,
    pub manufacture_year: Option<i64>,
}

/// Insert one `Veiculo` row per vehicle id; first staging row wins
pub fn extract(conn: &Connection) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO Veiculo (ID, Tipo, Marca, Ano_fabricacao)
         SELECT id_veiculo, tipo_veiculo, marca, ano_fabricacao_veiculo
         FROM staging
         WHERE id_veiculo IS NOT NULL
         ORDER BY rowid",
        [],
    )?;

    let conflicting: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM staging s
         JOIN Veiculo v ON v.ID = s.id_veiculo
         WHERE s.tipo_veiculo IS NOT v.Tipo
            OR s.marca IS NOT v.Marca
            OR s.ano_fabricacao_veiculo IS NOT v.Ano_fabricacao",
        [],
        |row| row.get(0),
    )?;
    if conflicting > 0 {
        warn!(rows = conflicting, "vehicle rows disagree with the first row for their id");
    }

    Ok(inserted)
}

pub fn load_all(conn: &Connection) -> Result<Vec<Vehicle>> {
    let mut stmt = conn.prepare("SELECT ID, Tipo, Marca, Ano_fabricacao FROM Veiculo ORDER BY ID")?;
    let vehicles = stmt
        .query_map([], |row| {
            Ok(Vehicle {
                id: row.get(0)?,
                kind: row.get(1)?,
                make: row.get(2)?,
                manufacture_year: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(vehicles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{staged_with_schema, RawRow};

    #[test]
    fn test_vehicle_id_is_preserved() {
        let rows = vec![RawRow::new("1", "4711", "20")];
        let db = staged_with_schema(&rows);

        assert_eq!(extract(db.connection()).unwrap(), 1);
        let vehicles = load_all(db.connection()).unwrap();
        assert_eq!(vehicles[0].id, 4711);
        assert_eq!(vehicles[0].manufacture_year, Some(2015));
    }

    #[test]
    fn test_first_row_wins_on_inconsistent_attributes() {
        let rows = vec![
            RawRow::new("1", "10", "20").set("marca", "Fiat/Uno"),
            RawRow::new("1", "10", "21").set("marca", "FIAT/UNO"),
            RawRow::new("2", "10", "22").set("marca", "fiat/uno"),
        ];
        let db = staged_with_schema(&rows);

        assert_eq!(extract(db.connection()).unwrap(), 1);
        let vehicles = load_all(db.connection()).unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].make.as_deref(), Some("Fiat/Uno"));
    }

    #[test]
    fn test_missing_make_and_year_are_kept_as_null() {
        let rows = vec![RawRow::new("1", "10", "20")
            .set("marca", "NA")
            .set("ano_fabricacao_veiculo", "")];
        let db = staged_with_schema(&rows);

        extract(db.connection()).unwrap();
        let vehicles = load_all(db.connection()).unwrap();
        assert_eq!(vehicles[0].make, None);
        assert_eq!(vehicles[0].manufacture_year, None);
    }
}
