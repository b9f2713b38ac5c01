// Police unit entity - keyed by the export's delegacia code

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoliceUnit {
    pub id: String,
    pub regional: Option<String>,
    pub operational_unit: Option<String>,
}

/// One `Delegacia` per code; the first staging row supplies the labels
pub fn extract(conn: &Connection) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO Delegacia (ID, Regional, UOP)
         SELECT delegacia, regional, uop
         FROM staging
         WHERE delegacia IS NOT NULL
         ORDER BY rowid",
        [],
    )?;
    Ok(inserted)
}

pub fn load_all(conn: &Connection) -> Result<Vec<PoliceUnit>> {
    let mut stmt = conn.prepare("SELECT ID, Regional, UOP FROM Delegacia ORDER BY ID")?;
    let units = stmt
        .query_map([], |row| {
            Ok(PoliceUnit {
                id: row.get(0)?,
                regional: row.get(1)?,
                operational_unit: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{staged_with_schema, RawRow};

    #[test]
    fn test_units_grouped_by_code() {
        let rows = vec![
            RawRow::new("1", "10", "20"),
            RawRow::new("2", "11", "21").set("uop", "UOP02-DEL01-SP"),
            RawRow::new("3", "12", "22").set("delegacia", "DEL02-SP"),
            RawRow::new("4", "13", "23").set("delegacia", "NA"),
        ];
        let db = staged_with_schema(&rows);

        assert_eq!(extract(db.connection()).unwrap(), 2);

        let units = load_all(db.connection()).unwrap();
        assert_eq!(units[0].id, "DEL01-SP");
        assert_eq!(units[0].operational_unit.as_deref(), Some("UOP01-DEL01-SP"));
        assert_eq!(units[1].id, "DEL02-SP");
    }
}
