// Entity Extractor - independent entities from distinct staging projections
//
// Two identity styles:
// - source-provided id (vehicle, victim, police unit): id kept as primary key
// - surrogate id (cause, municipality, weather): assigned 1, 2, 3... in
//   first-seen staging order through a KeyRegistry, then written back to
//   the staging relation so later stages link by id instead of by value
//
// Every extraction walks staging in rowid (source) order, so the first row
// seen for a key wins any disagreement in non-key attributes.

pub mod cause;
pub mod municipality;
pub mod police_unit;
pub mod vehicle;
pub mod victim;
pub mod weather;

pub use cause::Cause;
pub use municipality::Municipality;
pub use police_unit::PoliceUnit;
pub use vehicle::Vehicle;
pub use victim::Victim;
pub use weather::WeatherCondition;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, info};

use crate::db::{quote_ident, STAGING_TABLE};

// ============================================================================
// KEY REGISTRY
// ============================================================================

/// Natural key → surrogate id, assigned densely in first-seen order
#[derive(Debug, Clone)]
pub struct KeyRegistry<K> {
    ids: HashMap<K, i64>,
    next_id: i64,
}

impl<K: Eq + Hash + Clone> KeyRegistry<K> {
    pub fn new() -> Self {
        KeyRegistry {
            ids: HashMap::new(),
            next_id: 1,
        }
    }

    /// Id for `key`, assigning the next one if unseen.
    ///
    /// Returns `(id, newly_assigned)`.
    pub fn resolve(&mut self, key: &K) -> (i64, bool) {
        if let Some(id) = self.ids.get(key) {
            return (*id, false);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(key.clone(), id);
        (id, true)
    }

    pub fn get(&self, key: &K) -> Option<i64> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Register keys in staging order, insert each new key once, and backfill the
/// assigned id into `column` of every contributing staging row.
pub(crate) fn extract_surrogate<K, F>(
    conn: &Connection,
    keyed_rows: Vec<(i64, K)>,
    column: &str,
    mut insert_new: F,
) -> Result<KeyRegistry<K>>
where
    K: Eq + Hash + Clone,
    F: FnMut(i64, &K) -> Result<()>,
{
    let mut registry = KeyRegistry::new();
    let mut assignments = Vec::with_capacity(keyed_rows.len());

    for (rowid, key) in keyed_rows {
        let (id, is_new) = registry.resolve(&key);
        if is_new {
            insert_new(id, &key)?;
        }
        assignments.push((rowid, id));
    }

    backfill(conn, column, &assignments)?;
    Ok(registry)
}

/// Add an INTEGER column to staging and set it per rowid
pub(crate) fn backfill(conn: &Connection, column: &str, assignments: &[(i64, i64)]) -> Result<()> {
    let staging = quote_ident(STAGING_TABLE);
    let column_sql = quote_ident(column);

    conn.execute(
        &format!("ALTER TABLE {staging} ADD COLUMN {column_sql} INTEGER"),
        [],
    )
    .with_context(|| format!("failed to add staging column {}", column))?;

    let mut update = conn.prepare(&format!(
        "UPDATE {staging} SET {column_sql} = ?1 WHERE rowid = ?2"
    ))?;
    for (rowid, id) in assignments {
        update.execute(params![id, rowid])?;
    }

    debug!(column, rows = assignments.len(), "backfilled surrogate keys");
    Ok(())
}

// ============================================================================
// EXTRACT ALL
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityCounts {
    pub causes: usize,
    pub vehicles: usize,
    pub victims: usize,
    pub municipalities: usize,
    pub weather_conditions: usize,
    pub police_units: usize,
}

/// Extract every independent entity. Tables are disjoint, order is fixed.
pub fn extract_all(conn: &Connection) -> Result<EntityCounts> {
    let counts = EntityCounts {
        causes: cause::extract(conn).context("failed to extract causes")?,
        vehicles: vehicle::extract(conn).context("failed to extract vehicles")?,
        victims: victim::extract(conn).context("failed to extract victims")?,
        municipalities: municipality::extract(conn).context("failed to extract municipalities")?,
        weather_conditions: weather::extract(conn).context("failed to extract weather conditions")?,
        police_units: police_unit::extract(conn).context("failed to extract police units")?,
    };

    info!(
        causes = counts.causes,
        vehicles = counts.vehicles,
        victims = counts.victims,
        municipalities = counts.municipalities,
        weather_conditions = counts.weather_conditions,
        police_units = counts.police_units,
        "entities extracted"
    );

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::count_rows;
    use crate::testing::{staged_with_schema, RawRow};

    #[test]
    fn test_registry_assigns_dense_ids_in_order() {
        let mut registry = KeyRegistry::new();

        assert_eq!(registry.resolve(&"b"), (1, true));
        assert_eq!(registry.resolve(&"a"), (2, true));
        assert_eq!(registry.resolve(&"b"), (1, false));
        assert_eq!(registry.get(&"a"), Some(2));
        assert_eq!(registry.get(&"c"), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_treats_missing_parts_as_equal() {
        let mut registry: KeyRegistry<(Option<&str>, Option<&str>)> = KeyRegistry::new();

        let (first, _) = registry.resolve(&(None, Some("Chuva")));
        let (second, is_new) = registry.resolve(&(None, Some("Chuva")));
        assert_eq!(first, second);
        assert!(!is_new);
    }

    #[test]
    fn test_extract_all_counts() {
        let rows = vec![
            RawRow::new("1", "10", "20"),
            RawRow::new("1", "11", "21").set("causa_acidente", "Ingestão de álcool"),
            RawRow::new("2", "12", "22").set("municipio", "BAR"),
        ];
        let db = staged_with_schema(&rows);

        let counts = extract_all(db.connection()).unwrap();
        assert_eq!(counts.causes, 2);
        assert_eq!(counts.vehicles, 3);
        assert_eq!(counts.victims, 3);
        assert_eq!(counts.municipalities, 2);
        assert_eq!(counts.weather_conditions, 1);
        assert_eq!(counts.police_units, 1);
        assert_eq!(count_rows(db.connection(), "Veiculo").unwrap(), 3);
    }

    #[test]
    fn test_backfill_sets_ids_on_staging() {
        let rows = vec![
            RawRow::new("1", "10", "20").set("causa_acidente", "B"),
            RawRow::new("2", "11", "21").set("causa_acidente", "A"),
            RawRow::new("3", "12", "22").set("causa_acidente", "B"),
        ];
        let db = staged_with_schema(&rows);
        extract_all(db.connection()).unwrap();

        let mut stmt = db
            .connection()
            .prepare("SELECT causa_id FROM staging ORDER BY rowid")
            .unwrap();
        let ids: Vec<i64> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ids, vec![1, 2, 1]);
    }
}
