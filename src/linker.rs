// Relationship Linker - entities that depend on extracted ones, then the fact
//
// Segments are keyed on their five road attributes plus the municipality id
// already backfilled into staging. Their ids are backfilled in turn, so the
// accident rows link by carried-forward ids rather than by re-joining on
// nullable text (where NULL never equals NULL).

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::entities::extract_surrogate;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

// ============================================================================
// ROAD SEGMENT
// ============================================================================

/// Full natural key of a road segment.
///
/// `km` is compared by bit pattern (see `km_bits`). An unknown urban flag or
/// municipality is part of the key, compared null-safely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub urban: Option<bool>,
    pub road: String,
    pub km_bits: u64,
    pub pavement: String,
    pub direction: String,
    pub municipality_id: Option<i64>,
}

impl SegmentKey {
    pub fn km(&self) -> f64 {
        f64::from_bits(self.km_bits)
    }
}

/// Hashable form of a km marker; `-0.0` and `0.0` are the same marker
pub fn km_bits(km: f64) -> u64 {
    if km == 0.0 {
        0.0f64.to_bits()
    } else {
        km.to_bits()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadSegment {
    pub id: i64,
    pub urban: Option<bool>,
    pub road: String,
    pub km: f64,
    pub pavement: String,
    pub direction: String,
    pub municipality_id: Option<i64>,
}

/// Insert one `Trecho` per distinct key and backfill `staging.trecho_id`.
///
/// Rows lacking road id, km, pavement type or direction get no segment. The
/// urban flag may be unknown.
pub fn extract_segments(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT rowid, uso_solo, br, km, tipo_pista, sentido_via, municipio_id
         FROM staging
         WHERE br IS NOT NULL
           AND km IS NOT NULL
           AND tipo_pista IS NOT NULL
           AND sentido_via IS NOT NULL
         ORDER BY rowid",
    )?;
    let keyed_rows = stmt
        .query_map([], |row| {
            let km: f64 = row.get(3)?;
            Ok((
                row.get::<_, i64>(0)?,
                SegmentKey {
                    urban: row.get(1)?,
                    road: row.get(2)?,
                    km_bits: km_bits(km),
                    pavement: row.get(4)?,
                    direction: row.get(5)?,
                    municipality_id: row.get(6)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut insert = conn.prepare(
        "INSERT INTO Trecho (ID, Area_urbana, Br, Km, Tipo_pista, Sentido_via, MID)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let registry = extract_surrogate(conn, keyed_rows, "trecho_id", |id, key| {
        insert.execute(params![
            id,
            key.urban,
            key.road,
            key.km(),
            key.pavement,
            key.direction,
            key.municipality_id,
        ])?;
        Ok(())
    })?;

    Ok(registry.len())
}

/// Distinct (segment, alignment type) pairs; composite key, no surrogate
pub fn extract_alignments(conn: &Connection) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO Tracado_via (TID, Tipo)
         SELECT trecho_id, tracado_via
         FROM staging
         WHERE trecho_id IS NOT NULL AND tracado_via IS NOT NULL
         ORDER BY rowid",
        [],
    )?;
    Ok(inserted)
}

pub fn load_segments(conn: &Connection) -> Result<Vec<RoadSegment>> {
    let mut stmt = conn.prepare(
        "SELECT ID, Area_urbana, Br, Km, Tipo_pista, Sentido_via, MID FROM Trecho ORDER BY ID",
    )?;
    let segments = stmt
        .query_map([], |row| {
            Ok(RoadSegment {
                id: row.get(0)?,
                urban: row.get(1)?,
                road: row.get(2)?,
                km: row.get(3)?,
                pavement: row.get(4)?,
                direction: row.get(5)?,
                municipality_id: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(segments)
}

// ============================================================================
// ACCIDENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accident {
    pub id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub classification: String,
    pub segment_id: Option<i64>,
    pub weather_id: Option<i64>,
    pub police_unit_id: Option<String>,
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text.trim(), format).ok())
}

pub fn parse_time(text: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text.trim(), format).ok())
}

/// Raw accident projection of one staging row
struct AccidentRow {
    id: Option<i64>,
    date: Option<String>,
    time: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    classification: Option<String>,
    segment_id: Option<i64>,
    weather_id: Option<i64>,
    police_unit_id: Option<String>,
}

impl AccidentRow {
    /// `None` when any mandatory field is missing or unparseable
    fn resolve(self) -> Option<Accident> {
        Some(Accident {
            id: self.id?,
            date: parse_date(self.date.as_deref()?)?,
            time: parse_time(self.time.as_deref()?)?,
            latitude: self.latitude,
            longitude: self.longitude,
            classification: self.classification?,
            segment_id: self.segment_id,
            weather_id: self.weather_id,
            police_unit_id: self.police_unit_id,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccidentCounts {
    pub accidents: usize,
    pub excluded_rows: usize,
    pub conflicting_rows: usize,
}

/// One `Acidente` per source id, from the first staging row that carries all
/// mandatory fields. Later rows for the same id that resolve differently are
/// counted as conflicts and never produce a second accident.
pub fn resolve_accidents(conn: &Connection) -> Result<AccidentCounts> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.data_inversa, s.horario, s.latitude, s.longitude,
                s.classificacao_acidente, s.trecho_id, s.clima_id, d.ID
         FROM staging s
         LEFT JOIN Delegacia d ON d.ID = s.delegacia
         ORDER BY s.rowid",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AccidentRow {
                id: row.get(0)?,
                date: row.get(1)?,
                time: row.get(2)?,
                latitude: row.get(3)?,
                longitude: row.get(4)?,
                classification: row.get(5)?,
                segment_id: row.get(6)?,
                weather_id: row.get(7)?,
                police_unit_id: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut insert = conn.prepare(
        "INSERT INTO Acidente (ID, Data, Horario, Latitude, Longitude, Classificacao, TID, CID, DID)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;

    let mut counts = AccidentCounts::default();
    let mut resolved: HashMap<i64, Accident> = HashMap::new();

    for row in rows {
        let accident = match row.resolve() {
            Some(accident) => accident,
            None => {
                counts.excluded_rows += 1;
                continue;
            }
        };

        if let Some(first) = resolved.get(&accident.id) {
            if *first != accident {
                counts.conflicting_rows += 1;
            }
            continue;
        }

        insert
            .execute(params![
                accident.id,
                accident.date.format("%Y-%m-%d").to_string(),
                accident.time.format("%H:%M:%S").to_string(),
                accident.latitude,
                accident.longitude,
                accident.classification,
                accident.segment_id,
                accident.weather_id,
                accident.police_unit_id,
            ])
            .with_context(|| format!("failed to insert accident {}", accident.id))?;
        resolved.insert(accident.id, accident);
    }

    counts.accidents = resolved.len();
    if counts.excluded_rows > 0 {
        warn!(rows = counts.excluded_rows, "rows without id, date, time or classification excluded from accidents");
    }
    if counts.conflicting_rows > 0 {
        warn!(rows = counts.conflicting_rows, "rows disagree with the first row of their accident");
    }

    Ok(counts)
}

pub fn load_accidents(conn: &Connection) -> Result<Vec<Accident>> {
    let mut stmt = conn.prepare(
        "SELECT ID, Data, Horario, Latitude, Longitude, Classificacao, TID, CID, DID
         FROM Acidente ORDER BY ID",
    )?;
    let accidents = stmt
        .query_map([], |row| {
            let date: String = row.get(1)?;
            let time: String = row.get(2)?;
            Ok(Accident {
                id: row.get(0)?,
                date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
                time: NaiveTime::parse_from_str(&time, "%H:%M:%S")
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
                latitude: row.get(3)?,
                longitude: row.get(4)?,
                classification: row.get(5)?,
                segment_id: row.get(6)?,
                weather_id: row.get(7)?,
                police_unit_id: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accidents)
}

// ============================================================================
// LINK ALL
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkCounts {
    pub road_segments: usize,
    pub road_alignments: usize,
    pub accidents: usize,
    pub excluded_accident_rows: usize,
    pub conflicting_accident_rows: usize,
}

/// Segments, then alignments, then accidents. Requires entity extraction.
pub fn link_all(conn: &Connection) -> Result<LinkCounts> {
    let road_segments = extract_segments(conn).context("failed to extract road segments")?;
    let road_alignments = extract_alignments(conn).context("failed to extract road alignments")?;
    let accidents = resolve_accidents(conn).context("failed to resolve accidents")?;

    info!(
        road_segments,
        road_alignments,
        accidents = accidents.accidents,
        "relationships linked"
    );

    Ok(LinkCounts {
        road_segments,
        road_alignments,
        accidents: accidents.accidents,
        excluded_accident_rows: accidents.excluded_rows,
        conflicting_accident_rows: accidents.conflicting_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::entities::extract_all;
    use crate::testing::{staged_with_schema, RawRow};

    fn linked(rows: &[RawRow]) -> (Database, LinkCounts) {
        let db = staged_with_schema(rows);
        extract_all(db.connection()).unwrap();
        let counts = link_all(db.connection()).unwrap();
        (db, counts)
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7);
        assert_eq!(parse_date("2024-03-07"), expected);
        assert_eq!(parse_date("07/03/2024"), expected);
        assert_eq!(parse_date("2024-13-07"), None);
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(parse_time("18:45:00"), NaiveTime::from_hms_opt(18, 45, 0));
        assert_eq!(parse_time("18:45"), NaiveTime::from_hms_opt(18, 45, 0));
        assert_eq!(parse_time("quarter past"), None);
    }

    #[test]
    fn test_shared_segment_across_accidents() {
        let rows = vec![RawRow::new("1", "10", "20"), RawRow::new("2", "11", "21")];
        let (db, counts) = linked(&rows);

        assert_eq!(counts.road_segments, 1);
        let accidents = load_accidents(db.connection()).unwrap();
        assert_eq!(accidents.len(), 2);
        assert_eq!(accidents[0].segment_id, Some(1));
        assert_eq!(accidents[1].segment_id, Some(1));
    }

    #[test]
    fn test_segment_key_includes_every_attribute() {
        let rows = vec![
            RawRow::new("1", "10", "20"),
            RawRow::new("2", "11", "21").set("km", "12,6"),
            RawRow::new("3", "12", "22").set("sentido_via", "Decrescente"),
            RawRow::new("4", "13", "23").set("uso_solo", "Não"),
            RawRow::new("5", "14", "24").set("uf", "RJ"),
        ];
        let (_, counts) = linked(&rows);

        assert_eq!(counts.road_segments, 5);
    }

    #[test]
    fn test_unknown_urban_flag_keeps_segment() {
        let rows = vec![
            RawRow::new("1", "10", "20").set("uso_solo", "Ignorado"),
            RawRow::new("2", "11", "21").set("uso_solo", "Ignorado"),
            RawRow::new("3", "12", "22"),
        ];
        let (db, counts) = linked(&rows);

        assert_eq!(counts.road_segments, 2);
        let segments = load_segments(db.connection()).unwrap();
        assert_eq!(segments[0].urban, None);
        assert_eq!(segments[1].urban, Some(true));

        let accidents = load_accidents(db.connection()).unwrap();
        assert_eq!(accidents[0].segment_id, Some(segments[0].id));
        assert_eq!(accidents[1].segment_id, Some(segments[0].id));
    }

    #[test]
    fn test_signed_zero_km_is_one_marker() {
        assert_eq!(km_bits(-0.0), km_bits(0.0));
        assert_ne!(km_bits(12.5), km_bits(-12.5));
    }

    #[test]
    fn test_null_municipality_keeps_segment() {
        let rows = vec![
            RawRow::new("1", "10", "20").set("municipio", "NA"),
            RawRow::new("2", "11", "21").set("municipio", "NA"),
        ];
        let (db, counts) = linked(&rows);

        assert_eq!(counts.road_segments, 1);
        let segments = load_segments(db.connection()).unwrap();
        assert_eq!(segments[0].municipality_id, None);

        // Both accidents still reach the segment through the backfilled id
        let accidents = load_accidents(db.connection()).unwrap();
        assert!(accidents.iter().all(|a| a.segment_id == Some(segments[0].id)));
    }

    #[test]
    fn test_incomplete_road_attributes_leave_accident_unlinked() {
        let rows = vec![RawRow::new("1", "10", "20").set("tipo_pista", "NA")];
        let (db, counts) = linked(&rows);

        assert_eq!(counts.road_segments, 0);
        assert_eq!(counts.road_alignments, 0);
        let accidents = load_accidents(db.connection()).unwrap();
        assert_eq!(accidents.len(), 1);
        assert_eq!(accidents[0].segment_id, None);
    }

    #[test]
    fn test_alignments_are_per_segment_and_type() {
        let rows = vec![
            RawRow::new("1", "10", "20").set("tracado_via", "Reta"),
            RawRow::new("2", "11", "21").set("tracado_via", "Curva"),
            RawRow::new("3", "12", "22").set("tracado_via", "Reta"),
        ];
        let (_, counts) = linked(&rows);

        assert_eq!(counts.road_segments, 1);
        assert_eq!(counts.road_alignments, 2);
    }

    #[test]
    fn test_accident_attributes_and_keys() {
        let rows = vec![RawRow::new("571772", "10", "20")
            .set("data_inversa", "05/02/2024")
            .set("horario", "07:15")];
        let (db, _) = linked(&rows);

        let accident = &load_accidents(db.connection()).unwrap()[0];
        assert_eq!(accident.id, 571772);
        assert_eq!(accident.date, NaiveDate::from_ymd_opt(2024, 2, 5).unwrap());
        assert_eq!(accident.time, NaiveTime::from_hms_opt(7, 15, 0).unwrap());
        assert_eq!(accident.latitude, Some(-23.55));
        assert_eq!(accident.classification, "Com Vítimas Feridas");
        assert_eq!(accident.weather_id, Some(1));
        assert_eq!(accident.police_unit_id.as_deref(), Some("DEL01-SP"));
    }

    #[test]
    fn test_missing_mandatory_fields_exclude_accident() {
        let rows = vec![
            RawRow::new("1", "10", "20").set("data_inversa", "NA"),
            RawRow::new("2", "11", "21").set("classificacao_acidente", ""),
            RawRow::new("3", "12", "22").set("horario", "25:99"),
            RawRow::new("4", "13", "23"),
        ];
        let (db, counts) = linked(&rows);

        assert_eq!(counts.accidents, 1);
        assert_eq!(counts.excluded_accident_rows, 3);
        assert_eq!(load_accidents(db.connection()).unwrap()[0].id, 4);
    }

    #[test]
    fn test_fan_out_is_guarded() {
        let rows = vec![
            RawRow::new("1", "10", "20"),
            RawRow::new("1", "11", "21"),
            RawRow::new("1", "12", "22").set("horario", "23:00:00"),
        ];
        let (db, counts) = linked(&rows);

        assert_eq!(counts.accidents, 1);
        assert_eq!(counts.conflicting_accident_rows, 1);
        let accident = &load_accidents(db.connection()).unwrap()[0];
        assert_eq!(accident.time, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
    }

    #[test]
    fn test_unresolved_weather_and_police_unit_are_null() {
        let rows = vec![RawRow::new("1", "10", "20")
            .set("fase_dia", "NA")
            .set("condicao_metereologica", "NA")
            .set("delegacia", "NA")];
        let (db, _) = linked(&rows);

        let accident = &load_accidents(db.connection()).unwrap()[0];
        assert_eq!(accident.weather_id, None);
        assert_eq!(accident.police_unit_id, None);
    }
}
