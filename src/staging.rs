// Staging Loader - raw export → untyped `staging` relation
//
// Parses the semicolon-separated export, nulls out sentinel values, bulk
// inserts in batches inside one transaction, then runs a typed correction
// pass and drops rows that cannot feed the downstream entities.

use anyhow::{bail, Context, Result};
use csv::ByteRecord;
use encoding_rs::Encoding;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::LoadConfig;
use crate::db::{count_rows, quote_ident, Database, STAGING_TABLE};

/// Tokens the export uses for "no value"; compared after trimming
pub const MISSING_TOKENS: [&str; 4] = ["", "NA", "N/A", "NA/NA"];

/// Columns every downstream stage reads; a file lacking any is rejected
pub const REQUIRED_COLUMNS: [&str; 30] = [
    "id",
    "data_inversa",
    "horario",
    "latitude",
    "longitude",
    "classificacao_acidente",
    "br",
    "km",
    "tipo_pista",
    "sentido_via",
    "uso_solo",
    "tracado_via",
    "municipio",
    "uf",
    "condicao_metereologica",
    "fase_dia",
    "delegacia",
    "regional",
    "uop",
    "causa_acidente",
    "causa_principal",
    "id_veiculo",
    "tipo_veiculo",
    "marca",
    "ano_fabricacao_veiculo",
    "pesid",
    "sexo",
    "idade",
    "estado_fisico",
    "tipo_envolvido",
];

// ============================================================================
// TYPE CORRECTION
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Correction {
    Integer,
    Decimal,
    Flag,
}

const CORRECTIONS: [(&str, Correction); 10] = [
    ("id", Correction::Integer),
    ("id_veiculo", Correction::Integer),
    ("pesid", Correction::Integer),
    ("idade", Correction::Integer),
    ("ano_fabricacao_veiculo", Correction::Integer),
    ("km", Correction::Decimal),
    ("latitude", Correction::Decimal),
    ("longitude", Correction::Decimal),
    ("uso_solo", Correction::Flag),
    ("causa_principal", Correction::Flag),
];

impl Correction {
    fn apply(&self, text: &str) -> Option<Value> {
        match self {
            Correction::Integer => parse_integer(text).map(Value::Integer),
            Correction::Decimal => parse_decimal_comma(text).map(Value::Real),
            Correction::Flag => parse_yes_no(text).map(|b| Value::Integer(b as i64)),
        }
    }
}

/// Trim a raw field; sentinel tokens become `None`
pub fn clean_field(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if MISSING_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Integer in plain (`"12"`) or integral decimal (`"12.0"`, `"12,0"`) form
pub fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }

    let value = parse_decimal_comma(text)?;
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Real number written with a locale decimal comma (`"12,5"` → 12.5)
pub fn parse_decimal_comma(text: &str) -> Option<f64> {
    let normalized = text.trim().replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Ternary Sim/Não flag: `Some(true)`, `Some(false)`, or unknown
pub fn parse_yes_no(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "sim" | "s" => Some(true),
        "não" | "nao" | "n" => Some(false),
        _ => None,
    }
}

// ============================================================================
// STAGING REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StagingReport {
    /// Data rows read from the file (header excluded)
    pub rows_read: usize,

    /// Rows left in staging after filtering
    pub rows_staged: usize,

    /// Rows skipped for a wrong field count or undecodable bytes
    pub malformed_rows: usize,

    /// Rows dropped for a missing victim, vehicle or involvement id
    pub dropped_missing_keys: usize,

    /// Rows dropped for an age outside the plausible range
    pub dropped_implausible_age: usize,

    /// Values nulled by the correction pass, per column
    pub unparseable_values: BTreeMap<String, usize>,
}

// ============================================================================
// LOADER
// ============================================================================

/// Build the staging relation from the file at `path`.
///
/// The file is opened before storage is touched, so a missing or unreadable
/// input aborts with the database unchanged.
pub fn load_staging(db: &mut Database, path: &Path, config: &LoadConfig) -> Result<StagingReport> {
    let file = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;
    info!(path = %path.display(), encoding = config.encoding.as_str(), "loading staging relation");
    load_staging_from_reader(db, BufReader::new(file), config)
}

pub fn load_staging_from_reader<R: Read>(
    db: &mut Database,
    reader: R,
    config: &LoadConfig,
) -> Result<StagingReport> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = rdr.byte_records();

    let header_record = match records.next() {
        Some(record) => record.context("failed to read header row")?,
        None => bail!("input has no header row"),
    };
    let header = parse_header(&header_record, config.encoding.encoding())?;

    let conn = db.connection_mut();
    relax_durability(conn)?;
    let staged = stage_records(conn, &header, &mut records, config);
    let restored = restore_durability(conn);
    let report = staged?;
    restored?;

    info!(
        rows_read = report.rows_read,
        rows_staged = report.rows_staged,
        malformed = report.malformed_rows,
        dropped_missing_keys = report.dropped_missing_keys,
        dropped_implausible_age = report.dropped_implausible_age,
        "staging relation ready"
    );

    Ok(report)
}

/// Decode and normalize header names; rejects duplicates and missing columns
fn parse_header(record: &ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    let mut header = Vec::with_capacity(record.len());
    let mut seen = HashSet::new();

    for (idx, raw) in record.iter().enumerate() {
        let decoded = decode_field(raw, encoding)
            .with_context(|| format!("header field {} is not valid {}", idx + 1, encoding.name()))?;
        let name = decoded
            .trim_start_matches('\u{feff}')
            .trim_start_matches("ï»¿")
            .trim()
            .replace(' ', "_");

        if !seen.insert(name.clone()) {
            bail!("duplicate column in header: {}", name);
        }
        header.push(name);
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !seen.contains(*column))
        .collect();
    if !missing.is_empty() {
        bail!("input is missing required columns: {}", missing.join(", "));
    }

    Ok(header)
}

fn decode_field(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// Decode and clean one data record; `None` when any field is undecodable
fn decode_record(record: &ByteRecord, encoding: &'static Encoding) -> Option<Vec<Option<String>>> {
    record
        .iter()
        .map(|raw| decode_field(raw, encoding).map(|text| clean_field(&text)))
        .collect()
}

// Throughput over durability for the one-shot bulk insert only
fn relax_durability(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "synchronous", "OFF")
        .context("failed to set synchronous=OFF")?;
    conn.pragma_update(None, "journal_mode", "MEMORY")
        .context("failed to set journal_mode=MEMORY")?;
    Ok(())
}

fn restore_durability(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "synchronous", "FULL")
        .context("failed to restore synchronous=FULL")?;
    conn.pragma_update(None, "journal_mode", "DELETE")
        .context("failed to restore journal_mode=DELETE")?;
    Ok(())
}

fn stage_records<I>(
    conn: &mut Connection,
    header: &[String],
    records: &mut I,
    config: &LoadConfig,
) -> Result<StagingReport>
where
    I: Iterator<Item = csv::Result<ByteRecord>>,
{
    let encoding = config.encoding.encoding();
    let batch_size = config.effective_batch_size();
    let mut report = StagingReport::default();

    let tx = conn.transaction()?;

    // Any previous staging belongs to an interrupted load; rebuild it
    let staging = quote_ident(STAGING_TABLE);
    let columns: Vec<String> = header.iter().map(|name| quote_ident(name)).collect();
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {staging};
         CREATE TABLE {staging} ({});",
        columns.join(", ")
    ))
    .context("failed to create staging relation")?;

    {
        let placeholders = vec!["?"; header.len()].join(", ");
        let mut insert = tx.prepare(&format!("INSERT INTO {staging} VALUES ({placeholders})"))?;
        let mut batch: Vec<Vec<Option<String>>> = Vec::with_capacity(batch_size);

        for result in records {
            let record = result.context("failed to read input record")?;
            report.rows_read += 1;
            let line = record.position().map(|p| p.line()).unwrap_or_default();

            if record.len() != header.len() {
                warn!(line, expected = header.len(), found = record.len(), "skipping row with wrong field count");
                report.malformed_rows += 1;
                continue;
            }

            match decode_record(&record, encoding) {
                Some(row) => batch.push(row),
                None => {
                    warn!(line, encoding = encoding.name(), "skipping undecodable row");
                    report.malformed_rows += 1;
                    continue;
                }
            }

            if batch.len() == batch_size {
                flush_batch(&mut insert, &mut batch)?;
            }
        }
        flush_batch(&mut insert, &mut batch)?;
    }

    correct_types(&tx, &mut report)?;
    filter_rows(&tx, config, &mut report)?;
    report.rows_staged = count_rows(&tx, STAGING_TABLE)? as usize;

    tx.commit().context("failed to commit staging relation")?;
    Ok(report)
}

fn flush_batch(
    insert: &mut rusqlite::Statement<'_>,
    batch: &mut Vec<Vec<Option<String>>>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    debug!(rows = batch.len(), "flushing staging batch");
    for row in batch.drain(..) {
        insert
            .execute(params_from_iter(row.iter()))
            .context("failed to insert staging row")?;
    }
    Ok(())
}

/// Cast numeric text and Sim/Não flags in place; unparseable or unrecognised
/// values become NULL and are counted per column
fn correct_types(conn: &Connection, report: &mut StagingReport) -> Result<()> {
    let staging = quote_ident(STAGING_TABLE);
    let selected: Vec<String> = CORRECTIONS.iter().map(|(c, _)| quote_ident(c)).collect();

    let mut updates: Vec<(i64, Vec<Value>)> = Vec::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, {} FROM {staging}",
            selected.join(", ")
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let mut values = Vec::with_capacity(CORRECTIONS.len());
            for (idx, (column, correction)) in CORRECTIONS.iter().enumerate() {
                let raw: Option<String> = row.get(idx + 1)?;
                let corrected = match raw.as_deref() {
                    None => Value::Null,
                    Some(text) => match correction.apply(text) {
                        Some(value) => value,
                        None => {
                            *report.unparseable_values.entry(column.to_string()).or_default() += 1;
                            Value::Null
                        }
                    },
                };
                values.push(corrected);
            }
            updates.push((rowid, values));
        }
    }

    let assignments: Vec<String> = selected
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("{column} = ?{}", idx + 1))
        .collect();
    let mut update = conn.prepare(&format!(
        "UPDATE {staging} SET {} WHERE rowid = ?{}",
        assignments.join(", "),
        CORRECTIONS.len() + 1
    ))?;
    for (rowid, mut values) in updates {
        values.push(Value::Integer(rowid));
        update.execute(params_from_iter(values.iter()))?;
    }

    for (column, count) in &report.unparseable_values {
        warn!(column = %column, count, "nulled unparseable values");
    }
    Ok(())
}

fn filter_rows(conn: &Connection, config: &LoadConfig, report: &mut StagingReport) -> Result<()> {
    let staging = quote_ident(STAGING_TABLE);

    report.dropped_missing_keys = conn.execute(
        &format!(
            "DELETE FROM {staging}
             WHERE pesid IS NULL OR id_veiculo IS NULL OR tipo_envolvido IS NULL"
        ),
        [],
    )?;

    // Unknown ages stay; only a present age outside the range is implausible
    report.dropped_implausible_age = conn.execute(
        &format!(
            "DELETE FROM {staging}
             WHERE idade IS NOT NULL AND (idade < ?1 OR idade > ?2)"
        ),
        params![config.min_age, config.max_age],
    )?;

    Ok(())
}
