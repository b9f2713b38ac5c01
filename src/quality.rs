// Integrity verification - post-load checks over the normalized schema
//
// Critical issues mean a broken invariant (duplicate natural key, dangling
// foreign key, leftover staging). Warnings flag valid-but-thin data, such as
// accidents that could not be tied to a road segment.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{table_exists, STAGING_TABLE};

/// Natural key of every surrogate-keyed table; compared null-safely by GROUP BY
const NATURAL_KEYS: [(&str, &[&str]); 4] = [
    ("Causa", &["Descricao"]),
    ("Municipio", &["Nome", "UF"]),
    ("Condicao_climatica", &["Fase_dia", "Descricao"]),
    ("Trecho", &["Area_urbana", "Br", "Km", "Tipo_pista", "Sentido_via", "MID"]),
];

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // An invariant of the normalized schema does not hold
    Warning,  // Data is valid but incomplete
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub table: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub tables_checked: usize,
    pub issues: Vec<QualityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn summary(&self) -> String {
        format!(
            "Tables checked: {}, Issues: {} ({} critical)",
            self.tables_checked,
            self.issues.len(),
            self.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count()
        )
    }

    fn push(&mut self, severity: Severity, table: &str, issue: String, recommendation: &str) {
        self.issues.push(QualityIssue {
            severity,
            table: table.to_string(),
            issue,
            recommendation: recommendation.to_string(),
        });
    }
}

// ============================================================================
// CHECKS
// ============================================================================

pub fn verify(conn: &Connection) -> Result<IntegrityReport> {
    let mut report = IntegrityReport::default();

    check_natural_keys(conn, &mut report)?;
    check_foreign_keys(conn, &mut report)?;
    check_staging_dropped(conn, &mut report)?;
    check_unlinked_accidents(conn, &mut report)?;

    Ok(report)
}

fn check_natural_keys(conn: &Connection, report: &mut IntegrityReport) -> Result<()> {
    for (table, columns) in NATURAL_KEYS {
        report.tables_checked += 1;
        let key = columns.join(", ");
        let duplicates: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM (
                         SELECT 1 FROM {table} GROUP BY {key} HAVING COUNT(*) > 1
                     )"
                ),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to check natural key of {}", table))?;

        if duplicates > 0 {
            report.push(
                Severity::Critical,
                table,
                format!("{} natural keys ({}) appear more than once", duplicates, key),
                "Delete the store and reload from the source file",
            );
        }
    }
    Ok(())
}

fn check_foreign_keys(conn: &Connection, report: &mut IntegrityReport) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let violations = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(2)?)))?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to run foreign key check")?;

    for (table, parent) in violations {
        report.push(
            Severity::Critical,
            &table,
            format!("row references a missing {} row", parent),
            "Check that foreign key enforcement was on during the load",
        );
    }
    Ok(())
}

fn check_staging_dropped(conn: &Connection, report: &mut IntegrityReport) -> Result<()> {
    if table_exists(conn, STAGING_TABLE)? {
        report.push(
            Severity::Critical,
            STAGING_TABLE,
            "staging relation survived the load".to_string(),
            "Rerun the load to rebuild and drop it",
        );
    }
    Ok(())
}

fn check_unlinked_accidents(conn: &Connection, report: &mut IntegrityReport) -> Result<()> {
    report.tables_checked += 1;
    let (no_segment, no_weather): (i64, i64) = conn.query_row(
        "SELECT COUNT(*) FILTER (WHERE TID IS NULL), COUNT(*) FILTER (WHERE CID IS NULL)
         FROM Acidente",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    if no_segment > 0 {
        report.push(
            Severity::Warning,
            "Acidente",
            format!("{} accidents have no road segment", no_segment),
            "Source rows lacked road type, direction, km or road id",
        );
    }
    if no_weather > 0 {
        report.push(
            Severity::Warning,
            "Acidente",
            format!("{} accidents have no weather condition", no_weather),
            "Source rows lacked both day phase and weather description",
        );
    }
    Ok(())
}
