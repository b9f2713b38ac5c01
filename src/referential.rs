// Referential Loader - many-to-many links between accidents and the rest
//
// Each link table is filled from staging in source order with INSERT OR
// IGNORE, so the first row for a pair supplies its attributes. Rows whose
// accident (or vehicle / victim) never made it into the normalized tables
// produce no link rather than a dangling reference.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::db::{quote_ident, STAGING_TABLE};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkTableCounts {
    pub vehicle_involvements: usize,
    pub victim_involvements: usize,
    pub cause_attributions: usize,
}

pub fn load_links(conn: &Connection) -> Result<LinkTableCounts> {
    let vehicle_involvements = conn
        .execute(
            "INSERT OR IGNORE INTO Envolveu_veiculo (VID, AID)
             SELECT s.id_veiculo, s.id
             FROM staging s
             JOIN Acidente a ON a.ID = s.id
             JOIN Veiculo v ON v.ID = s.id_veiculo
             ORDER BY s.rowid",
            [],
        )
        .context("failed to link vehicles to accidents")?;

    let victim_involvements = conn
        .execute(
            "INSERT OR IGNORE INTO Envolveu_vitima (PID, AID, Idade, Estado_fisico)
             SELECT s.pesid, s.id, s.idade, s.estado_fisico
             FROM staging s
             JOIN Acidente a ON a.ID = s.id
             JOIN Vitima p ON p.ID = s.pesid
             ORDER BY s.rowid",
            [],
        )
        .context("failed to link victims to accidents")?;

    let cause_attributions = conn
        .execute(
            "INSERT OR IGNORE INTO Tem_causa (AID, CID, Principal)
             SELECT s.id, s.causa_id, s.causa_principal
             FROM staging s
             JOIN Acidente a ON a.ID = s.id
             WHERE s.causa_id IS NOT NULL
             ORDER BY s.rowid",
            [],
        )
        .context("failed to attribute causes to accidents")?;

    info!(
        vehicle_involvements,
        victim_involvements,
        cause_attributions,
        "link tables loaded"
    );

    Ok(LinkTableCounts {
        vehicle_involvements,
        victim_involvements,
        cause_attributions,
    })
}

/// Staging does not outlive a completed load
pub fn drop_staging(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(STAGING_TABLE)))
        .context("failed to drop staging relation")?;
    Ok(())
}
