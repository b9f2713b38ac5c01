// Pipeline - drives a one-shot load through every stage
//
// Empty ──stage──▶ Staged ──normalize (one transaction)──▶ Complete
//
// A Complete store is never touched again. A failed normalization rolls back
// to Staged; the next run rebuilds staging from the file and retries.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{error, info, warn};

use crate::config::LoadConfig;
use crate::db::{count_rows, table_exists, Database, LoadState};
use crate::entities::{extract_all, EntityCounts};
use crate::linker::{link_all, LinkCounts};
use crate::quality::{verify, IntegrityReport};
use crate::referential::{drop_staging, load_links, LinkTableCounts};
use crate::schema::{create_schema, TABLES};
use crate::staging::{load_staging, StagingReport};

const METADATA_TABLE: &str = "Carga";

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub load_id: String,
    pub source_sha256: String,
    pub staging: StagingReport,
    pub entities: EntityCounts,
    pub links: LinkCounts,
    pub link_tables: LinkTableCounts,
    pub integrity: IntegrityReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Store was already populated; nothing was read or written
    AlreadyComplete,

    Loaded(LoadReport),
}

impl LoadOutcome {
    pub fn is_already_complete(&self) -> bool {
        matches!(self, LoadOutcome::AlreadyComplete)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: LoadConfig,
}

impl Pipeline {
    pub fn new(config: LoadConfig) -> Self {
        Pipeline { config }
    }

    /// Load `path` into `db` unless it is already complete.
    pub fn run(&self, db: &mut Database, path: &Path) -> Result<LoadOutcome> {
        let state = db.state()?;
        if state == LoadState::Complete {
            info!("store already loaded, skipping");
            return Ok(LoadOutcome::AlreadyComplete);
        }
        if state == LoadState::Staged {
            warn!("found staging from an interrupted load, rebuilding");
        }

        let source_sha256 = fingerprint(path)?;
        info!(path = %path.display(), sha256 = %source_sha256, "starting load");

        let staging = load_staging(db, path, &self.config)?;
        let load_id = uuid::Uuid::new_v4().to_string();

        let (entities, links, link_tables) = {
            let tx = db
                .connection_mut()
                .transaction()
                .context("failed to begin normalization")?;

            create_schema(&tx)?;
            let entities = extract_all(&tx)?;
            let links = link_all(&tx)?;
            if links.accidents == 0 {
                bail!("no accident could be resolved from {} staged rows", staging.rows_staged);
            }
            let link_tables = load_links(&tx)?;

            let metadata = LoadMetadata {
                load_id: &load_id,
                source_path: path,
                source_sha256: &source_sha256,
            };
            write_metadata(&tx, &metadata)?;
            drop_staging(&tx)?;

            tx.commit().context("failed to commit normalization")?;
            (entities, links, link_tables)
        };

        let integrity = verify(db.connection())?;
        if integrity.has_critical_issues() {
            for issue in &integrity.issues {
                error!(table = %issue.table, issue = %issue.issue, "integrity check failed");
            }
        } else {
            info!(summary = %integrity.summary(), "integrity verified");
        }

        info!(load_id = %load_id, accidents = links.accidents, "load complete");

        Ok(LoadOutcome::Loaded(LoadReport {
            load_id,
            source_sha256,
            staging,
            entities,
            links,
            link_tables,
            integrity,
        }))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(LoadConfig::default())
    }
}

// ============================================================================
// SOURCE FINGERPRINT & LOAD METADATA
// ============================================================================

/// SHA-256 of the file contents, lowercase hex
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

struct LoadMetadata<'a> {
    load_id: &'a str,
    source_path: &'a Path,
    source_sha256: &'a str,
}

fn write_metadata(conn: &Connection, metadata: &LoadMetadata<'_>) -> Result<()> {
    let mut entries: Vec<(String, String)> = vec![
        ("load_id".to_string(), metadata.load_id.to_string()),
        ("source_path".to_string(), metadata.source_path.display().to_string()),
        ("source_sha256".to_string(), metadata.source_sha256.to_string()),
        ("loaded_at".to_string(), Utc::now().to_rfc3339()),
        ("engine_version".to_string(), crate::VERSION.to_string()),
    ];
    for table in TABLES.iter().filter(|t| **t != METADATA_TABLE) {
        entries.push((format!("rows.{}", table), count_rows(conn, table)?.to_string()));
    }

    let mut insert = conn.prepare("INSERT OR REPLACE INTO Carga (key, value) VALUES (?1, ?2)")?;
    for (key, value) in &entries {
        insert
            .execute(params![key, value])
            .with_context(|| format!("failed to record load metadata {}", key))?;
    }
    Ok(())
}

/// Metadata recorded by the completed load; empty before one exists
pub fn load_metadata(conn: &Connection) -> Result<BTreeMap<String, String>> {
    if !table_exists(conn, METADATA_TABLE)? {
        return Ok(BTreeMap::new());
    }
    let mut stmt = conn.prepare("SELECT key, value FROM Carga")?;
    let entries = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<BTreeMap<String, String>, _>>()?;
    Ok(entries)
}
