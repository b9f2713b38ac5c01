// Normalized schema - target tables and their foreign keys
//
// Table and column names are the persisted layout the reporting dashboard
// queries against; they are part of the storage contract.

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::db::{count_rows, table_exists};

/// Terminal fact table; its population is the idempotence signal
pub const FACT_TABLE: &str = "Acidente";

/// Every normalized table, parents before children
pub const TABLES: [&str; 13] = [
    "Causa",
    "Veiculo",
    "Vitima",
    "Municipio",
    "Condicao_climatica",
    "Delegacia",
    "Trecho",
    "Tracado_via",
    "Acidente",
    "Envolveu_veiculo",
    "Envolveu_vitima",
    "Tem_causa",
    "Carga",
];

/// Full DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Causa (
    ID          INTEGER PRIMARY KEY,
    Descricao   TEXT NOT NULL UNIQUE
);

-- Source vehicle id is preserved as the key
CREATE TABLE IF NOT EXISTS Veiculo (
    ID              INTEGER PRIMARY KEY,
    Tipo            TEXT,
    Marca           TEXT,
    Ano_fabricacao  INTEGER
);

CREATE TABLE IF NOT EXISTS Vitima (
    ID      INTEGER PRIMARY KEY,
    Sexo    TEXT
);

CREATE TABLE IF NOT EXISTS Municipio (
    ID      INTEGER PRIMARY KEY,
    Nome    TEXT NOT NULL,
    UF      TEXT NOT NULL,
    UNIQUE (Nome, UF)
);

CREATE TABLE IF NOT EXISTS Condicao_climatica (
    ID          INTEGER PRIMARY KEY,
    Fase_dia    TEXT,
    Descricao   TEXT
);

CREATE TABLE IF NOT EXISTS Delegacia (
    ID          TEXT PRIMARY KEY,
    Regional    TEXT,
    UOP         TEXT
);

CREATE TABLE IF NOT EXISTS Trecho (
    ID          INTEGER PRIMARY KEY,
    Area_urbana BOOLEAN,
    Br          TEXT NOT NULL,
    Km          REAL NOT NULL,
    Tipo_pista  TEXT NOT NULL,
    Sentido_via TEXT NOT NULL,
    MID         INTEGER REFERENCES Municipio(ID)
);

-- Weak entity: identity is (segment, alignment type)
CREATE TABLE IF NOT EXISTS Tracado_via (
    TID     INTEGER NOT NULL REFERENCES Trecho(ID),
    Tipo    TEXT NOT NULL,
    PRIMARY KEY (TID, Tipo)
);

CREATE TABLE IF NOT EXISTS Acidente (
    ID              INTEGER PRIMARY KEY,
    Data            DATE NOT NULL,
    Horario         TIME NOT NULL,
    Latitude        REAL,
    Longitude       REAL,
    Classificacao   TEXT NOT NULL,
    TID             INTEGER REFERENCES Trecho(ID),
    CID             INTEGER REFERENCES Condicao_climatica(ID),
    DID             TEXT REFERENCES Delegacia(ID)
);

CREATE TABLE IF NOT EXISTS Envolveu_veiculo (
    VID     INTEGER NOT NULL REFERENCES Veiculo(ID),
    AID     INTEGER NOT NULL REFERENCES Acidente(ID),
    PRIMARY KEY (VID, AID)
);

CREATE TABLE IF NOT EXISTS Envolveu_vitima (
    PID             INTEGER NOT NULL REFERENCES Vitima(ID),
    AID             INTEGER NOT NULL REFERENCES Acidente(ID),
    Idade           INTEGER,
    Estado_fisico   TEXT,
    PRIMARY KEY (PID, AID)
);

CREATE TABLE IF NOT EXISTS Tem_causa (
    AID         INTEGER NOT NULL REFERENCES Acidente(ID),
    CID         INTEGER NOT NULL REFERENCES Causa(ID),
    Principal   BOOLEAN,
    PRIMARY KEY (AID, CID)
);

CREATE TABLE IF NOT EXISTS Carga (
    key     TEXT PRIMARY KEY,
    value   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trecho_mid ON Trecho(MID);
CREATE INDEX IF NOT EXISTS idx_acidente_tid ON Acidente(TID);
CREATE INDEX IF NOT EXISTS idx_envolveu_veiculo_aid ON Envolveu_veiculo(AID);
CREATE INDEX IF NOT EXISTS idx_envolveu_vitima_aid ON Envolveu_vitima(AID);
CREATE INDEX IF NOT EXISTS idx_tem_causa_cid ON Tem_causa(CID);
";

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("failed to create normalized schema")?;
    Ok(())
}

/// True when the fact table exists and holds at least one row
pub fn is_populated(conn: &Connection) -> Result<bool> {
    if !table_exists(conn, FACT_TABLE)? {
        return Ok(false);
    }
    Ok(count_rows(conn, FACT_TABLE)? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        create_schema(&conn).unwrap();

        for table in TABLES {
            assert!(table_exists(&conn, table).unwrap(), "missing table {}", table);
        }
    }

    #[test]
    fn test_empty_fact_table_is_not_populated() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!is_populated(&conn).unwrap());

        create_schema(&conn).unwrap();
        assert!(!is_populated(&conn).unwrap());

        conn.execute(
            "INSERT INTO Acidente (ID, Data, Horario, Classificacao) VALUES (1, '2024-01-01', '10:00:00', 'Sem Vítimas')",
            [],
        )
        .unwrap();
        assert!(is_populated(&conn).unwrap());
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        create_schema(&conn).unwrap();

        let result = conn.execute("INSERT INTO Tracado_via (TID, Tipo) VALUES (99, 'Reta')", []);
        assert!(result.is_err(), "dangling segment reference must be rejected");
    }
}
