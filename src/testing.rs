// Test fixtures - raw export rows and pre-staged databases

use std::collections::BTreeMap;

use crate::config::{LoadConfig, SourceEncoding};
use crate::db::Database;
use crate::staging::load_staging_from_reader;

/// Column order of the published export
pub const HEADER: [&str; 37] = [
    "id",
    "pesid",
    "data_inversa",
    "dia_semana",
    "horario",
    "uf",
    "br",
    "km",
    "municipio",
    "causa_principal",
    "causa_acidente",
    "ordem_tipo_acidente",
    "tipo_acidente",
    "classificacao_acidente",
    "fase_dia",
    "sentido_via",
    "condicao_metereologica",
    "tipo_pista",
    "tracado_via",
    "uso_solo",
    "id_veiculo",
    "tipo_veiculo",
    "marca",
    "ano_fabricacao_veiculo",
    "tipo_envolvido",
    "estado_fisico",
    "idade",
    "sexo",
    "ilesos",
    "feridos_leves",
    "feridos_graves",
    "mortos",
    "latitude",
    "longitude",
    "regional",
    "delegacia",
    "uop",
];

/// One denormalized export row with realistic defaults
#[derive(Debug, Clone)]
pub struct RawRow {
    fields: BTreeMap<&'static str, String>,
}

impl RawRow {
    pub fn new(accident_id: &str, vehicle_id: &str, victim_id: &str) -> Self {
        let defaults = [
            ("id", accident_id),
            ("pesid", victim_id),
            ("data_inversa", "2024-01-01"),
            ("dia_semana", "segunda-feira"),
            ("horario", "10:30:00"),
            ("uf", "SP"),
            ("br", "101"),
            ("km", "12,5"),
            ("municipio", "FOO"),
            ("causa_principal", "Sim"),
            ("causa_acidente", "Velocidade incompatível"),
            ("ordem_tipo_acidente", "1"),
            ("tipo_acidente", "Colisão traseira"),
            ("classificacao_acidente", "Com Vítimas Feridas"),
            ("fase_dia", "Pleno dia"),
            ("sentido_via", "Crescente"),
            ("condicao_metereologica", "Céu Claro"),
            ("tipo_pista", "Dupla"),
            ("tracado_via", "Reta"),
            ("uso_solo", "Sim"),
            ("id_veiculo", vehicle_id),
            ("tipo_veiculo", "Automóvel"),
            ("marca", "FIAT/UNO"),
            ("ano_fabricacao_veiculo", "2015"),
            ("tipo_envolvido", "Condutor"),
            ("estado_fisico", "Ileso"),
            ("idade", "35"),
            ("sexo", "Masculino"),
            ("ilesos", "1"),
            ("feridos_leves", "0"),
            ("feridos_graves", "0"),
            ("mortos", "0"),
            ("latitude", "-23,55"),
            ("longitude", "-46,63"),
            ("regional", "SPRF-SP"),
            ("delegacia", "DEL01-SP"),
            ("uop", "UOP01-DEL01-SP"),
        ];

        RawRow {
            fields: defaults.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        }
    }

    /// Override one column
    pub fn set(mut self, column: &'static str, value: &str) -> Self {
        assert!(HEADER.contains(&column), "unknown column {}", column);
        self.fields.insert(column, value.to_string());
        self
    }

    pub fn line(&self) -> String {
        HEADER
            .iter()
            .map(|column| self.fields.get(column).cloned().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Header plus one line per row, newline-terminated
pub fn csv_text(rows: &[RawRow]) -> String {
    let mut text = HEADER.join(";");
    text.push('\n');
    for row in rows {
        text.push_str(&row.line());
        text.push('\n');
    }
    text
}

pub fn utf8_config() -> LoadConfig {
    LoadConfig::default().with_encoding(SourceEncoding::Utf8)
}

/// In-memory database with `rows` already staged
pub fn staged(rows: &[RawRow]) -> Database {
    let mut db = Database::open_in_memory().expect("in-memory database");
    let text = csv_text(rows);
    load_staging_from_reader(&mut db, text.as_bytes(), &utf8_config()).expect("staging load");
    db
}

/// Staged database with the normalized tables created
pub fn staged_with_schema(rows: &[RawRow]) -> Database {
    let db = staged(rows);
    crate::schema::create_schema(db.connection()).expect("normalized schema");
    db
}
