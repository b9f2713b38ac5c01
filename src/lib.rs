// Accident Report Normalizer - Core Library
// Turns the flat accident export into a normalized SQLite schema

pub mod config;
pub mod db;
pub mod entities;
pub mod linker;
pub mod pipeline;
pub mod quality;
pub mod referential;
pub mod schema;
pub mod staging;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{LoadConfig, SourceEncoding};
pub use db::{Cell, ColumnProfile, Database, LoadState, QueryResult};
pub use entities::{
    Cause, EntityCounts, KeyRegistry, Municipality, PoliceUnit, Vehicle, Victim, WeatherCondition,
};
pub use linker::{Accident, LinkCounts, RoadSegment, SegmentKey};
pub use pipeline::{LoadOutcome, LoadReport, Pipeline};
pub use quality::{IntegrityReport, QualityIssue, Severity};
pub use referential::LinkTableCounts;
pub use staging::StagingReport;

/// Library version, recorded with every load
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
