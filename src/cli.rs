use std::path::PathBuf;

use accident_normalizer::SourceEncoding;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "accident-normalizer")]
#[command(about = "Normalize the federal highway accident export into SQLite")]
pub struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "acidentes2024.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stage and normalize the export (no-op when already loaded)
    Load(LoadArgs),
    /// Show load state and recorded load metadata
    Status,
    /// Run a read-only SQL query and print the result as JSON
    Query(QueryArgs),
    /// Profile the columns of one table
    Describe(DescribeArgs),
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    #[arg(long, default_value = "acidentes2024_todas_causas_tipos.csv")]
    pub input: PathBuf,

    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    #[arg(long, value_enum, default_value_t = EncodingArg::Latin1)]
    pub encoding: EncodingArg,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(long)]
    pub sql: String,
}

#[derive(Args, Debug)]
pub struct DescribeArgs {
    #[arg(long)]
    pub table: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EncodingArg {
    Latin1,
    Utf8,
}

impl From<EncodingArg> for SourceEncoding {
    fn from(value: EncodingArg) -> Self {
        match value {
            EncodingArg::Latin1 => SourceEncoding::Latin1,
            EncodingArg::Utf8 => SourceEncoding::Utf8,
        }
    }
}
