mod cli;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use accident_normalizer::pipeline::load_metadata;
use accident_normalizer::{Database, LoadConfig, LoadOutcome, Pipeline};

use crate::cli::{Cli, Commands, DescribeArgs, LoadArgs, QueryArgs};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut db = Database::open(&cli.db)?;

    match cli.command {
        Commands::Load(args) => run_load(&mut db, args),
        Commands::Status => run_status(&db),
        Commands::Query(args) => run_query(&db, args),
        Commands::Describe(args) => run_describe(&db, args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_load(db: &mut Database, args: LoadArgs) -> Result<()> {
    let config = LoadConfig::default()
        .with_encoding(args.encoding.into())
        .with_batch_size(args.batch_size);

    match Pipeline::new(config).run(db, &args.input)? {
        LoadOutcome::AlreadyComplete => info!("nothing to do"),
        LoadOutcome::Loaded(report) => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn run_status(db: &Database) -> Result<()> {
    let status = serde_json::json!({
        "state": db.state()?.as_str(),
        "load": load_metadata(db.connection())?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

// Queries only make sense against a completed load
fn run_query(db: &Database, args: QueryArgs) -> Result<()> {
    if !db.is_complete()? {
        bail!("database is {}, run `load` first", db.state()?.as_str());
    }
    let result = db.execute(&args.sql)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_describe(db: &Database, args: DescribeArgs) -> Result<()> {
    let (rows, columns) = db.shape(&args.table)?;
    let profile = db.column_profile(&args.table)?;
    let description = serde_json::json!({
        "table": args.table,
        "rows": rows,
        "columns": columns,
        "profile": profile,
    });
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}
