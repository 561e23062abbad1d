//! slotdb demo - opens a database, loads a few rows and reads them back

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use slotdb::access::{DataType, Record, Value};
use slotdb::catalog::Column;
use slotdb::{Database, DatabaseConfig};
use std::path::PathBuf;

/// slotdb - an embedded single-file storage engine
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data file path
    #[arg(short = 'D', long, default_value = "./slotdb.db")]
    db_path: PathBuf,

    /// Number of pages held in the buffer cache
    #[arg(short, long, default_value = "1000")]
    cache_capacity: usize,

    /// Number of demo rows to insert
    #[arg(short, long, default_value = "100")]
    rows: i64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = DatabaseConfig {
        cache_capacity: args.cache_capacity,
        ..DatabaseConfig::default()
    };
    let db = Database::open(&args.db_path, config).context("Failed to open database")?;

    let stats = db.recovery_stats();
    println!(
        "Opened {} (redone {}, undone {}, rolled back {} transactions)",
        args.db_path.display(),
        stats.records_redone,
        stats.records_undone,
        stats.transactions_rolled_back
    );

    if db.table("users").is_err() {
        db.create_table(
            "users",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::varchar("name", 50),
                Column::new("age", DataType::Integer),
            ],
            Some(0),
        )
        .context("Failed to create users table")?;
    }

    let start = db.scan_table("users")?.len() as i64;
    let txn = db.begin()?;
    for id in start..start + args.rows {
        let record = Record::new(vec![
            Value::Integer(id),
            Value::Text(format!("user{}", id)),
            Value::Integer(20 + id % 50),
        ]);
        db.insert_record(txn, "users", &record)?;
    }
    db.commit(txn)?;

    let rows = db.scan_table("users")?;
    let pages = db.table("users")?.page_ids.len();
    println!("users: {} rows across {} pages", rows.len(), pages);

    if let Some((rid, record)) = db.lookup("users", start)? {
        let values: Vec<String> = record.values.iter().map(|v| v.to_string()).collect();
        println!("lookup id={} -> {} ({})", start, rid, values.join(", "));
    }

    let lsn = db.checkpoint()?;
    println!("Checkpoint written at {}", lsn);

    db.close().context("Failed to close database")?;
    Ok(())
}
