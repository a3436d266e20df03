//! Command implementations for the segbase CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use serde_json::Value;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::{DatabaseConfig, IndexSpec, SegmentSize};
use crate::database::{CONFIG_FILE, Database};
use crate::error::{Result, SegbaseError};
use crate::storage::Storage;
use crate::storage::file::{FileStorage, FileStorageConfig};

/// Execute a CLI command.
pub fn execute_command(args: SegbaseArgs) -> Result<()> {
    match &args.command {
        Command::Load(load_args) => load(load_args.clone(), &args),
        Command::Find(find_args) => find(find_args.clone(), &args),
        Command::Stats(stats_args) => show_stats(stats_args.clone(), &args),
    }
}

fn open_storage(dir: &Path) -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(FileStorage::new(dir, FileStorageConfig::default())?))
}

fn open_existing(dir: &Path) -> Result<Database> {
    let storage = open_storage(dir)?;
    if !storage.file_exists(CONFIG_FILE) {
        return Err(SegbaseError::invalid_operation(format!(
            "no database in {}",
            dir.display()
        )));
    }
    Database::open(storage)
}

fn new_config(args: &LoadArgs) -> DatabaseConfig {
    let mut size = match args.segment_bytes {
        Some(bytes) => SegmentSize::with_segment_size_bytes(bytes),
        None => SegmentSize::default(),
    };
    if let Some(limit) = args.upper_limit {
        size = size.with_upper_conversion_limit(limit);
    }
    let mut config = DatabaseConfig::new(args.name.clone()).with_segment_size(size);
    for index in &args.indexes {
        config = config.with_index(IndexSpec {
            name: index.name.clone(),
            field: Some(index.field.clone()),
        });
    }
    config
}

/// Bulk-load a JSON lines file in deferred update mode.
fn load(args: LoadArgs, cli_args: &SegbaseArgs) -> Result<()> {
    if cli_args.verbosity() > 1 {
        println!("Loading records from: {}", args.file.display());
        println!("Into database: {}", args.dir.display());
    }

    let storage = open_storage(&args.dir)?;
    let mut db = Database::open_or_create(storage, new_config(&args))?;
    for index in &args.indexes {
        if db.index(&index.name).is_none() {
            info!("adding index {} over field {}", index.name, index.field);
            db.add_index(IndexSpec {
                name: index.name.clone(),
                field: Some(index.field.clone()),
            })?;
        }
    }

    let start_time = Instant::now();
    let first_record = db.high_record_number().map_or(0, |high| high + 1);
    let mut records_loaded = 0;
    let mut lines_skipped = 0;

    db.set_defer_update()?;
    let reader = BufReader::new(File::open(&args.file)?);
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = serde_json::from_str::<Value>(&line) {
            warn!("skipping line {}: {e}", line_num + 1);
            lines_skipped += 1;
            continue;
        }
        db.put_record(line.into_bytes())?;
        records_loaded += 1;
    }
    db.do_final_segment_deferred_updates()?;
    db.unset_defer_update();
    db.flush()?;

    let duration = start_time.elapsed();
    output_result(
        "Records loaded",
        &LoadResult {
            records_loaded,
            lines_skipped,
            first_record_number: first_record,
            duration_ms: duration.as_millis() as u64,
            records_per_second: if duration.as_secs_f64() > 0.0 {
                records_loaded as f64 / duration.as_secs_f64()
            } else {
                0.0
            },
        },
        cli_args,
    )
}

/// Look up a key in an index.
fn find(args: FindArgs, cli_args: &SegbaseArgs) -> Result<()> {
    let db = open_existing(&args.dir)?;
    let recordset = db.recordset_for_key(&args.index, args.value.as_bytes())?;
    let limit = args.limit.unwrap_or(usize::MAX);
    let record_numbers: Vec<u64> = recordset.record_numbers().take(limit).collect();

    let records = if args.records {
        let mut records = Vec::with_capacity(record_numbers.len());
        for record_number in &record_numbers {
            if let Some(bytes) = db.record(*record_number) {
                records.push(serde_json::from_slice::<Value>(bytes)?);
            }
        }
        Some(records)
    } else {
        None
    };

    output_result(
        &format!("Records filed under {}={}", args.index, args.value),
        &FindResult {
            index: args.index.clone(),
            value: args.value.clone(),
            total: recordset.count_records(),
            record_numbers,
            records,
        },
        cli_args,
    )
}

/// Show record, segment and page counts.
fn show_stats(args: StatsArgs, cli_args: &SegbaseArgs) -> Result<()> {
    if cli_args.verbosity() > 1 {
        println!("Gathering statistics for: {}", args.dir.display());
    }
    let db = open_existing(&args.dir)?;
    output_result("Database statistics", &db.stats(), cli_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::TempDir;

    fn run(argv: &[&str]) -> Result<()> {
        let mut full = vec!["segbase", "-q", "-f", "json"];
        full.extend_from_slice(argv);
        execute_command(SegbaseArgs::try_parse_from(full).unwrap())
    }

    #[test]
    fn test_load_then_find() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("db");
        let file = temp_dir.path().join("games.jsonl");
        let mut out = File::create(&file).unwrap();
        for i in 0..50 {
            let result = if i % 2 == 0 { "win" } else { "loss" };
            writeln!(out, r#"{{"game":{i},"result":"{result}"}}"#).unwrap();
        }
        writeln!(out, "not json").unwrap();
        drop(out);

        let dir_arg = dir.to_str().unwrap();
        let file_arg = file.to_str().unwrap();
        run(&["load", dir_arg, file_arg, "--index", "result=result", "--segment-bytes", "2"]).unwrap();
        run(&["find", dir_arg, "result", "win"]).unwrap();
        run(&["stats", dir_arg]).unwrap();

        let db = open_existing(&dir).unwrap();
        assert_eq!(db.record_count(), 50);
        let wins = db.recordset_for_key("result", b"win").unwrap();
        assert_eq!(wins.count_records(), 25);
        assert!(wins.record_numbers().all(|rn| rn % 2 == 0));
    }

    #[test]
    fn test_find_requires_database() {
        let temp_dir = TempDir::new().unwrap();
        let dir_arg = temp_dir.path().to_str().unwrap();
        assert!(run(&["find", dir_arg, "result", "win"]).is_err());
    }
}
