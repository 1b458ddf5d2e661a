//! simtrace-analyze: Query and analyze ingested trace databases
//!
//! This tool runs the built-in analyses and arbitrary SQL queries against a
//! database written by `simtrace`, supporting both one-shot queries and
//! interactive mode.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;

use simtrace::analyze::AnalyzeDb;
use simtrace::validate::validate_database;

#[derive(Parser)]
#[command(name = "simtrace-analyze")]
#[command(about = "Query and analyze ingested trace databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ingestion run, table sizes and timing bucket totals
    Summary {
        /// Path to the trace database
        #[arg(short, long)]
        database: PathBuf,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
    /// Merge instruction lifetimes of a compute unit into busy intervals
    Intervals {
        /// Path to the trace database
        #[arg(short, long)]
        database: PathBuf,

        /// Compute unit
        #[arg(long)]
        cu: u32,

        /// Only instructions of this unit action (e.g. "MEM LD")
        #[arg(long)]
        unit: Option<String>,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
    /// Memory access latency per module and access type
    Memory {
        /// Path to the trace database
        #[arg(short, long)]
        database: PathBuf,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
    /// Stage occupancy totals of a compute unit
    Stages {
        /// Path to the trace database
        #[arg(short, long)]
        database: PathBuf,

        /// Compute unit
        #[arg(long)]
        cu: u32,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
    /// Check a database for an incomplete run and inconsistent rows
    Validate {
        /// Path to the trace database
        #[arg(short, long)]
        database: PathBuf,
    },
    /// Run SQL queries against a trace database
    Query {
        /// Path to the trace database
        #[arg(short, long)]
        database: PathBuf,

        /// SQL query to execute (if not provided, starts interactive mode)
        #[arg(short, long)]
        sql: Option<String>,

        /// Output format: table, csv, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

/// Print rows in the requested format, with `value` used for json.
fn emit<T: Serialize>(
    format: &str,
    headers: &[&str],
    rows: Vec<Vec<String>>,
    value: &T,
) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        "csv" => {
            println!("{}", headers.join(","));
            for row in &rows {
                println!("{}", row.join(","));
            }
        }
        "table" => {
            let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
            print_table(&headers, &rows);
        }
        other => bail!("Unknown format: {other} (expected table, csv or json)"),
    }
    Ok(())
}

fn run_summary(database: &Path, format: &str) -> Result<()> {
    let db = AnalyzeDb::open(database)?;
    let summary = db.trace_summary()?;
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut rows = Vec::new();
    if let Some(run) = &summary.run {
        rows.push(vec!["trace".to_string(), run.trace.clone()]);
        rows.push(vec!["status".to_string(), run.status.as_str().to_string()]);
        rows.push(vec!["lines".to_string(), run.lines.to_string()]);
        rows.push(vec!["last_cycle".to_string(), run.last_cycle.to_string()]);
        rows.push(vec!["incomplete".to_string(), run.incomplete.to_string()]);
        rows.push(vec!["skipped_errors".to_string(), run.skipped_errors.to_string()]);
        if let Some(error) = &run.error {
            rows.push(vec!["error".to_string(), error.clone()]);
        }
    }
    for table in &summary.tables {
        rows.push(vec![format!("rows.{}", table.name), table.row_count.to_string()]);
    }
    let buckets = &summary.buckets;
    for (name, value) in [
        ("length", buckets.length),
        ("fetch", buckets.fetch),
        ("stall", buckets.stall),
        ("issue", buckets.issue),
        ("active", buckets.active),
    ] {
        rows.push(vec![format!("cycles.{name}"), value.to_string()]);
    }
    emit(format, &["key", "value"], rows, &summary)
}

fn run_intervals(database: &Path, cu: u32, unit: Option<&str>, format: &str) -> Result<()> {
    let db = AnalyzeDb::open(database)?;
    let busy = db.busy_intervals(cu, unit)?;
    let rows = busy
        .intervals
        .iter()
        .map(|i| vec![i.start.to_string(), i.end.to_string(), i.len().to_string()])
        .collect();
    emit(format, &["start", "end", "cycles"], rows, &busy)?;
    if format != "json" {
        eprintln!(
            "\ncu {}: {} instructions busy for {} cycles (last cycle {})",
            busy.cu, busy.instructions, busy.busy_cycles, busy.last_cycle
        );
    }
    Ok(())
}

fn run_memory(database: &Path, format: &str) -> Result<()> {
    let db = AnalyzeDb::open(database)?;
    let stats = db.memory_latency()?;
    let rows = stats
        .iter()
        .map(|s| {
            vec![
                s.module.clone(),
                s.access_type.clone(),
                s.count.to_string(),
                format!("{:.2}", s.mean),
                s.max.to_string(),
                s.total.to_string(),
                s.misses.to_string(),
            ]
        })
        .collect();
    emit(
        format,
        &["module", "access_type", "count", "mean", "max", "total", "misses"],
        rows,
        &stats,
    )
}

fn run_stages(database: &Path, cu: u32, format: &str) -> Result<()> {
    let db = AnalyzeDb::open(database)?;
    let totals = db.stage_totals(cu)?;
    let rows = totals
        .iter()
        .map(|t| vec![t.stage.clone(), t.total.to_string(), t.cycles.to_string()])
        .collect();
    emit(format, &["stage", "total", "cycles"], rows, &totals)
}

fn run_validate(database: &Path) -> Result<()> {
    if !database.exists() {
        bail!("Database not found: {}", database.display());
    }

    let result = validate_database(database);
    for warning in &result.warnings {
        eprintln!("Warning: {warning}");
    }
    for error in &result.errors {
        eprintln!("Error: {error}");
    }

    if result.is_valid() {
        println!("{}: OK", database.display());
        Ok(())
    } else {
        eprintln!(
            "\n{}: {} errors, {} warnings",
            database.display(),
            result.errors.len(),
            result.warnings.len()
        );
        process::exit(1);
    }
}

/// Run the query command
fn run_query(database: &Path, sql: Option<String>, format: &str) -> Result<()> {
    let db = AnalyzeDb::open(database)?;

    match sql {
        Some(query) => {
            execute_query(&db, &query, format)?;
        }
        None => {
            // Interactive mode
            run_interactive(&db, format)?;
        }
    }

    Ok(())
}

/// Execute a single query and display results
fn execute_query(db: &AnalyzeDb, sql: &str, format: &str) -> Result<()> {
    match format {
        "json" => {
            let result = db.query(sql)?;
            let json_rows: Vec<serde_json::Value> = result
                .rows
                .iter()
                .map(|row| {
                    let obj: serde_json::Map<String, serde_json::Value> = result
                        .columns
                        .iter()
                        .zip(row.iter())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    serde_json::Value::Object(obj)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json_rows)?);
            eprintln!("\n{} rows returned", result.row_count);
        }
        _ => {
            let (column_names, rows_data) = db.query_strings(sql)?;
            if format == "csv" {
                println!("{}", column_names.join(","));
                for row in &rows_data {
                    println!("{}", row.join(","));
                }
            } else {
                print_table(&column_names, &rows_data);
            }
            eprintln!("\n{} rows returned", rows_data.len());
        }
    }
    Ok(())
}

const MAX_COLUMN_WIDTH: usize = 50;

fn print_table(headers: &[String], rows: &[Vec<String>]) {
    if rows.is_empty() {
        println!("(no results)");
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in rows {
        for (i, val) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(val.chars().count());
            }
        }
    }

    for w in &mut widths {
        *w = (*w).min(MAX_COLUMN_WIDTH);
    }

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths.get(i).copied().unwrap_or(10)))
        .collect();
    println!("{}", header_line.join(" | "));

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", sep.join("-+-"));

    for row in rows {
        let row_line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let width = widths.get(i).copied().unwrap_or(10);
                let truncated = if v.chars().count() > width && width > 3 {
                    let head: String = v.chars().take(width - 3).collect();
                    format!("{head}...")
                } else {
                    v.clone()
                };
                format!("{truncated:width$}")
            })
            .collect();
        println!("{}", row_line.join(" | "));
    }
}

fn run_interactive(db: &AnalyzeDb, format: &str) -> Result<()> {
    use std::io::{self, BufRead, Write};

    eprintln!("simtrace-analyze interactive mode");
    eprintln!("Enter SQL queries (end with ';'), or 'quit' to exit.\n");

    eprintln!("Available tables:");
    for table in db.list_tables()? {
        eprintln!("  {} ({} rows)", table.name, table.row_count);
    }
    eprintln!();

    let stdin = io::stdin();
    let mut query_buffer = String::new();

    loop {
        let prompt = if query_buffer.is_empty() {
            "sql> "
        } else {
            "...> "
        };
        eprint!("{prompt}");
        io::stderr().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            break;
        }

        query_buffer.push_str(&line);

        if query_buffer.trim().ends_with(';') {
            let query = query_buffer.trim().trim_end_matches(';').to_string();
            query_buffer.clear();

            if !query.is_empty() {
                if let Err(e) = execute_query(db, &query, format) {
                    eprintln!("Error: {e}");
                }
            }
            println!();
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Summary { database, format } => run_summary(&database, &format),
        Commands::Intervals {
            database,
            cu,
            unit,
            format,
        } => run_intervals(&database, cu, unit.as_deref(), &format),
        Commands::Memory { database, format } => run_memory(&database, &format),
        Commands::Stages {
            database,
            cu,
            format,
        } => run_stages(&database, cu, &format),
        Commands::Validate { database } => run_validate(&database),
        Commands::Query {
            database,
            sql,
            format,
        } => run_query(&database, sql, &format),
    }
}
