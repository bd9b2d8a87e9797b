//! Command-line front end for arbor tree files.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use arbor::cli::commands::{DeleteReport, InfoReport, InsertReport};
use arbor::cli::{CliConfig, CliError, OutputFormat, Row, Session};
use arbor::storage::btree::{TableStats, TreeInfo, VerifyReport};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "arbor",
    version,
    about = "Inspect and edit B+ tree tuple files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "ARBOR_CONFIG",
        value_name = "FILE",
        help = "Configuration file (defaults to <config dir>/arbor/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Buffer pool size in pages")]
    cache_pages: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Output format for results")]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty tree file.
    Create {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(
            long,
            value_name = "name:type,...",
            help = "Columns, e.g. id:integer,name:varchar(32)"
        )]
        columns: String,
        #[arg(long, help = "Leading columns forming the key (default: all)")]
        key_columns: Option<usize>,
        #[arg(long, help = "Page size in bytes, a power of two from 512 to 65536")]
        page_size: Option<usize>,
    },
    /// Insert rows given as comma separated values; NULL stores a null.
    Insert {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(value_name = "ROW", required = true)]
        rows: Vec<String>,
    },
    /// Print the first tuple whose key starts with KEY.
    Get {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Delete the tuples with the given keys.
    Delete {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(value_name = "KEY", required = true)]
        keys: Vec<String>,
    },
    /// Print tuples in key order.
    Scan {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(long, value_name = "KEY", help = "Start at the first key not below KEY")]
        from: Option<String>,
        #[arg(long, help = "Stop after this many tuples")]
        limit: Option<usize>,
    },
    /// Check every structural invariant; exits with status 2 on findings.
    Verify {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Show header fields and stored statistics.
    Info {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Recompute and store table statistics.
    Analyze {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ARBOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = CliConfig::load(cli.config)?;
    let format = cli.format.or(config.output).unwrap_or_default();
    let session = Session::new(&config, cli.cache_pages);

    match cli.command {
        Command::Create {
            path,
            columns,
            key_columns,
            page_size,
        } => {
            let info = session.create(&path, &columns, key_columns, page_size)?;
            emit(format, &info, || print_info_text(&info, None))?;
        }
        Command::Insert { path, rows } => {
            let report = session.insert(&path, &rows)?;
            emit(format, &report, || print_insert_text(&report))?;
        }
        Command::Get { path, key } => match session.get(&path, &key)? {
            Some(row) => emit(format, &row, || print_rows_text(std::slice::from_ref(&row)))?,
            None => emit(format, &serde_json::Value::Null, || println!("not found"))?,
        },
        Command::Delete { path, keys } => {
            let report = session.delete(&path, &keys)?;
            emit(format, &report, || print_delete_text(&report))?;
        }
        Command::Scan { path, from, limit } => {
            let rows = session.scan(&path, from.as_deref(), limit)?;
            emit(format, &rows, || print_rows_text(&rows))?;
        }
        Command::Verify { path } => {
            let report = session.verify(&path)?;
            emit(format, &report, || print_verify_text(&report))?;
            if !report.is_clean() {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Info { path } => {
            let report = session.info(&path)?;
            emit(format, &report, || print_info_report(&report))?;
        }
        Command::Analyze { path } => {
            let stats = session.analyze(&path)?;
            emit(format, &stats, || print_stats_text(&stats))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), CliError>
where
    T: serde::Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_rows_text(rows: &[Row]) {
    for row in rows {
        println!("{} {}", row.pointer, row.tuple());
    }
}

fn print_insert_text(report: &InsertReport) {
    println!("inserted {} row(s)", report.inserted);
}

fn print_delete_text(report: &DeleteReport) {
    println!("deleted {} row(s)", report.deleted);
    for key in &report.missing {
        println!("  not found: {key}");
    }
}

fn print_verify_text(report: &VerifyReport) {
    if report.is_clean() {
        println!("ok: {} pages checked", report.pages);
        return;
    }
    println!("{} problem(s) in {} pages:", report.diagnostics.len(), report.pages);
    for line in &report.diagnostics {
        println!("- {line}");
    }
}

fn print_info_text(info: &TreeInfo, stats: Option<&TableStats>) {
    println!("schema:         {}", info.schema);
    println!("key columns:    {}", info.key_columns);
    println!("page size:      {}", info.page_size);
    println!("pages:          {}", info.num_pages);
    println!("root:           {}", info.root);
    println!("first leaf:     {}", info.first_leaf);
    println!("free list head: {}", info.free_list_head);
    println!("max tuple:      {} bytes", info.max_tuple_len);
    if let Some(stats) = stats {
        println!();
        print_stats_text(stats);
    }
}

fn print_info_report(report: &InfoReport) {
    print_info_text(&report.tree, report.table_stats.as_ref());
}

fn print_stats_text(stats: &TableStats) {
    println!(
        "tuples={} depth={} leaf_pages={} inner_pages={} empty_pages={}",
        stats.num_tuples, stats.depth, stats.leaf_pages, stats.inner_pages, stats.empty_pages
    );
    println!(
        "avg_tuple_size={:.1} avg_leaf_fill={:.1}%",
        stats.avg_tuple_size,
        stats.avg_leaf_fill * 100.0
    );
}
