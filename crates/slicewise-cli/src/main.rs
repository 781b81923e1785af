//! slicewise CLI: run a window operator over a CSV file.

mod input;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use slicewise_core::config::{EngineConfig, ExecutionMode};
use slicewise_core::id::OriginId;
use slicewise_exec::{JsonLinesSink, Runtime};
use slicewise_window::{TerminationMode, WindowDefinition, WindowOperator, WindowOperatorConfig};
use tracing_subscriber::EnvFilter;

use crate::input::CsvBatches;

#[derive(Parser)]
#[command(name = "slicewise")]
#[command(about = "slicewise: slice-based windowed aggregation over event streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a window operator over a CSV file and print window results as JSON lines
    Run {
        /// Window operator config (.yaml, .yml or .json)
        #[arg(short, long)]
        config: PathBuf,

        /// Headered CSV input
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker threads (overrides SLICEWISE_NUM_WORKERS)
        #[arg(long)]
        workers: Option<usize>,

        /// Execution mode: dynamic or static (overrides SLICEWISE_EXECUTION_MODE)
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Rows per submitted buffer
        #[arg(long, default_value_t = 1024)]
        batch_rows: usize,

        /// Watermark trails the largest timestamp seen by this much
        #[arg(long, default_value_t = 0)]
        watermark_lag_ms: u64,
    },

    /// Validate a window operator config and print its output schema
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            output,
            workers,
            mode,
            batch_rows,
            watermark_lag_ms,
        } => {
            if let Err(e) = run_operator(
                &config,
                &input,
                output.as_deref(),
                workers,
                mode,
                batch_rows,
                watermark_lag_ms,
            ) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { config } => match load_definition(&config) {
            Ok(def) => {
                println!("✓ Window operator config is valid");
                println!("  Windows: {}", def.assigner);
                println!("  Action: {}", def.action);
                println!("  Output columns:");
                for field in &def.output_schema().fields {
                    println!("    {} ({:?})", field.name, field.data_type);
                }
            }
            Err(e) => {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_definition(path: &Path) -> Result<WindowDefinition, Box<dyn std::error::Error>> {
    Ok(WindowOperatorConfig::from_path(path)?.build()?)
}

fn engine_config(workers: Option<usize>, mode: Option<ExecutionMode>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(n) = workers {
        config.num_workers = n;
    }
    if let Some(mode) = mode {
        config.execution_mode = mode;
    }
    config
}

fn run_operator(
    config_path: &Path,
    input_path: &Path,
    output: Option<&Path>,
    workers: Option<usize>,
    mode: Option<ExecutionMode>,
    batch_rows: usize,
    watermark_lag_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let def = load_definition(config_path)?;
    let ts_field = def.timestamp_field.clone();
    let origin = def.origins.first().copied().unwrap_or(OriginId::new(0));

    let writer: Box<dyn Write + Send> = match output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };
    let sink = Arc::new(JsonLinesSink::to_writer(writer, &def));
    let op = Arc::new(WindowOperator::new(def, sink)?);
    let running = Runtime::new(engine_config(workers, mode), op)?.start()?;

    let mut batches = CsvBatches::new(File::open(input_path)?, batch_rows)?;
    let mut max_ts = 0u64;
    let mut seq = 0u64;
    let mut submitted = Ok(());
    while let Some(batch) = batches.next_batch()? {
        let ts_col = batch
            .column(&ts_field)
            .ok_or_else(|| format!("input has no '{ts_field}' column"))?;
        max_ts = ts_col
            .values
            .iter()
            .filter_map(|v| v.as_timestamp())
            .fold(max_ts, u64::max);
        seq += 1;
        let watermark = max_ts.saturating_sub(watermark_lag_ms);
        submitted = running.submit(origin, seq, watermark, batch);
        if submitted.is_err() {
            break;
        }
    }

    let mode = if submitted.is_ok() {
        TerminationMode::Graceful
    } else {
        TerminationMode::Hard
    };
    let summary = running.stop(mode)?;
    submitted?;

    eprintln!("✓ Run finished");
    eprintln!("  Buffers: {}", summary.buffers());
    eprintln!("  Records: {}", summary.records());
    eprintln!("  Late records dropped: {}", summary.late_records());
    eprintln!("  Duration: {}ms", summary.elapsed_ms);
    for escalation in &summary.escalations {
        eprintln!("  Escalated: {}", escalation);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_env_defaults() {
        let config = engine_config(Some(2), Some(ExecutionMode::Static));
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.execution_mode, ExecutionMode::Static);
    }

    #[test]
    fn run_and_validate_parse() {
        let cli = Cli::try_parse_from([
            "slicewise",
            "run",
            "--config",
            "op.yaml",
            "--input",
            "in.csv",
            "--mode",
            "static",
            "--watermark-lag-ms",
            "250",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run {
                mode,
                watermark_lag_ms,
                batch_rows,
                ..
            } => {
                assert_eq!(mode, Some(ExecutionMode::Static));
                assert_eq!(watermark_lag_ms, 250);
                assert_eq!(batch_rows, 1024);
            }
            Commands::Validate { .. } => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["slicewise", "validate"]).is_err());
    }
}
