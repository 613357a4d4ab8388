//! CLI tool to stream one table of a COPY dump through its transformers.
//!
//! Usage:
//!   rowmask-run --config users.json users.copy -o masked.copy
//!   pg_dump ... | rowmask-run --config users.json > masked.copy

use clap::Parser;
use rowmask::logging::{self, LogFormat};
use rowmask::{
    CancelToken, PipelineError, PipelineStats, TableConfig, TransformationPipeline, TypeRegistry,
    build_condition, build_transformers,
};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process;

/// Anonymize PostgreSQL COPY text data with configured transformers.
#[derive(Parser)]
#[command(name = "rowmask-run")]
struct Cli {
    /// Table configuration file (JSON)
    #[arg(short, long)]
    config: String,

    /// Input COPY data (default: stdin)
    input: Option<String>,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Show paths, windows, and row counts on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);

    if cli.verbose {
        eprintln!("Config: {}", cli.config);
        eprintln!("Input:  {}", cli.input.as_deref().unwrap_or("(stdin)"));
        eprintln!("Output: {}", cli.output.as_deref().unwrap_or("(stdout)"));
    }

    match run(&cli) {
        Ok(stats) => {
            if cli.verbose {
                eprintln!("Rows:   {} ({} passed through)", stats.rows, stats.skipped);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn open_input(path: Option<&str>) -> io::Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    })
}

fn open_output(path: Option<&str>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            Box::new(BufWriter::new(File::create(path)?))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn run(cli: &Cli) -> Result<PipelineStats, PipelineError> {
    let config = TableConfig::load(&cli.config)?;
    let label = format!("{}.{}", config.schema, config.name);
    let cancel = CancelToken::new();

    let (driver, warnings) = config.driver(&TypeRegistry::postgres())?;
    warnings.log(&label);

    let transformers = build_transformers(&config, &driver, &cancel)?;
    let mut pipeline = TransformationPipeline::new(driver.clone(), transformers, cancel);
    if let Some(when) = &config.when {
        pipeline = pipeline.with_when(build_condition(when, &driver)?);
    }
    pipeline.ordering_warnings().log(&label);
    if cli.verbose {
        eprintln!("Windows: {:?}", pipeline.window_plan());
    }

    pipeline.init()?;
    let reader = open_input(cli.input.as_deref())?;
    let writer = open_output(cli.output.as_deref())?;
    let stats = pipeline.run(reader, writer)?;
    pipeline.done()?;
    Ok(stats)
}
