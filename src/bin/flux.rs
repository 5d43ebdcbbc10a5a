//! Flux CLI - Command-line interface for Sensing Flux
//!
//! Commands:
//! - transform: Decode one raw event log into per-stream NDJSON plus a batch report
//! - validate: Check a raw event log against the raw record contract
//! - schema: Print the output relation registry
//! - rules: List the event types a platform rule table decodes

use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sensing_flux::config::{parse_log_level, parse_streams, parse_timezone, EngineConfig};
use sensing_flux::encoder::{NdjsonDirSink, NdjsonWriterSink};
use sensing_flux::error::{BatchError, ConfigError, FluxError, SinkError};
use sensing_flux::rules::RuleTable;
use sensing_flux::schema::{android_user_id_from_file_name, registry, ColumnType, RawBatch, Stream};
use sensing_flux::{EventTypeId, Platform, SensingProcessor, FLUX_VERSION};

/// Flux - Event decoding and normalization engine for mobile sensing logs
#[derive(Parser)]
#[command(name = "flux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Normalize iOS and Android sensing event logs into typed streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a raw event log into per-stream NDJSON
    Transform {
        /// Source platform of the log
        #[arg(short, long, value_enum)]
        platform: PlatformArg,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (use - for tagged NDJSON on stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Target timezone (IANA format, overrides FLUX_TIMEZONE)
        #[arg(long)]
        timezone: Option<String>,

        /// Comma-separated enabled streams (overrides FLUX_STREAMS)
        #[arg(long)]
        streams: Option<String>,

        /// Log level (overrides FLUX_LOG_LEVEL; RUST_LOG wins over both)
        #[arg(long)]
        log_level: Option<String>,

        /// User id for records without one (Android defaults to the file name)
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Validate a raw event log without decoding payloads
    Validate {
        /// Source platform of the log
        #[arg(short, long, value_enum)]
        platform: PlatformArg,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// User id for records without one (Android defaults to the file name)
        #[arg(long)]
        user_id: Option<String>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the output relation registry
    Schema {
        /// Stream to print (all streams when omitted)
        stream: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List supported event types of a platform
    Rules {
        /// Platform rule table to list
        #[arg(short, long, value_enum)]
        platform: PlatformArg,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    /// iOS event log (.db)
    Ios,
    /// Android event log (.dbr)
    Android,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Ios => Platform::Ios,
            PlatformArg::Android => Platform::Android,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one raw record per line)
    Ndjson,
    /// JSON array of raw records
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Transform {
            platform,
            input,
            output,
            input_format,
            timezone,
            streams,
            log_level,
            user_id,
        } => {
            let config = build_config(timezone.as_deref(), streams.as_deref(), log_level.as_deref())?;
            init_tracing(&config.log_level);
            cmd_transform(
                platform.into(),
                &input,
                &output,
                input_format,
                config,
                user_id.as_deref(),
            )
        }

        Commands::Validate {
            platform,
            input,
            input_format,
            user_id,
            json,
        } => cmd_validate(platform.into(), &input, input_format, user_id.as_deref(), json),

        Commands::Schema { stream, json } => cmd_schema(stream.as_deref(), json),

        Commands::Rules { platform, json } => cmd_rules(platform.into(), json),
    }
}

/// Environment configuration with command-line overrides applied
fn build_config(
    timezone: Option<&str>,
    streams: Option<&str>,
    log_level: Option<&str>,
) -> Result<EngineConfig, FluxCliError> {
    let mut config = EngineConfig::from_env()?;
    if let Some(tz) = timezone {
        config.timezone = parse_timezone(tz)?;
    }
    if let Some(list) = streams {
        config.enabled_streams = parse_streams(list)?;
    }
    if let Some(level) = log_level {
        config.log_level = parse_log_level(level)?;
    }
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn cmd_transform(
    platform: Platform,
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    config: EngineConfig,
    user_id: Option<&str>,
) -> Result<(), FluxCliError> {
    let batch = read_batch(platform, input, input_format, user_id)?;
    if batch.is_empty() {
        return Err(FluxCliError::NoEvents);
    }

    let processor = SensingProcessor::new(config);

    if is_stdio(output) {
        let mut sink = NdjsonWriterSink::new(io::stdout().lock());
        let (_, _, report) = processor.process_and_handoff(&batch, &mut sink)?;
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let mut sink = NdjsonDirSink::new(output)?;
        let (batch_output, _, report) = processor.process_and_handoff(&batch, &mut sink)?;
        let report_path = output.join(format!("report_{}.json", batch_output.batch_id));
        fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
        info!(report = %report_path.display(), "batch report written");
    }

    Ok(())
}

fn cmd_validate(
    platform: Platform,
    input: &Path,
    input_format: InputFormat,
    user_id: Option<&str>,
    json: bool,
) -> Result<(), FluxCliError> {
    let table = RuleTable::for_platform(platform);
    let report = match read_batch(platform, input, input_format, user_id) {
        Ok(batch) => {
            let mut event_types: BTreeMap<EventTypeId, usize> = BTreeMap::new();
            for record in &batch.records {
                *event_types.entry(record.event_type.clone()).or_default() += 1;
            }
            let unsupported = event_types
                .keys()
                .filter(|id| table.rule(id).is_none())
                .cloned()
                .collect();
            ValidationReport {
                platform,
                rule_table: table.version,
                total_records: batch.len(),
                event_types: event_types.into_iter().map(|(id, n)| (id.to_string(), n)).collect(),
                unsupported_event_types: unsupported,
                error: None,
            }
        }
        Err(FluxCliError::Batch(e)) => ValidationReport {
            platform,
            rule_table: table.version,
            total_records: 0,
            event_types: BTreeMap::new(),
            unsupported_event_types: Vec::new(),
            error: Some(e.to_string()),
        },
        Err(e) => return Err(e),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Platform:       {}", report.platform);
        println!("Rule table:     {}", report.rule_table);
        println!("Total records:  {}", report.total_records);

        if !report.event_types.is_empty() {
            println!("\nEvent types:");
            for (id, count) in &report.event_types {
                println!("  - {}: {} records", id, count);
            }
        }
        if !report.unsupported_event_types.is_empty() {
            let ids: Vec<String> = report
                .unsupported_event_types
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("\nSkipped (no rule): {}", ids.join(", "));
        }
        if let Some(error) = &report.error {
            println!("\nError: {}", error);
        }
    }

    match report.error {
        Some(_) => Err(FluxCliError::ValidationFailed),
        None => Ok(()),
    }
}

fn cmd_schema(stream: Option<&str>, json: bool) -> Result<(), FluxCliError> {
    let streams: Vec<Stream> = match stream {
        Some(name) => vec![name
            .parse::<Stream>()
            .map_err(|_| FluxCliError::UnknownStream(name.to_string()))?],
        None => Stream::ALL.to_vec(),
    };

    if json {
        let schema: BTreeMap<Stream, &[registry::Column]> =
            streams.iter().map(|s| (*s, s.columns())).collect();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    for (i, stream) in streams.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", stream);
        for column in stream.columns() {
            println!(
                "  {:<24} {:<10} {}",
                column.name,
                type_name(column.ty),
                if column.nullable { "null" } else { "not null" }
            );
        }
    }
    Ok(())
}

fn cmd_rules(platform: Platform, json: bool) -> Result<(), FluxCliError> {
    let table = RuleTable::for_platform(platform);
    let summaries = table.summaries();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("Rule table {} ({} rules)", table.version, summaries.len());
    for rule in &summaries {
        let streams: Vec<&str> = rule.streams.iter().map(|s| s.as_str()).collect();
        println!(
            "  {:>5}  {:<20} {:<14} {}",
            rule.event_type.to_string(),
            rule.name,
            rule.mode,
            if streams.is_empty() { "-".to_string() } else { streams.join(", ") }
        );
    }
    Ok(())
}

// Helper functions

fn is_stdio(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn read_batch(
    platform: Platform,
    input: &Path,
    input_format: InputFormat,
    user_id: Option<&str>,
) -> Result<RawBatch, FluxCliError> {
    let input_data = if is_stdio(input) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let derived_user = match (user_id, platform) {
        (None, Platform::Android) if !is_stdio(input) => {
            android_user_id_from_file_name(&input.to_string_lossy())
        }
        _ => None,
    };
    let default_user = user_id.or(derived_user.as_deref());

    let batch = match input_format {
        InputFormat::Ndjson => RawBatch::parse_ndjson(platform, &input_data, default_user)?,
        InputFormat::Json => RawBatch::parse_array(platform, &input_data, default_user)?,
    };

    Ok(if is_stdio(input) {
        batch
    } else {
        batch.with_source(input.to_string_lossy())
    })
}

fn type_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Timestamp => "timestamp",
        ColumnType::Text => "text",
        ColumnType::Float => "float",
        ColumnType::Int => "int",
        ColumnType::Bool => "bool",
        ColumnType::Json => "json",
    }
}

// Error types

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Batch(BatchError),
    Config(ConfigError),
    Sink(SinkError),
    Json(serde_json::Error),
    NoEvents,
    UnknownStream(String),
    ValidationFailed,
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<BatchError> for FluxCliError {
    fn from(e: BatchError) -> Self {
        FluxCliError::Batch(e)
    }
}

impl From<ConfigError> for FluxCliError {
    fn from(e: ConfigError) -> Self {
        FluxCliError::Config(e)
    }
}

impl From<SinkError> for FluxCliError {
    fn from(e: SinkError) -> Self {
        FluxCliError::Sink(e)
    }
}

impl From<FluxError> for FluxCliError {
    fn from(e: FluxError) -> Self {
        match e {
            FluxError::Batch(e) => FluxCliError::Batch(e),
            FluxError::Config(e) => FluxCliError::Config(e),
            FluxError::Sink(e) => FluxCliError::Sink(e),
        }
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Batch(e) => CliError {
                code: "INVALID_BATCH".to_string(),
                message: e.to_string(),
                hint: Some("Run 'flux validate' for details".to_string()),
            },
            FluxCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check FLUX_* environment variables and flags".to_string()),
            },
            FluxCliError::Sink(e) => CliError {
                code: "SINK_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the output directory is writable".to_string()),
            },
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FluxCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FluxCliError::UnknownStream(name) => CliError {
                code: "UNKNOWN_STREAM".to_string(),
                message: format!("Unknown stream: {}", name),
                hint: Some("Run 'flux schema' to list streams".to_string()),
            },
            FluxCliError::ValidationFailed => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: "Input is not a valid raw event log".to_string(),
                hint: Some("Fix the reported record and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    platform: Platform,
    rule_table: &'static str,
    total_records: usize,
    event_types: BTreeMap<String, usize>,
    unsupported_event_types: Vec<EventTypeId>,
    error: Option<String>,
}
