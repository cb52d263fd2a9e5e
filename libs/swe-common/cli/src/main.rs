use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use swe_common::{BinaryEncoding, DataEncoding, TextEncoding};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod inspect;
mod transcode;

#[derive(Parser, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(
        long,
        global = true,
        value_enum,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace)"
    )]
    log_level: LogLevel,
}

#[derive(Subcommand, Clone)]
enum Commands {
    #[command(about = "Print the component tree of a schema document")]
    Inspect(InspectArgs),
    #[command(about = "Re-encode a record stream from one encoding to another")]
    Transcode(TranscodeArgs),
}

#[derive(clap::Args, Clone, Debug)]
struct InspectArgs {
    #[clap(help = "Path to the KDL schema document")]
    schema: PathBuf,
    #[clap(long, help = "Print the schema and its encodings as JSON")]
    json: bool,
}

#[derive(clap::Args, Clone, Debug)]
struct TranscodeArgs {
    #[clap(help = "Path to the KDL schema document")]
    schema: PathBuf,
    #[clap(long, value_enum, help = "Encoding of the input stream")]
    from: EncodingKind,
    #[clap(long, value_enum, help = "Encoding of the output stream")]
    to: EncodingKind,
    #[clap(help = "Input file, stdin when omitted")]
    input: Option<PathBuf>,
    #[clap(help = "Output file, stdout when omitted")]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum EncodingKind {
    Text,
    Binary,
}

impl EncodingKind {
    /// First encoding of this kind declared in the document, or the default one.
    fn select(self, declared: &[DataEncoding]) -> DataEncoding {
        let found = declared.iter().find(|e| {
            matches!(
                (self, e),
                (EncodingKind::Text, DataEncoding::Text(_))
                    | (EncodingKind::Binary, DataEncoding::Binary(_))
            )
        });
        match (found, self) {
            (Some(encoding), _) => encoding.clone(),
            (None, EncodingKind::Text) => {
                info!("no text encoding declared, using defaults");
                TextEncoding::default().into()
            }
            (None, EncodingKind::Binary) => {
                info!("no binary encoding declared, using natural types");
                BinaryEncoding::default().into()
            }
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn main() -> miette::Result<()> {
    let args = Cli::parse();
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::builder().from_env_lossy()
    } else {
        let level = args.log_level.as_str();
        EnvFilter::builder().parse_lossy(format!("swe_cli={level},swe_common={level}"))
    };

    let _ = tracing_subscriber::fmt::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        ))
        .try_init();

    match args.command {
        Commands::Inspect(InspectArgs { schema, json }) => {
            let (schema, encodings) = swe_common_kdl::read_document(&schema)?;
            let mut stdout = std::io::stdout();
            if json {
                let inspection = inspect::Inspection {
                    schema: &schema,
                    encodings: &encodings,
                };
                let json = serde_json::to_string_pretty(&inspection).into_diagnostic()?;
                writeln!(stdout, "{json}").into_diagnostic()?;
            } else {
                write!(stdout, "{}", inspect::render_tree(&schema)).into_diagnostic()?;
                for encoding in &encodings {
                    let kind = match encoding {
                        DataEncoding::Text(_) => "text",
                        DataEncoding::Binary(_) => "binary",
                    };
                    writeln!(stdout, "encoding {kind}").into_diagnostic()?;
                }
            }
            Ok(())
        }
        Commands::Transcode(TranscodeArgs {
            schema,
            from,
            to,
            input,
            output,
        }) => {
            let (schema, encodings) = swe_common_kdl::read_document(&schema)?;
            let from = from.select(&encodings);
            let to = to.select(&encodings);
            let summary = match output {
                Some(path) => {
                    let output = BufWriter::new(File::create(&path).into_diagnostic()?);
                    run_transcode(schema, from, to, input, output)?
                }
                None => run_transcode(schema, from, to, input, BufWriter::new(std::io::stdout()))?,
            };
            eprintln!(
                "{} records converted, {} rejected",
                summary.converted, summary.rejected
            );
            Ok(())
        }
    }
}

fn run_transcode(
    schema: swe_common::Component,
    from: DataEncoding,
    to: DataEncoding,
    input: Option<PathBuf>,
    output: impl Write + Send + 'static,
) -> miette::Result<transcode::Summary> {
    let summary = match input {
        Some(path) => {
            let input = BufReader::new(File::open(&path).into_diagnostic()?);
            transcode::transcode(schema, from, to, input, output)?
        }
        None => transcode::transcode(schema, from, to, BufReader::new(std::io::stdin()), output)?,
    };
    Ok(summary)
}
