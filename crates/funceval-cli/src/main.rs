use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::debug;

mod commands;
mod hex;
mod type_syntax;

/// Build and inspect func-eval wire data.
///
/// The debugger side of a func-eval speaks two formats: the varint request
/// buffer it writes into the suspended process, and the 16-byte command
/// records exchanged around it. This tool produces and decodes both.
///
/// EXAMPLES:
///     funceval encode add.toml              Print a request buffer as hex
///     funceval decode request.hex --json    Show a request buffer as JSON
///     funceval command 0000000001000000...  Explain a command record
///
/// ENVIRONMENT VARIABLES:
///     FUNCEVAL_LOG              Default log filter
///     FUNCEVAL_MAX_PARAMETERS   Override the decoder's parameter limit
#[derive(Parser)]
#[command(name = "funceval")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v debug, -vv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Explicit log level, overriding -v and -q
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a request buffer from a TOML description
    ///
    /// EXAMPLES:
    ///     funceval encode add.toml
    ///     funceval encode add.toml --out add.hex
    #[command(visible_alias = "e")]
    Encode {
        /// Request description
        file: PathBuf,
        /// Write the hex here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Decode a hex request buffer
    ///
    /// EXAMPLES:
    ///     funceval decode add.hex
    ///     funceval decode add.hex --json
    #[command(visible_alias = "d")]
    Decode {
        /// File holding the buffer as hex
        file: PathBuf,
        /// Output as JSON
        #[arg(long, env = "FUNCEVAL_JSON")]
        json: bool,
    },

    /// Decode a 16-byte command record given as hex
    #[command(visible_alias = "c")]
    Command {
        /// 32 hex digits
        record: String,
        /// Output as JSON
        #[arg(long, env = "FUNCEVAL_JSON")]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = funceval_config::ConfigLoader::new()
        .load_from_directory(&std::env::current_dir()?)?;
    setup_logging(cli.verbose, cli.quiet, cli.log_level, &config.engine.logging.level);
    if let Some(source) = &config.source {
        debug!(path = %source.display(), "loaded configuration");
    }

    match cli.command {
        Commands::Encode { file, out } => commands::encode::run(&file, out.as_deref()),
        Commands::Decode { file, json } => {
            commands::decode::run(&file, json, &config.engine.limits)
        }
        Commands::Command { record, json } => commands::command::run(&record, json),
    }
}

fn setup_logging(verbose: u8, quiet: bool, log_level: Option<LogLevel>, configured: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if let Some(level) = log_level {
        EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    } else if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new(configured),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();
}
