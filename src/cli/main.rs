//! CLI binary entry point for dwh-loader

#[cfg(feature = "cli")]
use chrono::NaiveDate;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use dwh_loader::cli::commands::calendar::{CalendarArgs, handle_calendar};
#[cfg(feature = "cli")]
use dwh_loader::cli::commands::init::{InitArgs, handle_init};
#[cfg(feature = "cli")]
use dwh_loader::cli::commands::load::{LoadArgs, handle_load};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "dwh-loader")]
#[command(about = "Resolve surrogate keys and load facts into a star-schema warehouse")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Load a JSON records file as one activity
    Load {
        /// Warehouse schema (schema.yaml)
        #[arg(long)]
        schema: PathBuf,
        /// Column mapping (mapping.yaml)
        #[arg(long)]
        mapping: PathBuf,
        /// Activity name or code
        #[arg(short, long)]
        activity: String,
        /// JSON array of records, or '-' for stdin
        #[arg(short, long)]
        input: String,
        /// Workspace directory holding .dwh-loader.toml
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        /// Document id reported in the output
        #[arg(long)]
        document_id: Option<String>,
    },
    /// Populate a calendar dimension
    Calendar {
        /// Calendar table name
        #[arg(short, long, default_value = "dim_date")]
        table: String,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
        /// Workspace directory holding .dwh-loader.toml
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },
    /// Write a sample .dwh-loader.toml
    Init {
        /// Workspace directory
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Load {
            schema,
            mapping,
            activity,
            input,
            workspace,
            document_id,
        } => handle_load(&LoadArgs {
            schema,
            mapping,
            activity,
            input,
            workspace,
            document_id,
        }),
        Commands::Calendar {
            table,
            from,
            to,
            workspace,
        } => handle_calendar(&CalendarArgs {
            table,
            from,
            to,
            workspace,
        }),
        Commands::Init { workspace, force } => handle_init(&InitArgs { workspace, force }),
    };

    result.map_err(anyhow::Error::from)
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
