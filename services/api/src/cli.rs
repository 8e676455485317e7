use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use schoolhub::config::AppConfig;
use schoolhub::error::AppError;
use schoolhub::store::{Database, SCHEMA_VERSION};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "schoolhub",
    about = "Run the school results and fee ledger service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Create or upgrade the SQLite schema and exit
    Migrate(MigrateArgs),
    /// Run an in-memory walkthrough of both pipelines and print a report
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the SQLite database file
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct MigrateArgs {
    /// Database file to migrate (defaults to SCHOOLHUB_DATABASE_PATH)
    #[arg(long)]
    database: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Migrate(args) => migrate(args),
        Command::Demo(args) => run_demo(args),
    }
}

fn migrate(args: MigrateArgs) -> Result<(), AppError> {
    let path = match args.database {
        Some(path) => path,
        None => AppConfig::load()?.storage.database_path,
    };
    let db = Database::open(&path)?;
    let version = db.schema_version()?;
    println!(
        "{} is at schema version {version} (supported: {SCHEMA_VERSION})",
        path.display()
    );
    Ok(())
}
