//! Binary entry point for the `runquery` CLI.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use runquery::config::{CliConfig, CONFIG_ENV};
use runquery::query::errors::QueryErrorWithCode;
use runquery::query::profile::profile_snapshot;
use runquery::query::{Executor, QueryError, QueryRequest};
use tracing_subscriber::{fmt, EnvFilter};

use ui::{Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "runquery",
    version,
    about = "Query experiment runs across relational fields, JSON blobs and artifacts",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = CONFIG_ENV,
        help = "Path to the CLI config file"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_enum, default_value_t = Theme::Auto, help = "Color theme")]
    theme: Theme,

    #[arg(long, global = true, help = "Only print results")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a request and print the result frame.
    Query(QueryCmd),
    /// Print the compiled statement and deferred work without executing.
    Explain(ExplainCmd),
    /// Inspect the CLI configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration.
    Show,
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[arg(value_name = "DB", help = "SQLite database (defaults to [database] default)")]
    db_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "JSON request document")]
    request: PathBuf,

    #[arg(long, value_name = "N", help = "Artifact loading threads")]
    workers: Option<usize>,

    #[arg(long, value_name = "DIR", help = "Base directory for relative artifact paths")]
    artifact_root: Option<PathBuf>,

    #[arg(long, help = "Remove runs rejected by deferred filters")]
    strict_filters: bool,
}

#[derive(Args, Debug)]
struct ExplainCmd {
    #[arg(value_name = "DB", help = "SQLite database (defaults to [database] default)")]
    db_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "JSON request document")]
    request: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        match err.downcast_ref::<QueryError>() {
            Some(query_err) => eprintln!("error: {}", QueryErrorWithCode(query_err)),
            None => eprintln!("error: {err}"),
        }
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env("RUNQUERY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    let ui = Ui::new(cli.theme, cli.quiet);

    match cli.command {
        Command::Query(cmd) => {
            let mut options = config.query_options();
            if let Some(workers) = cmd.workers {
                options.artifact_workers = workers.max(1);
            }
            if let Some(root) = cmd.artifact_root {
                options.artifact_root = Some(root);
            }
            if cmd.strict_filters {
                options.strict_filters = true;
            }
            let db_path = resolve_db(cmd.db_path, &config)?;
            let request = read_request(&cmd.request)?;
            let executor = Executor::open_sqlite(&db_path, options)?;
            let result = executor.execute(&request)?;
            let payload = serde_json::json!({
                "records": result.frame.to_records(),
                "stats": &result.stats,
                "profile": profile_snapshot(),
            });
            emit(cli.format, &payload, || {
                ui.table(&result.frame);
                ui.info(&format!(
                    "{} rows ({} relational, {} artifacts loaded)",
                    result.frame.num_rows(),
                    result.stats.relational_rows,
                    result.stats.artifacts_loaded
                ));
                for dropped in &result.stats.dropped_runs {
                    ui.warn(&format!("dropped run {}: {}", dropped.run_id, dropped.reason));
                }
                if let Some(profile) = profile_snapshot() {
                    ui.section(
                        "profile",
                        [
                            ("compile_ns", profile.compile_ns),
                            ("store_ns", profile.store_ns),
                            ("artifact_load_ns", profile.artifact_load_ns),
                            ("artifact_eval_ns", profile.artifact_eval_ns),
                            ("reconcile_ns", profile.reconcile_ns),
                        ],
                    );
                }
            })?;
        }
        Command::Explain(cmd) => {
            let db_path = resolve_db(cmd.db_path, &config)?;
            let request = read_request(&cmd.request)?;
            let executor = Executor::open_sqlite(&db_path, config.query_options())?;
            let explain = executor.explain(&request)?;
            emit(cli.format, &explain, || println!("{explain}"))?;
        }
        Command::Config {
            command: ConfigCommand::Show,
        } => {
            let options = config.query_options();
            let file_toml = config.to_toml()?;
            let payload = serde_json::json!({
                "path": config.path(),
                "database": config.default_db_path(),
                "options": &options,
                "file": config.data(),
            });
            emit(cli.format, &payload, || {
                let path = config
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<none>".into());
                let database = config
                    .default_db_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unset>".into());
                let root = options
                    .artifact_root
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<unset>".into());
                ui.section(
                    "config",
                    [
                        ("path", path),
                        ("database", database),
                        ("artifact_root", root),
                        ("artifact_workers", options.artifact_workers.to_string()),
                        ("busy_timeout_ms", options.busy_timeout_ms.to_string()),
                        ("strict_filters", options.strict_filters.to_string()),
                    ],
                );
                println!("\n{}", file_toml.trim_end());
            })?;
        }
    }
    Ok(())
}

fn resolve_db(explicit: Option<PathBuf>, config: &CliConfig) -> Result<PathBuf, QueryError> {
    explicit
        .or_else(|| config.default_db_path().cloned())
        .ok_or_else(|| {
            QueryError::Config("no database given and [database] default is unset".into())
        })
}

fn read_request(path: &Path) -> Result<QueryRequest, QueryError> {
    let text = fs::read_to_string(path).map_err(|err| {
        QueryError::validation("<request>", format!("cannot read {}: {err}", path.display()))
    })?;
    QueryRequest::from_json(&text)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}
