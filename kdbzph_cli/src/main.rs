mod repl;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kdbzph_session::batch::{self, BatchClient, ChartType, DEFAULT_ROW_LIMIT};
use kdbzph_session::config::{reconnect_policy, BackoffKind};
use kdbzph_session::connection::DEFAULT_RECONNECT_DELAY;
use kdbzph_session::{OrphanPolicy, SessionConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const HISTORY_FILE_NAME: &str = "history.json";

#[derive(Parser, Debug)]
#[command(name = "kdbzph", about = "Terminal client for a live query engine session")]
struct Args {
    /// Server root, e.g. http://127.0.0.1:5000 (overrides KDBZPH_SERVER).
    #[arg(long, global = true)]
    server: Option<String>,

    /// JSON file holding the REPL history (default: per-user data dir).
    #[arg(long, value_name = "PATH", global = true)]
    history_file: Option<PathBuf>,

    /// Keep history in memory only.
    #[arg(long, default_value_t = false, global = true, conflicts_with = "history_file")]
    no_history_file: bool,

    #[arg(long, value_name = "MS", global = true)]
    reconnect_ms: Option<u64>,

    /// fixed | exponential
    #[arg(long, global = true)]
    backoff: Option<BackoffKind>,

    /// display | discard
    #[arg(long, global = true)]
    orphans: Option<OrphanPolicy>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive live session (default).
    Repl,
    /// List tables.
    Tables,
    /// Show a table's schema.
    Meta { table: String },
    /// Show the first rows of a table.
    Data {
        table: String,
        #[arg(short = 'n', long = "rows", default_value_t = DEFAULT_ROW_LIMIT)]
        rows: usize,
    },
    /// Evaluate once over HTTP, outside the live session.
    Eval { expr: Vec<String> },
    /// Evaluate an expression returning plot traces.
    Plot {
        expr: Vec<String>,
        #[arg(long, default_value_t = ChartType::Line)]
        chart_type: ChartType,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    match args.command.unwrap_or(Command::Repl) {
        Command::Repl => repl::run(config).await,
        Command::Tables => {
            let tables = batch_client(&config)?.list_tables().await?;
            println!("{}", batch::render_tables(&tables));
            Ok(())
        }
        Command::Meta { table } => {
            let meta = batch_client(&config)?.table_meta(&table).await?;
            println!("{}", batch::render_schema(&table, &meta));
            Ok(())
        }
        Command::Data { table, rows } => {
            let data = batch_client(&config)?.table_data(&table, rows).await?;
            println!("{}", batch::render_data(&table, &data));
            Ok(())
        }
        Command::Eval { expr } => {
            let out = batch_client(&config)?.eval(&expr.join(" ")).await?;
            println!("{out}");
            Ok(())
        }
        Command::Plot { expr, chart_type } => {
            let traces = batch_client(&config)?
                .plot(&expr.join(" "), chart_type)
                .await?;
            println!("{}", batch::render_traces(&traces));
            Ok(())
        }
    }
}

/// Environment first, then flags on top.
fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = SessionConfig::from_env().context("invalid KDBZPH_* environment")?;

    if let Some(server) = args.server.as_deref() {
        config.set_server(server)?;
    }

    if args.no_history_file {
        config.history_file = None;
    } else if let Some(path) = &args.history_file {
        config.history_file = Some(path.clone());
    } else if config.history_file.is_none() {
        config.history_file =
            dirs::data_local_dir().map(|d| d.join("kdbzph").join(HISTORY_FILE_NAME));
    }

    if args.reconnect_ms.is_some() || args.backoff.is_some() {
        let delay = args
            .reconnect_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_DELAY);
        config.reconnect = reconnect_policy(args.backoff.unwrap_or_default(), delay);
    }

    if let Some(orphans) = args.orphans {
        config.orphans = orphans;
    }

    Ok(config)
}

fn batch_client(config: &SessionConfig) -> anyhow::Result<BatchClient> {
    Ok(BatchClient::new(config.http_url())?)
}
