mod commands;
mod config;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use fieldsync_engine::{Disconnected, SyncEngine};
use fieldsync_storage::FileStore;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Offline form authoring and sync queue inspection.
#[derive(Parser)]
#[command(
    name = "fieldsync",
    version,
    about = "Offline form authoring and sync queue inspection"
)]
struct Cli {
    /// Config file (default: ./fieldsync.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local store file, overriding [store] path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new form instance offline
    New {
        /// Form type the instance is created from
        #[arg(long)]
        form_type: String,
        /// Form version hint
        #[arg(long)]
        form_version: Option<String>,
        /// JSON file holding the initial document
        #[arg(long)]
        payload: Option<PathBuf>,
        /// JSON file holding the form schema to cache
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Record a field edit and queue it
    Edit {
        /// Temporary or server id of the instance
        id: String,
        /// Section the field belongs to
        #[arg(long)]
        section: String,
        /// Field path as a JSON Pointer, e.g. /general/pressure
        path: String,
        /// New value as JSON; anything that is not valid JSON is taken as a string
        value: String,
    },

    /// List local instances
    Status,

    /// Show the creation queue and every patch queue
    Queue,

    /// Map a temporary id to its server id
    Resolve {
        id: String,
    },

    /// Abandon an instance whose creation has not been sent
    Discard {
        temp_id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to start runtime: {}", e), cli.output, cli.quiet);
            process::exit(1);
        }
    };
    let code = runtime.block_on(run(cli));
    process::exit(code);
}

/// Logs go to stderr; `RUST_LOG` overrides the default `warn` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> i32 {
    let config = match config::read_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            return 1;
        }
    };
    let store_path = cli.store.unwrap_or(config.store.path);
    let store = match FileStore::open(&store_path).await {
        Ok(store) => store,
        Err(e) => {
            let msg = format!("could not open store '{}': {}", store_path.display(), e);
            report_error(&msg, cli.output, cli.quiet);
            return 1;
        }
    };
    tracing::debug!(store = %store_path.display(), "store opened");

    // No transport is wired in: everything stays queued locally.
    let engine = SyncEngine::new(Arc::new(store), Arc::new(Disconnected), config.engine);
    let output = cli.output;

    let result = match cli.command {
        Commands::New {
            form_type,
            form_version,
            payload,
            schema,
        } => {
            commands::cmd_new(
                &engine,
                commands::NewArgs {
                    form_type,
                    form_version,
                    payload: payload.as_deref(),
                    schema: schema.as_deref(),
                },
                output,
            )
            .await
        }
        Commands::Edit {
            id,
            section,
            path,
            value,
        } => commands::cmd_edit(&engine, &id, &section, &path, &value, output).await,
        Commands::Status => commands::cmd_status(&engine, output).await,
        Commands::Queue => commands::cmd_queue(&engine, output).await,
        Commands::Resolve { id } => commands::cmd_resolve(&engine, &id, output).await,
        Commands::Discard { temp_id } => commands::cmd_discard(&engine, &temp_id, output).await,
    };
    engine.shutdown();

    match result {
        Ok(()) => 0,
        Err(msg) => {
            report_error(&msg, output, cli.quiet);
            1
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
