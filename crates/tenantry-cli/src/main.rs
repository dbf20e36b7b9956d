//! Tenantry CLI - single entrypoint for the domain orchestrator
//!
//! Runs the HTTP API with its reconciliation ticker, a one-off
//! reconciliation pass, or an availability check from the shell.

mod commands;

use clap::{Parser, Subcommand};
use commands::{CheckCommand, ReconcileCommand, ServeCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TENANTRY_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "TENANTRY_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server and the reconciliation ticker
    Serve(ServeCommand),
    /// Run a single reconciliation pass and exit
    Reconcile(ReconcileCommand),
    /// Check whether a subdomain is available
    Check(CheckCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = cli.log_level.clone();

    // RUST_LOG takes over completely when set
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "tenantry={level},\
             tenantry_cli={level},\
             tenantry_core={level},\
             tenantry_domains={level},\
             tenantry_dns={level},\
             tenantry_proxy={level},\
             tenantry_registrar={level},\
             tenantry_audit={level},\
             tenantry_entities={level},\
             tenantry_database={level},\
             tenantry_migrations={level},\
             sqlx=warn,\
             sea_orm=warn,\
             h2=warn,\
             tower=warn,\
             hyper=warn,\
             reqwest=warn,\
             rustls=warn,\
             hickory_proto=warn,\
             hickory_resolver=warn",
            level = log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
        Commands::Reconcile(reconcile_cmd) => reconcile_cmd.execute(),
        Commands::Check(check_cmd) => check_cmd.execute(),
    }
}
