use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use formkit::{App, AppOptions};
use runtime::{AppConfig, CliArgs, Mode};
use std::net::SocketAddr;
use std::path::PathBuf;

mod routes;

const TAG: &str = "formkit-demo";

/// Formkit demo server - validated routes with uniform JSON responses
#[derive(Parser)]
#[command(name = "formkit-demo")]
#[command(about = "Formkit demo server - validated routes with uniform JSON responses")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Runtime mode: development | production (overrides config)
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Check configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        mode: cli.mode,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging_config = config
        .logging
        .clone()
        .unwrap_or_else(runtime::default_logging_config);
    let base_dir = std::env::current_dir().context("cannot resolve working directory")?;
    runtime::logging::init_logging_from_config(&logging_config, &base_dir);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(&config),
    }
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))
}

async fn run_server(config: AppConfig) -> Result<()> {
    let server = &config.server;
    tracing::info!(tag = TAG, mode = %server.mode, "Formkit demo starting");

    let mut app: App = App::new(AppOptions::from(server));
    routes::register(&mut app);

    let addr = resolve_addr(&server.host, server.port).await?;
    app.listen_on(addr, |bound| {
        // Failures are already logged.
        let _ = bound.save_api_doc();
        tracing::info!(tag = TAG, "Running on {}!", bound.local_addr());
    })
    .await
    .context("HTTP server failed")
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!(tag = TAG, "Checking configuration...");
    println!("Configuration check passed");
    println!("Server config:");
    println!("{}", config.to_yaml()?);
    Ok(())
}
