/*!
 * Ferry CLI - Command Line Interface
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry::{
    cli_style::{self, link_summary, Theme},
    config::FerryConfig,
    credentials::{Credential, CredentialProvider, EnvCredentials, StaticCredentials},
    error::{RelayError, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS},
    link::LinkGenerator,
    logging,
    orchestrator::{RelayOptions, RelayOrchestrator},
    progress::{StatusSurface, TerminalSurface},
    registry::RelayRegistry,
    server::{self, AppState},
    store::{ObjectStore, S3Store},
    transport::{FsTransport, HttpTransport, SourceTransport},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about = "Relay files to S3-compatible storage and hand out streaming links", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the configured bucket is reachable
    Probe,

    /// Relay local files or URLs and print their links
    Relay {
        /// Local paths or http(s) URLs
        #[arg(required = true)]
        sources: Vec<String>,

        /// Override the file name (single source only)
        #[arg(long)]
        name: Option<String>,

        /// Print link records as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Issue fresh links for objects already in the bucket
    Relink {
        /// Object names as they were relayed
        #[arg(required = true)]
        names: Vec<String>,

        /// Print link records as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Serve the registry query API
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        #[arg(default_value = "ferry.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<RelayError>()
                .map(RelayError::exit_code)
                .unwrap_or(EXIT_FATAL);
            cli_style::print_error(&format!("{:#}", e), None);
            code
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if let Commands::Config(ConfigCommands::Init { path, force }) = &cli.command {
        return init_config(path, *force);
    }

    let mut config = FerryConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.verbose {
        config.logging.verbose = true;
    }
    logging::init_logging(&config.logging)?;

    match cli.command {
        Commands::Probe => probe(&config).await,
        Commands::Relay {
            sources,
            name,
            json,
        } => relay(&config, sources, name, json).await,
        Commands::Relink { names, json } => relink(&config, names, json).await,
        Commands::Serve { bind } => serve(&config, bind).await,
        Commands::Config(_) => Ok(EXIT_SUCCESS),
    }
}

fn init_config(path: &PathBuf, force: bool) -> anyhow::Result<i32> {
    if path.exists() && !force {
        cli_style::print_error(
            &format!("{} already exists", path.display()),
            Some("pass --force to overwrite it"),
        );
        return Ok(EXIT_FATAL);
    }
    FerryConfig::default().save(path)?;
    cli_style::print_success(&format!("Wrote default configuration to {}", path.display()));
    cli_style::print_info("Set store.bucket (or FERRY_BUCKET) before relaying.");
    Ok(EXIT_SUCCESS)
}

async fn connect_store(config: &FerryConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let explicit = match (&config.store.access_key, &config.store.secret_key) {
        (Some(ak), Some(sk)) => Some(StaticCredentials::new(Credential::new(ak, sk))),
        _ => None,
    };

    let store = if let Some(provider) = explicit {
        S3Store::connect(&config.store, Some(&provider)).await?
    } else if EnvCredentials.credential().await.is_ok() {
        S3Store::connect(&config.store, Some(&EnvCredentials)).await?
    } else {
        // fall through to the SDK provider chain (profiles, IMDS, SSO)
        S3Store::connect(&config.store, None).await?
    };
    Ok(Arc::new(store))
}

async fn build_orchestrator(config: &FerryConfig) -> anyhow::Result<RelayOrchestrator> {
    let store = connect_store(config).await?;
    let transport = Arc::new(SourceTransport::new(
        FsTransport::new(config.relay.download_chunk_size),
        HttpTransport::default(),
    ));
    let player_base = url::Url::parse(&config.links.player_base_url)?;
    let links = LinkGenerator::new(
        Arc::clone(&store),
        config.links.access_policy()?,
        player_base,
    );
    let registry = Arc::new(RelayRegistry::with_system_clock(config.registry.retention()));

    let orchestrator = RelayOrchestrator::connect(
        store,
        transport,
        links,
        registry,
        RelayOptions::from_config(config),
    )
    .await?;
    Ok(orchestrator)
}

async fn probe(config: &FerryConfig) -> anyhow::Result<i32> {
    build_orchestrator(config).await?;
    cli_style::print_success(&format!("Bucket {} is reachable", config.store.bucket));
    Ok(EXIT_SUCCESS)
}

async fn relay(
    config: &FerryConfig,
    sources: Vec<String>,
    name: Option<String>,
    json: bool,
) -> anyhow::Result<i32> {
    if name.is_some() && sources.len() > 1 {
        anyhow::bail!("--name can only be used with a single source");
    }

    let orchestrator = build_orchestrator(config).await?;
    let surface: Arc<dyn StatusSurface> = Arc::new(TerminalSurface::stderr());
    let mut failures = 0usize;

    for source in &sources {
        tokio::select! {
            result = orchestrator.relay_source(source, name.clone(), Arc::clone(&surface)) => {
                match result {
                    Ok(record) => {
                        if json {
                            println!("{}", serde_json::to_string_pretty(&record)?);
                        } else {
                            println!("{}", link_summary(&record));
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        cli_style::print_error(&format!("{}: {}", source, e.user_message()), None);
                        if e.is_fatal() {
                            return Ok(e.exit_code());
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                cli_style::print_warning("Interrupted; temporary files removed");
                return Ok(EXIT_PARTIAL);
            }
        }
    }

    if failures > 0 {
        eprintln!(
            "{}",
            Theme::muted(format!("{} of {} relays failed", failures, sources.len()))
        );
        Ok(EXIT_PARTIAL)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

async fn relink(config: &FerryConfig, names: Vec<String>, json: bool) -> anyhow::Result<i32> {
    let orchestrator = build_orchestrator(config).await?;
    let mut failures = 0usize;

    for name in &names {
        match orchestrator.relink(name).await {
            Ok(record) if json => println!("{}", serde_json::to_string_pretty(&record)?),
            Ok(record) => println!("{}", link_summary(&record)),
            Err(e) => {
                failures += 1;
                cli_style::print_error(&format!("{}: {}", name, e.user_message()), None);
            }
        }
    }

    Ok(if failures > 0 { EXIT_PARTIAL } else { EXIT_SUCCESS })
}

async fn serve(config: &FerryConfig, bind: Option<SocketAddr>) -> anyhow::Result<i32> {
    let orchestrator = Arc::new(build_orchestrator(config).await?);
    let addr = bind.unwrap_or(config.server.bind);
    let state = AppState::new(orchestrator).with_local_sources(config.server.allow_local_sources);

    server::run_server(addr, state, config.registry.sweep_interval(), async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await
    .with_context(|| format!("server on {} failed", addr))?;
    Ok(EXIT_SUCCESS)
}
