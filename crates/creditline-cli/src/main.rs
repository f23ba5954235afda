//! Creditline CLI
//!
//! Runs request/reply scenarios against a credit-flow server on an
//! in-process network.

mod config;
mod scenario;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use config::Config;
use scenario::{AwolReport, Exchange, ServerReport};

/// Creditline - credit-flow request/reply messaging
#[derive(Parser)]
#[command(name = "creditline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send requests to a server and print the replies
    RoundTrip {
        /// Number of requests
        #[arg(short, long)]
        requests: Option<usize>,

        /// Request body
        #[arg(short, long)]
        body: Option<String>,
    },

    /// A client vanishes mid-exchange, then fresh clients are served
    Awol {
        /// Replies the server sends the vanishing client
        #[arg(long)]
        replies: Option<usize>,

        /// Fresh clients served afterwards
        #[arg(long)]
        clients: Option<usize>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    match &cli.command {
        Commands::RoundTrip { requests, body } => {
            if let Some(requests) = requests {
                config.scenario.requests = *requests;
            }
            if let Some(body) = body {
                config.scenario.body.clone_from(body);
            }
        }
        Commands::Awol { replies, clients } => {
            if let Some(replies) = replies {
                config.scenario.replies = *replies;
            }
            if let Some(clients) = clients {
                config.scenario.clients = *clients;
            }
        }
        Commands::ShowConfig => {}
    }

    // Validate configuration
    config.validate()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        })
        .init();

    match cli.command {
        Commands::RoundTrip { .. } => round_trip(&config).await?,
        Commands::Awol { .. } => awol(&config).await?,
        Commands::ShowConfig => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

/// Run the round-trip scenario
async fn round_trip(config: &Config) -> anyhow::Result<()> {
    tracing::info!(
        "Round trip: {} request(s), body {:?}",
        config.scenario.requests,
        config.scenario.body
    );

    let (exchanges, server) = scenario::run_round_trip(config).await?;

    print_exchanges(&exchanges);
    print_server(&server);
    Ok(())
}

/// Run the vanished-client scenario
async fn awol(config: &Config) -> anyhow::Result<()> {
    tracing::info!(
        "Awol: {} repl(ies), {} taken, {} fresh client(s)",
        config.scenario.replies,
        config.scenario.taken,
        config.scenario.clients
    );

    let AwolReport {
        taken,
        exchanges,
        server,
    } = scenario::run_awol(config).await?;

    println!("Vanishing client took {} repl(ies):", taken.len());
    for reply in &taken {
        println!("  {}", reply.trim_end());
    }
    println!();
    print_exchanges(&exchanges);
    print_server(&server);
    Ok(())
}

fn print_exchanges(exchanges: &[Exchange]) {
    println!("Exchanges:");
    for exchange in exchanges {
        println!(
            "  {}: {:?} -> {:?}",
            exchange.client, exchange.request, exchange.reply
        );
    }
    println!();
}

fn print_server(report: &ServerReport) {
    println!("Server:");
    println!("  Requests handled: {}", report.handled);
    println!("  Unknown outcomes: {}", report.unknown_outcomes);
    println!("  Auto-settled: {}", report.auto_settled);
    println!("  Unsettled at shutdown: {}", report.unsettled);
}
