use clap::Parser;
use gatekeeper::commands::{CommandHandler, Operator};
use gatekeeper::config::{ConfigHandle, GatekeeperConfig};
use gatekeeper::context::GatekeeperContext;
use gatekeeper::heartbeat::HeartbeatReporter;
use gatekeeper::network::Server;
use log::{error, info};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of concurrent players
    #[arg(short, long, default_value = "32")]
    max_clients: usize,
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "gatekeeper.toml")]
    config: PathBuf,
    /// Name reported in heartbeats when stats.server-id is unset
    #[arg(long, default_value = "gatekeeper")]
    server_name: String,
}

/// Main-method of the application.
/// Loads configuration, starts the game-session server, heartbeat timer and
/// operator console, then waits for Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let created = !args.config.exists();
    let config = GatekeeperConfig::load_or_create(&args.config)?;

    let default_filter = if config.logging.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if created {
        info!("Wrote default configuration to {}", args.config.display());
    }
    if config.base_url().is_err() {
        info!("api.base-url is empty; connections are admitted unchecked until it is set");
    }

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::bind(&address, args.max_clients).await?;

    let ctx = GatekeeperContext::new(
        ConfigHandle::new(args.config.clone(), config),
        server.host_info(args.server_name),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = HeartbeatReporter::new(&ctx).spawn(ctx.config.clone(), shutdown_rx.clone());

    // Operator console
    let commands = CommandHandler::new(&ctx);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let console = Operator::console();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if !CommandHandler::accepts(&line) {
                println!("Unknown command. Type \"gatekeeper\" for help.");
                continue;
            }

            let commands = commands.clone();
            let console = console.clone();
            tokio::spawn(async move {
                for reply in commands.execute(&console, &line).await {
                    println!("{}", reply);
                }
            });
        }
    });

    info!("Gatekeeper enabled");

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(&ctx, shutdown_rx).await {
            error!("Server stopped with error: {}", e);
        }
    });

    let server_finished = tokio::select! {
        result = &mut server_handle => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
            true
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            false
        }
    };

    let _ = shutdown_tx.send(true);

    // Let the server tell its clients before the runtime goes away
    if !server_finished {
        if let Err(e) = server_handle.await {
            error!("Server task panicked: {}", e);
        }
    }

    if let Err(e) = heartbeat_handle.await {
        error!("Heartbeat task panicked: {}", e);
    }

    Ok(())
}
