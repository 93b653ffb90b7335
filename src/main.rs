//! BlueRPC - Minimal endpoint RPC over stream sockets
//!
//! Runs a server with a few built-in endpoints, or calls an endpoint on
//! a running server.

use std::path::PathBuf;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bluerpc::config::{self, Config};
use bluerpc::discovery::MdnsAdvertiser;
use bluerpc::network::{Client, Server, TcpTransport};

/// BlueRPC - endpoint RPC over stream sockets
#[derive(Parser)]
#[command(name = "bluerpc")]
#[command(author = "BlueRPC Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Serve and call named endpoints over a stream socket", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server with the built-in endpoints
    Serve {
        /// Port to listen on (0 for any available)
        #[arg(short, long)]
        port: Option<u16>,

        /// Service name to advertise
        #[arg(short, long)]
        name: Option<String>,

        /// Do not advertise the service over mDNS
        #[arg(long)]
        no_discovery: bool,
    },

    /// Call an endpoint on a running server
    Call {
        /// Server address, e.g. 127.0.0.1:4000
        addr: String,

        /// Endpoint name
        endpoint: String,

        /// Payload text (must not contain NUL)
        #[arg(default_value = "")]
        payload: String,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            name,
            no_discovery,
        } => {
            run_server(config, port, name, !no_discovery).await?;
        }
        Commands::Call {
            addr,
            endpoint,
            payload,
        } => {
            run_call(&addr, &endpoint, &payload).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the server until Ctrl+C
async fn run_server(
    mut config: Config,
    port: Option<u16>,
    name: Option<String>,
    discovery: bool,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(name) = name {
        config.server.service_name = name;
    }

    let server_config = config.server_config();
    let mut server = Server::new(server_config, config.transport())?;

    if discovery && config.discovery.enabled {
        match MdnsAdvertiser::with_service_type(&config.discovery.service_type) {
            Ok(advertiser) => server = server.with_advertiser(advertiser),
            Err(e) => tracing::warn!("Service advertisement disabled: {}", e),
        }
    }

    register_builtin_endpoints(&mut server)?;

    server.start().await?;

    println!("\n========================================");
    println!("  BlueRPC Server Running");
    println!("========================================");
    println!("  Service: {}", server.config().service_name);
    println!("  ID: {}", server.service_id());
    println!("  Address: {}", server.local_address());
    println!("  Port: {}", server.local_port().unwrap_or_default());
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    server.stop().await?;
    Ok(())
}

fn register_builtin_endpoints(server: &mut Server<TcpTransport>) -> anyhow::Result<()> {
    server.register("echo", |payload: Bytes| async move { anyhow::Ok(payload) })?;

    server.register("upper", |payload: Bytes| async move {
        let text = std::str::from_utf8(&payload)?;
        anyhow::Ok(text.to_uppercase())
    })?;

    let info = json!({
        "service": server.config().service_name,
        "id": server.service_id(),
        "address": server.local_address(),
    });
    server.register("info", move |_payload: Bytes| {
        let info = info.clone();
        async move { anyhow::Ok(info) }
    })?;

    Ok(())
}

/// Perform one call and print the response
async fn run_call(addr: &str, endpoint: &str, payload: &str) -> anyhow::Result<()> {
    let mut client = Client::connect(addr).await?;
    let response = client.call(endpoint, payload.as_bytes()).await?;

    match std::str::from_utf8(&response) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{:?}", response),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["bluerpc", "call", "127.0.0.1:4000", "echo", "hi"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["bluerpc", "serve", "--port", "4000", "--no-discovery"]);
        assert!(cli.is_ok());
    }

    #[tokio::test]
    async fn test_builtin_endpoints() {
        let config = bluerpc::ServerConfig::new("cli-test", "cli-id");
        let mut server = Server::new(config, TcpTransport::localhost()).unwrap();
        register_builtin_endpoints(&mut server).unwrap();

        let upper = server.registry().dispatch("upper", Bytes::from_static(b"abc")).await;
        assert_eq!(upper.as_deref(), Some(&b"ABC"[..]));

        let info = server.registry().dispatch("info", Bytes::new()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&info).unwrap();
        assert_eq!(parsed["id"], "cli-id");
    }
}
