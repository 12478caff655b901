//! # Echo Server Demo
//!
//! A minimal stand-in for a real command-and-control peer: binds a
//! [`CommandServer`] that echoes whatever string it is sent on command id
//! 100, and a [`Publisher`] that emits a heartbeat on `health/heartbeat`
//! every second.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use commsrt::command_server::{CommandServer, CommandServerObserver, ServerConfig};
use commsrt::identity::HostIdentity;
use commsrt::publisher::Publisher;
use commsrt::transport::tcp::{TcpPublishSocket, TcpReplySocket};
use commsrt::logging::ColorizedFormatter;
use commsrt::transport::TransportConfig;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

#[derive(Parser, Debug)]
#[command(name = "echo-server", about = "Demo command server and heartbeat publisher")]
struct Args {
    /// Address the command server binds to.
    #[arg(long, default_value = "127.0.0.1:7878")]
    endpoint: String,

    /// Address the heartbeat publisher binds to.
    #[arg(long, default_value = "127.0.0.1:7879")]
    pubsub_endpoint: String,

    /// Increase logging verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress stdout logging entirely.
    #[arg(short, long)]
    quiet: bool,
}

struct LoggingObserver;

impl CommandServerObserver for LoggingObserver {
    fn on_start(&self) {
        info!("echo server started");
    }
    fn on_connected(&self, client_id: &str) {
        info!(client_id, "client connected");
    }
    fn on_disconnected(&self, client_id: &str) {
        info!(client_id, "client disconnected");
    }
    fn on_dead_client(&self, client_id: &str) {
        info!(client_id, "client swept as dead");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry().with(stdout_log).init();

    let transport_config = TransportConfig::default();
    let mut server = CommandServer::new(
        ServerConfig::default(),
        TcpReplySocket::default(),
        Arc::new(LoggingObserver),
    );

    server.register_command(100, |text: String| async move { Ok(text) });

    server.start(&args.endpoint).await?;
    info!(endpoint = %args.endpoint, "command server listening");

    let mut publisher = Publisher::new(TcpPublishSocket::default(), HostIdentity::new("echo-server", "", None));
    publisher.start(&args.pubsub_endpoint, &transport_config).await?;
    info!(endpoint = %args.pubsub_endpoint, "heartbeat publisher bound");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        publisher.send("health/heartbeat", &"alive".to_string()).await?;
    }
}
