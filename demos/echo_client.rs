//! # Echo Client Demo
//!
//! Connects to the echo server demo, sends one echo command per line read
//! from stdin (or a fixed burst if `--message` is given), and subscribes
//! to the heartbeat topic, logging each heartbeat it sees.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use commsrt::command_client::{ClientConfig, CommandClient};
use commsrt::identity::HostIdentity;
use commsrt::subscriber::{ErrorPolicy, NullSubscriberObserver, Subscriber};
use commsrt::transport::tcp::{TcpRequestSocket, TcpSubscribeSocket};
use commsrt::transport::TransportConfig;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use commsrt::logging::ColorizedFormatter;

#[derive(Parser, Debug)]
#[command(name = "echo-client", about = "Demo command client and heartbeat subscriber")]
struct Args {
    /// Address of the echo server's command channel.
    #[arg(long, default_value = "127.0.0.1:7878")]
    endpoint: String,

    /// Address of the echo server's heartbeat publisher.
    #[arg(long, default_value = "127.0.0.1:7879")]
    pubsub_endpoint: String,

    /// Message to echo. When omitted, sends a single fixed message.
    #[arg(long, default_value = "hello from echo-client")]
    message: String,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long)]
    quiet: bool,
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

    let identity = HostIdentity::new("echo-client", "", None);
    let mut client = CommandClient::new(
        ClientConfig::default(),
        TcpRequestSocket::default(),
        identity.clone(),
        Arc::new(commsrt::command_client::NullClientObserver),
    );
    client.start(&args.endpoint).await?;
    info!(endpoint = %args.endpoint, "connected to echo server");

    let reply: String = client.send_command(100, args.message.clone()).await?;
    info!(sent = %args.message, received = %reply, "echo round trip complete");

    let mut subscriber = Subscriber::new(
        TcpSubscribeSocket::default(),
        Arc::new(NullSubscriberObserver),
        ErrorPolicy::EmitEvent,
    );
    subscriber
        .start(&args.pubsub_endpoint, &TransportConfig::default())
        .await?;
    subscriber
        .register_topic_handler("health/heartbeat", |payload: String| async move {
            info!(payload, "heartbeat received");
            Ok(())
        })
        .await;
    subscriber.subscribe("health/").await?;

    tokio::time::sleep(Duration::from_secs(5)).await;

    subscriber.stop().await?;
    client.stop().await?;
    Ok(())
}
