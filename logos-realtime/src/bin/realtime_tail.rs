//! realtime-tail — print events from a Logos realtime stream.
//!
//! Subscribes to the given topics and writes every envelope to stdout as one
//! JSON line. Connection state transitions go to the log (stderr). Set
//! `RUST_LOG=logos_realtime=debug` for transport details.

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;

use logos_realtime::{ClientConfig, ConnectionStatus, Envelope, RealtimeClient, TransportKind};

#[derive(Debug, Parser)]
#[command(name = "realtime-tail", about = "Tail a Logos realtime event stream")]
struct Args {
    /// Stream endpoint (ws://, wss://, http:// or https://)
    #[arg(long, env = "LOGOS_REALTIME_URL")]
    url: Option<String>,

    /// Topics to subscribe to
    #[arg(short, long = "topic", required = true)]
    topics: Vec<String>,

    /// Bearer token sent when connecting
    #[arg(long, env = "LOGOS_REALTIME_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Force the SSE transport (default: chosen from the URL scheme)
    #[arg(long, conflicts_with = "websocket")]
    sse: bool,

    /// Force the WebSocket transport
    #[arg(long)]
    websocket: bool,

    /// JSON configuration file; command-line flags override it
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Stop auto-retrying after this many consecutive failures (0 = never stop)
    #[arg(long)]
    max_attempts: Option<u32>,
}

fn load_config(args: &Args) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => ClientConfig::default(),
    };

    if let Some(url) = &args.url {
        config.url = url.clone();
        config.transport = if url.starts_with("http://") || url.starts_with("https://") {
            TransportKind::Sse
        } else {
            TransportKind::WebSocket
        };
    }
    if args.sse {
        config.transport = TransportKind::Sse;
    }
    if args.websocket {
        config.transport = TransportKind::WebSocket;
    }
    if let Some(token) = &args.token {
        config.auth_token = Some(token.clone());
    }
    if let Some(max) = args.max_attempts {
        config.max_attempts = (max > 0).then_some(max);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let client = match RealtimeClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not start client: {e}");
            std::process::exit(1);
        }
    };

    let _status = client.on_state_change(|state| match (state.status, &state.error) {
        (ConnectionStatus::Connected, _) => info!("live"),
        (ConnectionStatus::Connecting, _) => info!("connecting (attempt {})", state.attempt + 1),
        (ConnectionStatus::Disconnected, Some(err)) => match state.retry_in {
            Some(delay) => warn!("offline: {err}; retrying in {} ms", delay.as_millis()),
            None => warn!("offline: {err}"),
        },
        (ConnectionStatus::Disconnected, None) => info!("offline"),
    });

    // Stdout writes happen on one task so lines never interleave.
    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = lines_rx.recv().await {
            println!("{line}");
        }
    });

    let subscriptions: Vec<_> = args
        .topics
        .iter()
        .map(|topic| {
            let lines = lines_tx.clone();
            client.subscribe(topic.clone(), move |event: &Envelope| {
                match event.encode() {
                    Ok(line) => {
                        let _ = lines.send(line);
                    }
                    Err(e) => warn!("Could not encode {} event: {e}", event.event_type),
                }
            })
        })
        .collect();
    drop(lines_tx);
    info!("Subscribed to {} topic(s)", subscriptions.len());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {e}");
    }

    info!("Shutting down");
    client.destroy();
    drop(subscriptions);
    let _ = printer.await;

    let metrics = client.metrics();
    info!(
        "{} messages, {} connection attempts ({} ok, {} failed)",
        metrics.messages_received,
        metrics.connection_attempts,
        metrics.successful_connections,
        metrics.failed_connections
    );
}
