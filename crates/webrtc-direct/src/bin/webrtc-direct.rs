//! webrtc-direct command line tool
//!
//! Usage:
//!   webrtc-direct listen /ip4/127.0.0.1/tcp/12345/http/p2p-webrtc-direct
//!   webrtc-direct dial /ip4/127.0.0.1/tcp/12345/http/p2p-webrtc-direct hello
//!
//! `listen` runs an echo server until Ctrl-C; `dial` sends one message and
//! prints the echo.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webrtc_direct::{
    ChannelConfig, Connection, ConnectionHandler, ListenerEvent, Multiaddr, WebRTCDirect,
    WebRTCDirectConfig,
};

#[derive(Parser)]
#[command(name = "webrtc-direct")]
#[command(version, about = "WebRTC-direct transport: dial and listen without a signaling server")]
struct Cli {
    /// STUN server to use (repeatable). Defaults to public servers.
    #[arg(long = "stun", global = true)]
    stun: Vec<String>,

    /// Do not use any STUN server (loopback/LAN only)
    #[arg(long, global = true)]
    no_stun: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen and echo every message back
    Listen {
        /// Address to listen on, e.g. /ip4/0.0.0.0/tcp/0/http/p2p-webrtc-direct
        addr: String,
    },
    /// Dial, send a message and print the reply
    Dial {
        addr: String,
        message: String,
        /// Give up after this many milliseconds
        #[arg(long, default_value_t = webrtc_direct::config::DEFAULT_DIAL_TIMEOUT_MS)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Default to info for this crate, override with RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("webrtc_direct=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut channel = if cli.no_stun {
        ChannelConfig::local_only()
    } else {
        ChannelConfig::default()
    };
    if !cli.stun.is_empty() {
        channel.stun_servers = cli.stun.clone();
    }

    match cli.command {
        Commands::Listen { addr } => {
            let addr = parse_addr(&addr)?;
            let transport = WebRTCDirect::new().with_config(WebRTCDirectConfig {
                channel,
                ..Default::default()
            });
            listen(&transport, &addr).await
        }
        Commands::Dial {
            addr,
            message,
            timeout_ms,
        } => {
            let addr = parse_addr(&addr)?;
            let transport = WebRTCDirect::new().with_config(WebRTCDirectConfig {
                channel,
                dial_timeout_ms: timeout_ms,
            });
            dial(&transport, &addr, message).await
        }
    }
}

fn parse_addr(s: &str) -> Result<Multiaddr> {
    s.parse()
        .with_context(|| format!("Invalid multiaddr: {}", s))
}

async fn listen(transport: &WebRTCDirect, addr: &Multiaddr) -> Result<()> {
    let handler: ConnectionHandler = Arc::new(|conn: Connection| {
        tokio::spawn(echo(conn));
    });
    let listener = transport
        .create_listener(transport.listener_options(), Some(handler))
        .context("Failed to create listener")?;
    let mut events = listener.subscribe();

    listener
        .listen(addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;

    for bound in listener.get_addrs() {
        println!("{}", bound);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ListenerEvent::Error(e)) => warn!("{}", e),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} listener events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    listener.close().await.context("Failed to close listener")?;
    Ok(())
}

async fn echo(conn: Connection) {
    while let Some(data) = conn.recv().await {
        if let Err(e) = conn.send(data).await {
            warn!("Echo failed: {}", e);
            break;
        }
    }
    conn.close().await;
}

async fn dial(transport: &WebRTCDirect, addr: &Multiaddr, message: String) -> Result<()> {
    if transport.filter([addr]).is_empty() {
        bail!("{} is not a webrtc-direct address", addr);
    }

    let conn = transport
        .dial(addr, transport.dial_options())
        .await
        .with_context(|| format!("Failed to dial {}", addr))?;

    conn.send(message).await.context("Failed to send")?;
    let reply = tokio::time::timeout(
        Duration::from_millis(transport.config().dial_timeout_ms),
        conn.recv(),
    )
    .await
    .context("Timed out waiting for reply")?;
    conn.close().await;

    match reply {
        Some(data) => {
            println!("{}", String::from_utf8_lossy(&data));
            Ok(())
        }
        None => bail!("Connection closed before a reply arrived"),
    }
}
