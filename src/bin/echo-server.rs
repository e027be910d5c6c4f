//! `echo-server`: answer each TCP connection with the bytes it sent

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use audio_trx::{constants::DEFAULT_ECHO_ADDR, echo::EchoServer, lifecycle::shutdown_signal};

/// One-shot TCP echo server
#[derive(Parser, Debug)]
#[command(name = "echo-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_ECHO_ADDR)]
    listen: String,

    /// Log debug messages also
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let server = EchoServer::bind(args.listen.as_str()).await?;
    server.run(shutdown_signal()).await?;
    Ok(())
}
