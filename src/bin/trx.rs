//! `trx`: send or receive raw PCM audio over TCP

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use audio_trx::{
    archive::WavArchive,
    audio::{list_devices, CpalCaptureOpener, CpalPlaybackOpener},
    cli::{init_logging, Cli, Command},
    config::{FileConfig, SessionConfig},
    lifecycle::{cancel_on_signal, CancelToken},
    receiver::AudioReceiver,
    sender::AudioSender,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file = FileConfig::discover(cli.config.as_deref())?;
    init_logging(&cli.log_level(&file), cli.quiet, cli.log_file(&file))?;

    let result = run(&cli, &file).await;
    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}

async fn run(cli: &Cli, file: &FileConfig) -> Result<()> {
    match &cli.command {
        Command::ListDevices { json } => print_devices(*json),
        Command::Transmit { .. } => transmit(cli.session_config(file)?).await,
        Command::Receive { .. } => receive(cli.session_config(file)?).await,
    }
}

fn print_devices(json: bool) -> Result<()> {
    let devices = list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    for device in &devices {
        println!("{}", device.describe());
    }
    Ok(())
}

async fn transmit(config: SessionConfig) -> Result<()> {
    let cancel = CancelToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let mut sender = AudioSender::new(config, CpalCaptureOpener::new(cancel.clone()), cancel);
    let summary = tokio::task::spawn_blocking(move || sender.run())
        .await
        .context("sender thread panicked")??;
    signals.abort();

    info!(
        chunks = summary.chunks_sent,
        bytes = summary.bytes_sent,
        "Transmit finished"
    );
    Ok(())
}

async fn receive(config: SessionConfig) -> Result<()> {
    let archive = match config.output {
        Some(ref path) => Some(WavArchive::create(path, config.rate, config.channels)?),
        None => None,
    };

    let cancel = CancelToken::new();
    let signals = cancel_on_signal(cancel.clone());

    let mut receiver = AudioReceiver::new(config, CpalPlaybackOpener::new(cancel.clone()), cancel);
    if let Some(archive) = archive {
        receiver = receiver.with_archive(archive);
    }

    let summary = tokio::task::spawn_blocking(move || receiver.run())
        .await
        .context("receiver thread panicked")??;
    signals.abort();

    info!(
        connections = summary.connections,
        chunks = summary.chunks_received,
        bytes = summary.bytes_received,
        "Receive finished"
    );
    Ok(())
}
