use std::collections::HashMap;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use chat_pulse::channel::{spawn_channel, ChannelCommand};
use chat_pulse::classifier::ClassifierFactory;
use chat_pulse::config::Config;
use chat_pulse::sink::Dispatcher;
use chat_pulse::source::{decode_line, InboundEvent, RecordBuilder};

#[derive(Parser, Debug)]
#[command(name = "chat-pulse", about = "Live chat engagement metrics and alerts")]
struct Cli {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Read JSON-lines events from this file instead of stdin
    #[arg(short, long)]
    input: Option<String>,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("chat-pulse {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        instance = %config.agent.instance,
        "Starting chat-pulse"
    );

    let result = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            run(config, BufReader::new(file)).await
        }
        None => run(config, BufReader::new(tokio::io::stdin())).await,
    };

    if let Err(e) = result {
        error!(error = %e, "Terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.agent.log_level));

    // stdout carries the JSON-lines output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run<R>(config: Config, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let classifiers = ClassifierFactory::new(&config.classifier)?;
    let builder = RecordBuilder::new(&config.window, classifiers.heuristic());
    let mut dispatcher = Dispatcher::new(&config.sink, &config.agent.instance)?;

    let (output_tx, mut output_rx) = mpsc::channel(config.agent.channel_queue);
    let dispatch_handle = tokio::spawn(async move {
        while let Some(output) = output_rx.recv().await {
            dispatcher.dispatch(output).await;
        }
        info!(alerts = dispatcher.delivered(), "Dispatcher drained");
    });

    let mut workers = HashMap::new();
    let mut handles = Vec::new();
    let mut lines = input.lines();
    let mut rejected: u64 = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, draining channels");
                break;
            }
        };
        let Some(line) = line else {
            info!("Input closed, draining channels");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match decode_line(&line) {
            Ok(event) => event,
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "Skipping undecodable line");
                continue;
            }
        };

        let channel = event.channel().to_string();
        let command = match event {
            InboundEvent::Chat(chat) => match builder.build(chat) {
                Ok((_, record)) => ChannelCommand::Chat(record),
                Err(e) => {
                    rejected += 1;
                    warn!(channel = %channel, error = %e, "Rejected chat event");
                    continue;
                }
            },
            InboundEvent::Session(session) => {
                info!(channel = %channel, action = ?session.action, "Session boundary");
                ChannelCommand::Reset
            }
        };

        let tx = workers.entry(channel.clone()).or_insert_with(|| {
            let (tx, handle) = spawn_channel(&channel, &config, classifiers.gate(), output_tx.clone());
            handles.push(handle);
            tx
        });
        if tx.send(command).await.is_err() {
            warn!(channel = %channel, "Channel worker gone, dropping event");
        }
    }

    drop(workers);
    drop(output_tx);
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Channel worker panicked");
        }
    }
    dispatch_handle.await?;

    info!(rejected, "Shutdown complete");
    Ok(())
}
