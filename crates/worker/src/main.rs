//! capsync worker entry point.
//!
//! Reads Control Channel requests from stdin, one JSON object per line, and
//! writes replies and `SYNC_COMPLETE` broadcasts to stdout the same way.
//! Logging goes to stderr to keep stdout clean for the protocol.

use std::sync::Arc;

use anyhow::{Context, Result};
use capsync_client::{FetchConfig, HttpNetwork};
use capsync_core::AppConfig;
use capsync_worker::Worker;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(origin = %config.origin, version = %config.cache_version, "starting capsync worker");

    let network = HttpNetwork::new(FetchConfig::from(&config))?;
    let worker = Worker::start(config, Arc::new(network)).await?;

    let (installed, activated) = worker.install_and_activate().await?;
    tracing::info!(
        cached = installed.cached,
        failed = installed.failed.len(),
        activated = activated.is_some(),
        "lifecycle started"
    );

    let (lines, mut outgoing) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = outgoing.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut session = worker.connect().await;
    let broadcasts = {
        let lines = lines.clone();
        tokio::spawn(async move {
            while let Some(message) = session.recv().await {
                let line = match serde_json::to_string(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("failed to encode broadcast: {e}");
                        continue;
                    }
                };
                if lines.send(line).await.is_err() {
                    break;
                }
            }
        })
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = stdin.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match worker.control_raw(&line).await {
            Ok(Some(reply)) => lines.send(serde_json::to_string(&reply)?).await?,
            Ok(None) => {}
            Err(e) => {
                tracing::error!("control request failed: {e}");
                break;
            }
        }
    }

    tracing::info!("stdin closed");
    worker.shutdown().await?;
    broadcasts.abort();
    let _ = broadcasts.await;
    drop(lines);
    let _ = writer.await;

    Ok(())
}
