//! Kafka Test Harness CLI
//!
//! Starts a throwaway Kafka broker for local development and runs a
//! produce/consume smoke check against it.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use kafka_harness_core::broker::{EmbeddedBroker, KafkaContainer};
use kafka_harness_core::client::ClientFactory;
use kafka_harness_core::config::{HarnessConfig, LoggingConfig};
use kafka_harness_core::telemetry::init_tracing;
use kafka_harness_core::testing::{unique_name, KafkaContainerHarness, MemoryHarness};
use kafka_harness_core::{flatten_many_polls, ClientError, ScopedClientRunner};

/// Throwaway Kafka broker launcher.
#[derive(Parser)]
#[command(name = "kafka-harness")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a Kafka container and keep it running until interrupted.
    Broker {
        /// Override the partition count of auto-created topics.
        #[arg(long)]
        partitions: Option<i32>,
    },
    /// Produce one record, consume it back and check it round-tripped.
    Smoke {
        /// Use the in-process broker instead of Docker.
        #[arg(long)]
        memory: bool,

        /// Topic to use; a unique name is generated when omitted.
        #[arg(long)]
        topic: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => HarnessConfig::default(),
    };

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };
    init_tracing(&log_config);

    info!(version = env!("CARGO_PKG_VERSION"), "starting kafka harness");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match args.command {
            Command::Broker { partitions } => run_broker(config, partitions).await,
            Command::Smoke { memory, topic } => {
                let topic = topic.unwrap_or_else(|| unique_name("smoke"));
                run_smoke(&config, memory, &topic).await
            }
        }
    })
}

async fn run_broker(mut config: HarnessConfig, partitions: Option<i32>) -> anyhow::Result<()> {
    if let Some(partitions) = partitions {
        config.broker.default_partitions = partitions;
    }
    config.validate()?;

    let mut broker = KafkaContainer::new(config.broker.clone());
    let handle = broker.start().await?;

    // Printed on stdout so scripts can capture it.
    println!("{}", handle.bootstrap_servers());
    info!(bootstrap = %handle.bootstrap_servers(), "broker running, press ctrl+c to stop");

    shutdown_signal().await;
    info!("shutdown signal received, stopping broker");
    broker.stop().await;

    info!("broker shutdown complete");
    Ok(())
}

async fn run_smoke(config: &HarnessConfig, memory: bool, topic: &str) -> anyhow::Result<()> {
    if memory {
        let mut harness = MemoryHarness::new().await?;
        let outcome = smoke_check(&harness.runner, config, topic).await;
        harness.shutdown().await;
        outcome
    } else {
        let mut harness = KafkaContainerHarness::with_config(config).await?;
        let outcome = smoke_check(&harness.runner, config, topic).await;
        harness.shutdown().await;
        outcome
    }
}

async fn smoke_check<F: ClientFactory>(
    runner: &ScopedClientRunner<F>,
    config: &HarnessConfig,
    topic: &str,
) -> anyhow::Result<()> {
    let delivery = runner.produce_one(topic, "smoke-key", "smoke-value").await?;
    info!(
        topic = %delivery.topic,
        partition = delivery.partition,
        offset = delivery.offset,
        "produced smoke record"
    );

    let wait = config.broker.startup_timeout().max(Duration::from_secs(10));
    let consuming = topic.to_string();
    let records = runner
        .with_consumer(&unique_name("smoke-group"), "smoke-reader", move |scope| {
            Box::pin(async move {
                scope.client.subscribe(&[consuming.as_str()]).await?;
                let polls = scope.client.poll_until(1, wait).await?;
                Ok::<_, ClientError>(flatten_many_polls(polls))
            })
        })
        .await?;

    let Some(record) = records.first() else {
        bail!("no record consumed from {topic} within {wait:?}");
    };
    if record.key.as_deref() != Some("smoke-key")
        || record.value.as_deref() != Some("smoke-value")
    {
        bail!(
            "unexpected record at {}:{}@{}",
            record.topic,
            record.partition,
            record.offset
        );
    }

    println!("smoke check passed: {topic}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
