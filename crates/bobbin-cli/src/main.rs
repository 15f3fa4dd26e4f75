mod ingress;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use bobbin_core::app::{Adapters, PayloadMarkerHandler, Pipeline, PipelineBuilder};
use bobbin_core::config::BobbinConfig;
use bobbin_core::domain::{CorrelationId, TaskStatus, TaskType};
use bobbin_core::impls::InMemoryBroker;
use bobbin_core::observability::init_logging;

use crate::ingress::{AppState, build_router};

#[derive(Parser)]
#[command(name = "bobbin")]
#[command(about = "Rate-limited task pipeline with retries and dead-lettering")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP ingress, the worker group and the outbox relay
    Serve {
        /// Overrides `http.bind`
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Submit one good and one failing task and report how they end up
    Demo {
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BobbinConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(config.log.format);

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Demo { timeout_secs } => demo(config, Duration::from_secs(timeout_secs)).await,
    }
}

fn build_pipeline(config: BobbinConfig, adapters: Adapters) -> Result<Pipeline> {
    let task_type = TaskType::new(config.channels.task_type.clone());
    let pipeline = PipelineBuilder::new(config)
        .register(task_type, Arc::new(PayloadMarkerHandler::default()))?
        .with_adapters(adapters)
        .build()?;
    Ok(pipeline)
}

async fn serve(config: BobbinConfig, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.http.bind.clone());
    let pipeline = build_pipeline(config, Adapters::in_memory())?;
    let running = pipeline.start();

    let app = build_router(AppState::from_pipeline(&pipeline));
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(addr = %listener.local_addr()?, "ingress listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving HTTP")?;

    running.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
}

async fn demo(mut config: BobbinConfig, timeout: Duration) -> Result<()> {
    // keep the retry chain short enough to watch
    config.retry.base_delay_ms = config.retry.base_delay_ms.min(200);
    config.consumer.poll_timeout_ms = config.consumer.poll_timeout_ms.min(100);

    let broker = InMemoryBroker::new();
    let adapters = Adapters {
        broker: Arc::new(broker.clone()),
        ..Adapters::in_memory()
    };
    let dead_letter = config.topology().dead_letter().to_string();
    let pipeline = build_pipeline(config, adapters)?;
    let running = pipeline.start();
    let service = pipeline.task_service();

    let good = service
        .create_task("hello", &CorrelationId::generate())
        .await?;
    let bad = service
        .create_task("this one should fail", &CorrelationId::generate())
        .await?;
    info!(good = %good.id, bad = %bad.id, "demo tasks submitted");

    let settled = tokio::time::timeout(timeout, async {
        loop {
            let good_done = service.get_task_consistent(good.id).await?.status == TaskStatus::Success;
            let dead = broker.pending(&dead_letter).await.len();
            if good_done && dead > 0 {
                return Ok::<_, anyhow::Error>(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    running.shutdown().await;

    match settled {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("demo did not settle within {timeout:?}"),
    }

    let good = service.get_task_consistent(good.id).await?;
    let bad = service.get_task_consistent(bad.id).await?;
    let report = serde_json::json!({
        "succeeded": good,
        "failed": bad,
        "deadLetterCount": broker.pending(&dead_letter).await.len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
