pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod entities;
pub mod matching;
pub mod providers;
pub mod proxy;
pub mod resolvers;
pub mod services;
pub mod state;
pub mod worker;

use std::sync::Arc;

use anyhow::Context;
pub use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use state::SharedState;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url =
            url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.as_str(), value.as_str())?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    if prometheus_handle.is_some() {
        info!("Prometheus metrics recorder initialized");
    }

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("serve" | "-s" | "--serve") => run_api(config, prometheus_handle).await,
        Some("worker" | "-w" | "--worker") => run_worker(config).await,
        Some("proxy" | "-p" | "--proxy") => run_proxy(config).await,
        _ => {
            print_help();
            Ok(())
        }
    }
}

async fn run_api(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    info!("weaboo v{} starting API process", env!("CARGO_PKG_VERSION"));

    let port = config.server.port;
    let state = Arc::new(SharedState::new(config, prometheus_handle).await?);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("API listening on http://0.0.0.0:{port}");

    serve_until_shutdown(listener, app).await
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    info!(
        "weaboo v{} starting archival worker",
        env!("CARGO_PKG_VERSION")
    );

    let store = db::Store::new(&config.database.url).await?;
    let state = Arc::new(worker::WorkerState::new(
        store,
        config.archival.clone(),
        config.proxy.base_url.clone(),
    ));

    let poll_handle = tokio::spawn(worker::poll_loop(state.clone()));

    let app = worker::router(state);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.archival.worker_port)).await?;
    info!("worker listening on http://0.0.0.0:{}", config.archival.worker_port);

    let result = serve_until_shutdown(listener, app).await;
    poll_handle.abort();
    result
}

async fn run_proxy(config: Config) -> anyhow::Result<()> {
    info!(
        "weaboo v{} starting stream proxy",
        env!("CARGO_PKG_VERSION")
    );

    let app = proxy::router(&config.proxy.base_url);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.proxy.port)).await?;
    info!("proxy listening on http://0.0.0.0:{}", config.proxy.port);

    serve_until_shutdown(listener, app).await
}

async fn serve_until_shutdown(
    listener: tokio::net::TcpListener,
    app: axum::Router,
) -> anyhow::Result<()> {
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("server error: {e}");
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("error listening for shutdown: {e}"),
    }

    server.abort();
    info!("stopped");
    Ok(())
}

fn print_help() {
    println!("weaboo v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: weaboo <command>");
    println!();
    println!("Commands:");
    println!("  serve    Run the aggregation API");
    println!("  worker   Run the archival worker");
    println!("  proxy    Run the stream proxy");
}
