#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
use rama::{
    Layer as RamaLayer,
    graceful::Shutdown,
    http::{layer::trace::TraceLayer, server::HttpServer},
    layer::ConsumeErrLayer,
    rt::Executor,
    tcp::server::TcpListener,
};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use pullcache::config::{Config, DEFAULT_CONFIG_FILE, StoreKind, UpstreamConfig};
use pullcache::proxy::{HEALTH_PATH, PullCache};
use pullcache::store::{open_store, schedule_purge};
use pullcache::upstream::UpstreamClient;
use pullcache_store::{CacheStore, StoreBackend};

#[derive(Debug, Parser)]
#[command(author, version, about = "Pull-through cache for Maven repositories and container registries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the caching proxy
    Serve {
        /// Path to the configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Validate the configuration and print the effective settings
    Check {
        /// Path to the configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Display cache store statistics
    Stats {
        /// Path to the configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Perform a health check against a running instance
    Health {
        /// URL of the health endpoint (defaults to local proxy)
        #[arg(long, default_value_t = format!("http://127.0.0.1:8346{HEALTH_PATH}"))]
        url: String,
        /// Timeout in seconds for the request
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => run_server(config),
        Command::Check { config } => run_check(config),
        Command::Stats { config } => run_stats(config),
        Command::Health { url, timeout } => run_health(url, timeout),
    }
}

fn load_config(path: PathBuf) -> Result<Config> {
    let mut config = Config::load(Some(path)).context("loading configuration")?;
    config
        .apply_env()
        .context("applying environment overrides")?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn run_server(config_path: PathBuf) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);
    init_tracing(&config)?;

    let store = Arc::new(open_store(&config.cache)?);
    let proxy = PullCache::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::new(UpstreamClient::new()),
    );

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads())
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let _purge = schedule_purge(&config.cache.purge_schedule, Arc::clone(&store)).await?;

        let graceful = Shutdown::default();
        let addr = config.server.bind_addr();

        tracing::info!(
            %addr,
            family = config.upstream.family(),
            store = store.kind(),
            "starting Rama HTTP server"
        );

        graceful.spawn_task_fn(move |guard| {
            let proxy = proxy.clone();
            let addr = addr.clone();
            async move {
                let tcp_service = match TcpListener::build().bind(addr.clone()).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        tracing::error!(%addr, error = %err, "failed to bind listener");
                        return;
                    }
                };

                let exec = Executor::graceful(guard.clone());
                let http_service = HttpServer::auto(exec).service(
                    (TraceLayer::new_for_http(), ConsumeErrLayer::default()).into_layer(proxy),
                );

                tcp_service.serve_graceful(guard, http_service).await;
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown signal")?;

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn run_check(config_path: PathBuf) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration OK");
    println!("  listen: {}", config.server.bind_addr());
    println!("  workers: {}", config.server.workers);
    match &config.upstream {
        UpstreamConfig::Maven(maven) => {
            println!("  upstream: maven {}", maven.url);
        }
        UpstreamConfig::Registry(registry) => {
            println!("  upstream: registry {}", registry.registry_url);
            println!("  auth: {} (service {})", registry.auth_url, registry.service);
            println!("  default namespace: {}", registry.default_namespace);
            println!("  reuse tokens: {}", registry.reuse_tokens);
        }
    }
    println!("  cache backend: {:?}", config.cache.backend);
    match config.cache.backend {
        StoreKind::Redb => println!("  cache path: {}", config.cache.path.display()),
        StoreKind::Memory => println!(
            "  memory limit: {}",
            format_bytes(config.cache.max_memory_bytes)
        ),
    }
    println!("  ttl: {}s", config.cache.ttl_secs);
    println!(
        "  max cacheable size: {}",
        format_bytes(config.cache.max_cacheable_bytes)
    );
    if config.cache.purge_schedule.trim().is_empty() {
        println!("  purge schedule: disabled");
    } else {
        println!("  purge schedule: {}", config.cache.purge_schedule);
    }

    Ok(())
}

fn run_stats(config_path: PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    init_tracing(&config)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing stats runtime")?;

    let store = open_store(&config.cache)?;
    let stats = rt
        .block_on(store.stats())
        .context("collecting cache stats")?;

    drop(rt);

    match &store {
        StoreBackend::Redb(redb) => println!("redb cache: {}", redb.path().display()),
        StoreBackend::Memory(_) => {
            println!("memory cache (contents live only inside a running server)")
        }
    }
    println!("  entries: {}", stats.entries);
    println!("  expired: {}", stats.expired);
    println!("  total size: {}", format_bytes(stats.total_bytes));

    Ok(())
}

fn run_health(url: String, timeout: u64) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .context("building health check client")?;

    let response = client
        .get(&url)
        .send()
        .context("sending health check request")?;

    if response.status().is_success() {
        println!("pullcache healthy: {}", response.status());
        Ok(())
    } else {
        bail!("health endpoint returned status {}", response.status());
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("building log filter")?;

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if let Some(endpoint) = config.logging.otlp_endpoint() {
        use opentelemetry_otlp::WithExportConfig;

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", "pullcache"),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("pullcache.family", config.upstream.family()),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?;

        let provider = sdktrace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let tracer = provider.tracer("pullcache");
        global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
