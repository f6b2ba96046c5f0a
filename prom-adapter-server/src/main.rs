use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use prom_adapter_promapi::{AdapterMetrics, Client, HttpVerb, Instrumented, QueryBackend};
use prom_adapter_provider::external_registry::registry_callback as external_callback;
use prom_adapter_provider::registry::registry_callback as custom_callback;
use prom_adapter_provider::{
    CustomMetricRegistry, CustomMetricsProvider, ExternalMetricRegistry, ExternalMetricsProvider,
    ResourceMetricsProvider,
};
use prom_adapter_rules::{AdapterConfig, MetricNamer, PeriodicLister, ResourceMapper, Rule};

use api::AppState;

mod api;

#[derive(Debug, Parser)]
#[command(name = "prom-adapter", about = "Prometheus adapter for the Kubernetes metrics APIs")]
struct Opts {
    /// Base URL of the Prometheus-compatible backend.
    #[arg(long, default_value = "http://localhost:9090")]
    prometheus_url: Url,

    /// Discovery configuration file; the built-in legacy rules are used when
    /// absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// How often to refresh the series catalog.
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    metrics_relist_interval: Duration,

    /// Lookback window for catalog refreshes; defaults to the relist
    /// interval.
    #[arg(long, value_parser = humantime::parse_duration)]
    metrics_max_age: Option<Duration>,

    /// HTTP verb for backend queries.
    #[arg(long, default_value = "GET")]
    prometheus_verb: HttpVerb,

    /// Deadline applied to backend requests, also forwarded to the backend.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    prometheus_timeout: Duration,

    /// Kubeconfig for object listing; in-cluster or default config when
    /// absent.
    #[arg(long)]
    lister_kubeconfig: Option<PathBuf>,

    /// Address to serve the metrics APIs on.
    #[arg(long, default_value = "0.0.0.0:8443")]
    bind_address: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let opts = Opts::parse();

    let config = match &opts.config {
        Some(path) => AdapterConfig::from_yaml_file(path)
            .with_context(|| format!("loading discovery configuration from {}", path.display()))?,
        None => {
            info!("no configuration file given, using the built-in legacy rules");
            AdapterConfig::default_rules()
        }
    };

    let client = match kube_client(&opts).await {
        Ok(client) => {
            info!("connected to the Kubernetes API");
            Some(client)
        }
        Err(err) => {
            warn!(error = %err, "no Kubernetes API access, object listing disabled");
            None
        }
    };

    let mapper = match &client {
        Some(client) => match ResourceMapper::from_discovery(client.clone()).await {
            Ok(mapper) => Arc::new(mapper),
            Err(err) => {
                warn!(error = %err, "API discovery failed, using the built-in resource table");
                Arc::new(ResourceMapper::default())
            }
        },
        None => Arc::new(ResourceMapper::default()),
    };

    let metrics = Arc::new(AdapterMetrics::new().context("registering adapter metrics")?);
    let backend: Arc<dyn QueryBackend> = Arc::new(Instrumented::new(
        Client::new(opts.prometheus_url.clone())
            .verb(opts.prometheus_verb)
            .timeout(opts.prometheus_timeout),
        server_label(&opts.prometheus_url),
        Arc::clone(&metrics),
    ));

    let namers = compile(&config.rules, &mapper).context("compiling discovery rules")?;
    let external_namers =
        compile(&config.external_rules, &mapper).context("compiling external discovery rules")?;
    metrics
        .discovered_rules
        .with_label_values(&["normal"])
        .set(namers.len() as i64);
    metrics
        .discovered_rules
        .with_label_values(&["external"])
        .set(external_namers.len() as i64);

    let custom_registry = Arc::new(CustomMetricRegistry::new(Arc::clone(&mapper)));
    let external_registry = Arc::new(ExternalMetricRegistry::new());

    let lookback = opts.metrics_max_age.unwrap_or(opts.metrics_relist_interval);
    let mut lister = PeriodicLister::new(
        Arc::clone(&backend),
        namers,
        opts.metrics_relist_interval,
        lookback,
    );
    lister.add_callback(custom_callback(Arc::clone(&custom_registry)));
    let mut external_lister = PeriodicLister::new(
        Arc::clone(&backend),
        external_namers,
        opts.metrics_relist_interval,
        lookback,
    );
    external_lister.add_callback(external_callback(Arc::clone(&external_registry)));

    let (stop, stop_rx) = watch::channel(());
    tokio::spawn(Arc::new(lister).run(stop_rx.clone()));
    tokio::spawn(Arc::new(external_lister).run(stop_rx));

    let resource = match &config.resource_rules {
        Some(rules) => Some(
            ResourceMetricsProvider::from_rules(
                Arc::clone(&backend),
                rules,
                Arc::clone(&mapper),
            )
            .context("compiling resource rules")?,
        ),
        None => None,
    };

    let state = Arc::new(AppState {
        custom: CustomMetricsProvider::new(
            Arc::clone(&backend),
            Arc::clone(&custom_registry),
            Arc::clone(&mapper),
            client.clone(),
        ),
        external: ExternalMetricsProvider::new(Arc::clone(&backend), external_registry),
        resource,
        client,
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(&opts.bind_address)
        .await
        .with_context(|| format!("binding {}", opts.bind_address))?;
    info!(address = %opts.bind_address, "serving the metrics APIs");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    // closing the channel lets an in-flight discovery tick finish
    drop(stop);
    Ok(())
}

async fn kube_client(opts: &Opts) -> anyhow::Result<kube::Client> {
    let config = match &opts.lister_kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(kube::Client::try_from(config)?)
}

fn compile(rules: &[Rule], mapper: &Arc<ResourceMapper>) -> anyhow::Result<Vec<Arc<MetricNamer>>> {
    rules
        .iter()
        .map(|rule| {
            MetricNamer::from_rule(rule, Arc::clone(mapper))
                .map(Arc::new)
                .map_err(anyhow::Error::from)
        })
        .collect()
}

fn server_label(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
