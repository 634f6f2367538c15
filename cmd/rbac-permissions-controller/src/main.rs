use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use pkg_constants::controller::{DEFAULT_RESYNC_INTERVAL_SECS, MIN_RESYNC_INTERVAL_SECS};
use pkg_constants::metrics::DEFAULT_METRICS_PORT;
use pkg_constants::paths::{DEFAULT_CONTROLLER_CONFIG, DEFAULT_DATA_DIR};
use pkg_controllers::observer::FanoutObserver;
use pkg_controllers::{ControllerRunner, MetricsObserver, TracingObserver};
use pkg_metrics::MetricsRegistry;
use pkg_state::Registry;
use pkg_state::client::StateStore;
use pkg_types::config::{ControllerConfigFile, Manifest, load_config_file};
use pkg_types::subject_permission::ObjectKey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rbac-permissions-controller",
    about = "Reconciles SubjectPermissions into ClusterRoleBindings and RoleBindings"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONTROLLER_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Seconds between full resyncs
    #[arg(long)]
    resync_interval_secs: Option<u64>,

    /// Port serving /metrics and /healthz
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// YAML manifest of namespaces, ClusterRoles and SubjectPermissions to apply at startup
    #[arg(long)]
    manifest: Option<String>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Apply every object in the manifest. Invalid SubjectPermissions are
/// reported and skipped. With `prune`, stored SubjectPermissions the
/// manifest does not list are deleted.
async fn apply_manifest(registry: &Registry, path: &str) -> anyhow::Result<()> {
    let manifest: Manifest = load_config_file(path)?;
    for ns in &manifest.namespaces {
        registry.apply_namespace(ns).await?;
    }
    for role in &manifest.cluster_roles {
        registry.apply_cluster_role(role).await?;
    }
    for sp in &manifest.subject_permissions {
        if let Err(e) = registry.apply_subject_permission(sp).await {
            warn!("Skipping SubjectPermission {}: {}", sp.key(), e);
        }
    }
    if manifest.prune {
        let keep: Vec<ObjectKey> = manifest.subject_permissions.iter().map(|sp| sp.key()).collect();
        for key in registry.prune_subject_permissions(&keep).await? {
            info!("Pruned SubjectPermission {} (not in manifest)", key);
        }
    }
    info!(
        "Applied manifest {} ({} namespaces, {} ClusterRoles, {} SubjectPermissions)",
        path,
        manifest.namespaces.len(),
        manifest.cluster_roles.len(),
        manifest.subject_permissions.len()
    );
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

async fn healthz() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_json = cli.log_json || file_cfg.log_json.unwrap_or(false);
    init_tracing(log_json);
    info!("Config file: {}", cli.config);

    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let resync_secs = cli
        .resync_interval_secs
        .or(file_cfg.resync_interval_secs)
        .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS);
    anyhow::ensure!(
        resync_secs >= MIN_RESYNC_INTERVAL_SECS,
        "resync interval must be at least {}s, got {}s",
        MIN_RESYNC_INTERVAL_SECS,
        resync_secs
    );
    let resync_interval = Duration::from_secs(resync_secs);
    let metrics_port = cli
        .metrics_port
        .or(file_cfg.metrics_port)
        .unwrap_or(DEFAULT_METRICS_PORT);
    let manifest = cli.manifest.or(file_cfg.manifest);

    info!("Starting rbac-permissions-controller");
    info!("  Data dir:      {}", data_dir);
    info!("  Resync:        {}s", resync_interval.as_secs());
    info!("  Metrics port:  {}", metrics_port);

    let store = StateStore::new(&data_dir).await?;
    let registry = Registry::new(store.clone());

    let metrics = Arc::new(MetricsRegistry::new());
    let observer = FanoutObserver::new()
        .with(Arc::new(TracingObserver))
        .with(Arc::new(MetricsObserver::new(metrics.clone())));

    // Start before seeding so the manifest's own events are picked up.
    let runner = ControllerRunner::new(registry.clone(), Arc::new(observer), resync_interval).start();

    if let Some(path) = manifest {
        apply_manifest(&registry, &path).await?;
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .with_state(metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    info!("Serving metrics on {}", addr);
    let listener = TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    runner.abort();
    store.close().await?;
    Ok(())
}
