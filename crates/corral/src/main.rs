use clap::{Parser, Subcommand, ValueEnum};
use corral_controller::{
    cleanup_job, pod_template, ApiClient, ClusterClient, ControllerConfig, MockCluster,
    ReplicaController,
};
use corral_core::{InstanceState, Replica};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "corral", about = "Longhorn replica controller")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile replicas against an API server
    Run {
        /// API server URL
        #[arg(long, env = "CORRAL_API_URL", default_value = "http://127.0.0.1:6443")]
        api_url: String,
        /// Bearer token for the API server
        #[arg(long, env = "CORRAL_API_TOKEN", hide_env_values = true)]
        api_token: Option<String>,
        /// YAML configuration file; flags override its values
        #[arg(long, env = "CORRAL_CONFIG")]
        config: Option<PathBuf>,
        /// Namespace holding the replicas
        #[arg(long, env = "CORRAL_NAMESPACE")]
        namespace: Option<String>,
        /// Number of reconcile workers
        #[arg(long, env = "CORRAL_WORKERS")]
        workers: Option<usize>,
        /// Host directory holding replica data
        #[arg(long, env = "CORRAL_DATA_DIRECTORY")]
        data_directory: Option<String>,
        /// Seconds between full relists
        #[arg(long, env = "CORRAL_RESYNC_SECONDS")]
        resync_seconds: Option<u64>,
    },
    /// Run one replica manifest through its lifecycle against an in-memory cluster
    Simulate {
        /// Replica manifest (YAML)
        manifest: PathBuf,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_seconds: u64,
    },
    /// Print the pod and cleanup job generated for a replica manifest
    Render {
        /// Replica manifest (YAML)
        manifest: PathBuf,
        /// Host directory holding replica data
        #[arg(long, default_value = corral_controller::DEFAULT_DATA_DIRECTORY)]
        data_directory: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    match cli.command {
        Commands::Run {
            api_url,
            api_token,
            config,
            namespace,
            workers,
            data_directory,
            resync_seconds,
        } => {
            let mut config = match config {
                Some(path) => ControllerConfig::from_yaml_file(&path)?,
                None => ControllerConfig::default(),
            };
            if let Some(namespace) = namespace {
                config.namespace = namespace;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(data_directory) = data_directory {
                config.data_directory = data_directory;
            }
            if let Some(secs) = resync_seconds {
                config.resync_interval = Duration::from_secs(secs);
            }
            run_controller(&api_url, api_token, config).await
        }
        Commands::Simulate {
            manifest,
            timeout_seconds,
        } => run_simulation(&manifest, Duration::from_secs(timeout_seconds)).await,
        Commands::Render {
            manifest,
            data_directory,
        } => render(&manifest, &data_directory),
    }
}

fn load_manifest(path: &Path) -> miette::Result<Replica> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read '{}': {}", path.display(), e))?;
    let mut replica: Replica = corral_core::from_yaml(&data)?;
    if replica.metadata.namespace.is_none() {
        replica.metadata.namespace = Some(ControllerConfig::default().namespace);
    }
    Ok(replica)
}

/// Run the informer and controller until ctrl-c
async fn run_controller(
    api_url: &str,
    api_token: Option<String>,
    config: ControllerConfig,
) -> miette::Result<()> {
    info!(
        "Starting corral against {} in namespace '{}'",
        api_url, config.namespace
    );

    let mut client = ApiClient::new(api_url);
    if let Some(token) = api_token {
        client = client.with_token(token);
    }
    let client: Arc<dyn ClusterClient> = Arc::new(client);
    let (controller, informer) = ReplicaController::from_client(&config, client)?;

    let token = CancellationToken::new();
    let informer_token = token.clone();
    let informer_handle = tokio::spawn(async move { informer.run(informer_token).await });

    let controller_token = token.clone();
    let mut controller_handle =
        tokio::spawn(async move { controller.run(controller_token).await });

    // Wait for shutdown signal, or for the controller to give up on its own
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
        }
        result = &mut controller_handle => {
            token.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), informer_handle).await;
            return match result {
                Ok(Ok(())) => Err(miette::miette!("Replica controller stopped unexpectedly")),
                Ok(Err(e)) => {
                    error!("Replica controller error: {}", e);
                    Err(e.into())
                }
                Err(e) => Err(miette::miette!("Replica controller task failed: {}", e)),
            };
        }
    }

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let (_, controller_result) = tokio::join!(informer_handle, controller_handle);
        if let Ok(Err(e)) = controller_result {
            error!("Replica controller error: {}", e);
        }
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

/// Drive a replica from creation to removal with a fake kubelet
async fn run_simulation(manifest: &Path, timeout: Duration) -> miette::Result<()> {
    let mut replica = load_manifest(manifest)?;
    if replica.spec.desire_state == InstanceState::Stopped {
        replica.spec.desire_state = InstanceState::Running;
    }
    let namespace = replica.namespace().to_string();
    let name = replica.name().to_string();

    let cluster = MockCluster::new();
    cluster.insert_replica(replica).await?;

    let config = ControllerConfig {
        namespace: namespace.clone(),
        workers: 1,
        resync_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let (controller, informer) =
        ReplicaController::from_client(&config, Arc::new(cluster.clone()))?;

    let token = CancellationToken::new();
    let informer_token = token.clone();
    let informer_handle = tokio::spawn(async move { informer.run(informer_token).await });
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move { controller.run(controller_token).await });

    let outcome = tokio::time::timeout(timeout, async {
        let mut deletion_requested = false;
        loop {
            cluster.simulate_kubelet().await?;

            let running = cluster
                .pod(&namespace, &name)
                .await
                .and_then(|p| p.status)
                .and_then(|s| s.phase)
                .is_some_and(|phase| phase == "Running");
            if running && !deletion_requested {
                info!("Replica {} is running, requesting deletion", name);
                cluster.delete_replica(&namespace, &name).await?;
                deletion_requested = true;
            }
            if deletion_requested && cluster.replica(&namespace, &name).await.is_none() {
                return Ok::<(), corral_controller::ControllerError>(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    token.cancel();
    let _ = tokio::join!(informer_handle, controller_handle);

    match outcome {
        Ok(result) => result?,
        Err(_) => {
            return Err(miette::miette!(
                "Replica {} did not complete its lifecycle within {:?}",
                name,
                timeout
            ))
        }
    }

    for mutation in cluster.mutations().await {
        println!("{:?}", mutation);
    }
    for event in cluster.events().await {
        println!(
            "{} {}: {}",
            event.type_.unwrap_or_default(),
            event.reason.unwrap_or_default(),
            event.message.unwrap_or_default()
        );
    }
    Ok(())
}

fn render(manifest: &Path, data_directory: &str) -> miette::Result<()> {
    let mut replica = load_manifest(manifest)?;
    if replica.metadata.uid.is_none() {
        // Owner references need a uid; manifests written by hand rarely carry one
        replica.metadata.uid = Some("00000000-0000-0000-0000-000000000000".to_string());
    }

    let pod = pod_template(&replica, data_directory)?;
    let job = cleanup_job(&replica, data_directory)?;
    println!("{}---\n{}", corral_core::to_yaml(&pod)?, corral_core::to_yaml(&job)?);
    Ok(())
}
