use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gitkube_controller::{
    config::{self, ControllerConfig, QueueConfig},
    controller::{Engine, Informers, KubeClusterClient},
    Error,
};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace of the gateway ConfigMap, Deployment and Service
    #[arg(long, env = "GITKUBE_NAMESPACE", default_value = config::DEFAULT_NAMESPACE)]
    namespace: String,

    /// ConfigMap holding remotes.json
    #[arg(long, env = "GITKUBE_CONFIG_MAP", default_value = config::DEFAULT_CONFIG_MAP_NAME)]
    config_map: String,

    /// Gateway Deployment restarted when remotes.json changes
    #[arg(long, env = "GITKUBE_DEPLOYMENT", default_value = config::DEFAULT_DEPLOYMENT_NAME)]
    deployment: String,

    /// Gateway Service whose address is published on each Remote
    #[arg(long, env = "GITKUBE_SERVICE", default_value = config::DEFAULT_SERVICE_NAME)]
    service: String,

    /// Seconds to wait for the initial cache sync
    #[arg(long, env = "CACHE_SYNC_TIMEOUT_SECS", default_value_t = 120)]
    cache_sync_timeout_secs: u64,

    /// First retry delay in milliseconds; doubles per failure
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value_t = 5)]
    retry_base_delay_ms: u64,

    /// Upper bound on the retry delay in seconds
    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value_t = 1000)]
    retry_max_delay_secs: u64,

    /// Address of the health/metrics HTTP server
    #[arg(long, env = "REST_API_ADDR", default_value = "0.0.0.0:8080")]
    rest_api_addr: SocketAddr,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl RunArgs {
    fn controller_config(&self) -> Result<ControllerConfig, Error> {
        let queue = QueueConfig {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
        };
        if queue.base_delay.is_zero() || queue.base_delay > queue.max_delay {
            return Err(Error::ConfigError(format!(
                "retry base delay {:?} must be non-zero and at most {:?}",
                queue.base_delay, queue.max_delay
            )));
        }

        Ok(ControllerConfig {
            namespace: self.namespace.clone(),
            config_map_name: self.config_map.clone(),
            deployment_name: self.deployment.clone(),
            service_name: self.service.clone(),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
            queue,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("gitkube-controller v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_controller(run_args).await,
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_controller(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_json);
    let config = args.controller_config()?;

    info!(
        "Starting gitkube-controller v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Gateway: ConfigMap {ns}/{}, Deployment {ns}/{}, Service {ns}/{}",
        config.config_map_name,
        config.deployment_name,
        config.service_name,
        ns = config.namespace
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let mut informers = Informers::new();
    let engine = Engine::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        config.clone(),
        &mut informers,
    );

    #[cfg(feature = "rest-api")]
    {
        let state = engine.state();
        let addr = args.rest_api_addr;
        tokio::spawn(async move {
            if let Err(e) = gitkube_controller::rest_api::run_server(state, addr).await {
                error!("REST API server error: {:?}", e);
            }
        });
    }

    tokio::spawn(informers.run(client, config));

    let result = engine.run(shutdown_signal()).await;
    if let Err(e) = &result {
        error!("Controller stopped with error: {}", e);
    } else {
        info!("Controller stopped");
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
