use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use ngrok_operator::config::{DEFAULT_API_URL, DEFAULT_CONTROLLER_NAME, DEFAULT_DESCRIPTION};
use ngrok_operator::{controller, telemetry, Error, OperatorConfig};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// ngrok API key
    #[arg(long, env = "NGROK_API_KEY", hide_env_values = true, default_value = "")]
    api_key: String,

    /// ngrok API base URL
    #[arg(long, env = "NGROK_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Region for reserved addresses
    #[arg(long, env = "NGROK_REGION", default_value = "")]
    region: String,

    /// Namespace the operator runs in
    #[arg(long, env = "POD_NAMESPACE", default_value = "")]
    namespace: String,

    /// Name of this operator deployment
    #[arg(long, env = "MANAGER_NAME", default_value = "ngrok-operator")]
    manager_name: String,

    /// IngressClass controller value handled by this operator
    #[arg(long, env = "CONTROLLER_NAME", default_value = DEFAULT_CONTROLLER_NAME)]
    controller_name: String,

    /// Lease name used for leader election
    #[arg(long, env = "ELECTION_ID", default_value = "ngrok-operator-leader")]
    election_id: String,

    /// Accepted for deployment compatibility; no metrics endpoint is served
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = ":8080")]
    metrics_bind_address: String,

    /// Accepted for deployment compatibility; no probe endpoint is served
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = ":8081")]
    health_probe_bind_address: String,

    /// Debounce window of the ingress sync loop, in seconds
    #[arg(long, env = "SYNC_DEBOUNCE_SECONDS", default_value_t = 10)]
    sync_debounce_seconds: u64,

    /// Concurrent reconciles per kind
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    workers: u16,

    /// Watch Gateway resources as well as Ingresses
    #[arg(long, env = "ENABLE_GATEWAY")]
    enable_gateway: bool,

    /// Log as JSON lines
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Description stamped on remote objects
    #[arg(long, env = "NGROK_DESCRIPTION", default_value = DEFAULT_DESCRIPTION)]
    description: String,

    /// JSON metadata stamped on remote objects
    #[arg(long, env = "NGROK_METADATA", default_value = "{\"owned-by\":\"ngrok-operator\"}")]
    metadata: String,
}

impl From<RunArgs> for OperatorConfig {
    fn from(args: RunArgs) -> Self {
        Self {
            controller_name: args.controller_name,
            manager_name: args.manager_name,
            namespace: args.namespace,
            api_key: args.api_key,
            api_url: args.api_url,
            region: args.region,
            election_id: args.election_id,
            sync_debounce: Duration::from_secs(args.sync_debounce_seconds),
            workers: args.workers,
            enable_gateway: args.enable_gateway,
            json_logs: args.json_logs,
            description: args.description,
            metadata: args.metadata,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("ngrok-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let inert = format!(
        "metrics {} and health probe {}",
        args.metrics_bind_address, args.health_probe_bind_address
    );
    let cfg = OperatorConfig::from(args);
    telemetry::init(cfg.json_logs);
    cfg.validate()?;

    info!("Starting ngrok-operator v{}", env!("CARGO_PKG_VERSION"));
    info!("Not serving the {} bind addresses", inert);

    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });
    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));
    {
        let leases: Api<Lease> = Api::namespaced(client.clone(), &cfg.namespace);
        let lease_name = cfg.election_id.clone();
        let identity = holder_identity.clone();
        let is_leader_bg = Arc::clone(&is_leader);
        tokio::spawn(async move {
            run_leader_election(leases, &lease_name, &identity, is_leader_bg).await;
        });
    }

    while !is_leader.load(Ordering::Relaxed) {
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
    info!("Leadership acquired, starting controllers");

    tokio::select! {
        result = controller::run(client, &cfg) => result,
        _ = leadership_lost(Arc::clone(&is_leader)) => {
            error!("Lost leadership of lease {}, exiting", cfg.election_id);
            Err(Error::LeadershipLost(cfg.election_id.clone()))
        }
    }
}

const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

async fn leadership_lost(is_leader: Arc<AtomicBool>) {
    while is_leader.load(Ordering::Relaxed) {
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

async fn run_leader_election(leases: Api<Lease>, lease_name: &str, identity: &str, is_leader: Arc<AtomicBool>) {
    loop {
        match try_acquire_or_renew(&leases, lease_name, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", lease_name);
                }
                is_leader.store(true, Ordering::Relaxed);
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", lease_name);
                }
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn try_acquire_or_renew(leases: &Api<Lease>, lease_name: &str, identity: &str) -> Result<bool, kube::Error> {
    let now = Utc::now();

    let Some(existing) = leases.get_opt(lease_name).await? else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(lease_name.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        };
        leases.create(&PostParams::default(), &lease).await?;
        info!("Created lease {} with holder {}", lease_name, identity);
        return Ok(true);
    };

    let spec = existing.spec.as_ref();
    let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

    if current_holder == Some(identity) {
        let patch = serde_json::json!({
            "spec": {
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        });
        leases
            .patch(lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        return Ok(true);
    }

    let expired = spec
        .and_then(|s| s.renew_time.as_ref())
        .map(|renew| {
            let duration = spec
                .and_then(|s| s.lease_duration_seconds)
                .unwrap_or(LEASE_DURATION_SECS);
            now > renew.0 + chrono::Duration::seconds(i64::from(duration))
        })
        .unwrap_or(true);

    if !expired {
        return Ok(false);
    }

    info!("Lease held by {:?} has expired, taking over", current_holder);
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": existing.metadata.resource_version,
        },
        "spec": {
            "holderIdentity": identity,
            "acquireTime": MicroTime(now),
            "renewTime": MicroTime(now),
            "leaseDurationSeconds": LEASE_DURATION_SECS,
        }
    });
    match leases
        .patch(lease_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
        Err(e) => Err(e),
    }
}
