//! Steward Orchestrator - Entry Point
//!
//! Provisions and watches cloud-hosted agent deployments. Reads a deployment
//! request from a JSON file, compiles it into an ordered provisioning plan,
//! and executes it against the cloud control plane (or prints the equivalent
//! commands with `--dry-run`).

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{error, info, warn};

use steward::config::DeployConfig;
use steward::errors::OrchestratorError;
use steward::gcp::client::GcpClient;
use steward::gcp::ControlPlane;
use steward::logs::{init_logging, LogOptions};
use steward::provision::executor::ExecutorOptions;
use steward::provision::{self, Deployer};
use steward::reconcile::{PollerOptions, StatusPoller, WatchTarget};
use steward::store::{records, FileStore, RecordStore};
use steward::utils::version_info;

const USAGE: &str = "Usage:
  steward --version
  steward --deploy --config=<file> [--dry-run] [--record=<id>]
  steward --status --record=<id>
  steward --watch  --record=<id>
  steward --start  --record=<id>
  steward --stop   --record=<id>
  steward --reset  --record=<id>
  steward --delete --record=<id>

Options:
  --store=<dir>       Record store directory (default: records)
  --log-level=<lvl>   trace|debug|info|warn|error (default: info)

The access token is read from STEWARD_GCP_TOKEN or GCP_ACCESS_TOKEN.";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap_or_default());
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: cli_args
            .get("log-level")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    let store = FileStore::new(
        cli_args
            .get("store")
            .map(String::as_str)
            .unwrap_or("records"),
    );

    let result = if cli_args.contains_key("deploy") {
        deploy(&cli_args, &store).await
    } else if cli_args.contains_key("status") {
        status(&cli_args, &store).await
    } else if cli_args.contains_key("watch") {
        watch(&cli_args, store).await
    } else if cli_args.contains_key("start") {
        instance_action(&cli_args, &store, "start").await
    } else if cli_args.contains_key("stop") {
        instance_action(&cli_args, &store, "stop").await
    } else if cli_args.contains_key("reset") {
        instance_action(&cli_args, &store, "reset").await
    } else if cli_args.contains_key("delete") {
        instance_action(&cli_args, &store, "delete").await
    } else {
        println!("{USAGE}");
        return;
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn deploy(
    cli_args: &HashMap<String, String>,
    store: &FileStore,
) -> Result<(), OrchestratorError> {
    let config_path = cli_args.get("config").ok_or_else(|| {
        OrchestratorError::ConfigError("--config=<file> is required for --deploy".to_string())
    })?;
    let contents = tokio::fs::read_to_string(config_path).await?;
    let config: DeployConfig = serde_json::from_str(&contents)?;

    if cli_args.contains_key("dry-run") {
        let compiled = steward::compiler::compile(&config)?;
        let boot_payload = steward::bootscript::generate(&compiled.boot);
        provision::dry_run::print(&compiled.plan, &boot_payload);
        return Ok(());
    }

    let cloud = cloud_client()?;
    let deployer = Deployer::new(&cloud, store, ExecutorOptions::default());
    let report = deployer
        .deploy(&config, cli_args.get("record").map(String::as_str))
        .await?;

    info!("Deployment complete: {} steps", report.steps.len());
    if let Some(warning) = &report.warning {
        warn!("{}", warning);
    }
    if let Some(id) = &report.record_id {
        println!("Deployed. Record id: {}", id);
    }
    Ok(())
}

async fn status(
    cli_args: &HashMap<String, String>,
    store: &FileStore,
) -> Result<(), OrchestratorError> {
    let record = load_record(cli_args, store).await?;
    let cloud = cloud_client()?;
    let view = cloud
        .describe_instance(&record.project_id, &record.zone, &record.vm_name)
        .await?;
    match view {
        Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
        None => println!("Instance {} not found", record.vm_name),
    }
    Ok(())
}

async fn watch(
    cli_args: &HashMap<String, String>,
    store: FileStore,
) -> Result<(), OrchestratorError> {
    let record = load_record(cli_args, &store).await?;
    let cloud: Arc<dyn ControlPlane> = Arc::new(cloud_client()?);
    let store: Arc<dyn RecordStore> = Arc::new(store);

    let target = WatchTarget {
        record_id: record.id.clone(),
        project_id: record.project_id.clone(),
        zone: record.zone.clone(),
        vm_name: record.vm_name.clone(),
    };
    let (poller, mut transitions) =
        StatusPoller::new(cloud, store, target, PollerOptions::default());
    poller.start();

    loop {
        tokio::select! {
            transition = transitions.recv() => {
                match transition {
                    Some(t) => println!(
                        "{}: {} -> {} ({})",
                        record.vm_name,
                        t.from.as_deref().unwrap_or("?"),
                        t.to,
                        t.mapped
                    ),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
                break;
            }
        }
    }
    poller.stop();
    Ok(())
}

async fn instance_action(
    cli_args: &HashMap<String, String>,
    store: &FileStore,
    action: &str,
) -> Result<(), OrchestratorError> {
    let record = load_record(cli_args, store).await?;
    let cloud = cloud_client()?;
    let (project, zone, name) = (&record.project_id, &record.zone, &record.vm_name);
    match action {
        "start" => cloud.start_instance(project, zone, name).await?,
        "stop" => cloud.stop_instance(project, zone, name).await?,
        "reset" => cloud.reset_instance(project, zone, name).await?,
        "delete" => {
            cloud.delete_instance(project, zone, name).await?;
            store.delete(&record.id).await?;
        }
        _ => unreachable!(),
    }
    println!("{} requested for {}", action, name);
    Ok(())
}

async fn load_record(
    cli_args: &HashMap<String, String>,
    store: &FileStore,
) -> Result<records::DeploymentRecord, OrchestratorError> {
    let id = cli_args.get("record").ok_or_else(|| {
        OrchestratorError::ConfigError("--record=<id> is required".to_string())
    })?;
    records::load(store, id)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("deployment record {}", id)))
}

fn cloud_client() -> Result<GcpClient, OrchestratorError> {
    let token = env::var("STEWARD_GCP_TOKEN")
        .or_else(|_| env::var("GCP_ACCESS_TOKEN"))
        .map_err(|_| {
            OrchestratorError::ConfigError(
                "set STEWARD_GCP_TOKEN or GCP_ACCESS_TOKEN with a cloud access token".to_string(),
            )
        })?;
    GcpClient::new(SecretString::from(token))
}
