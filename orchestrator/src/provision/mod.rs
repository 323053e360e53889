//! Resource provisioning
//!
//! [`Deployer`] drives the full pipeline: compile the request, generate the
//! boot payload, run the plan through the [`executor`], then persist the
//! deployment record. Record persistence failing after a successful
//! provisioning run is a partial success, reported as a warning rather than
//! an error: the instance is already up.

pub mod dry_run;
pub mod executor;

use tracing::{info, warn};

use crate::bootscript;
use crate::compiler;
use crate::config::DeployConfig;
use crate::errors::OrchestratorError;
use crate::gcp::ControlPlane;
use crate::reconcile::DeploymentStatus;
use crate::store::{records, RecordStore};

use executor::{Executor, ExecutorOptions, StepReport};

/// Region-scoped router the NAT is attached to; one per deployment region
pub const ROUTER_NAME: &str = "steward-router";

/// NAT config name on the router
pub const NAT_NAME: &str = "steward-nat";

/// Result of one deployment run
#[derive(Debug)]
pub struct DeployReport {
    /// Record id the deployment was saved under, when bookkeeping succeeded
    pub record_id: Option<String>,

    pub steps: Vec<StepReport>,

    /// Set when provisioning succeeded but record persistence did not
    pub warning: Option<String>,
}

/// End-to-end deployment pipeline
pub struct Deployer<'a, C: ControlPlane + ?Sized, S: RecordStore + ?Sized> {
    cloud: &'a C,
    store: &'a S,
    options: ExecutorOptions,
}

impl<'a, C: ControlPlane + ?Sized, S: RecordStore + ?Sized> Deployer<'a, C, S> {
    pub fn new(cloud: &'a C, store: &'a S, options: ExecutorOptions) -> Self {
        Self {
            cloud,
            store,
            options,
        }
    }

    /// Provision the deployment described by `config`. Pass `existing_record`
    /// when re-deploying so the record is updated in place.
    pub async fn deploy(
        &self,
        config: &DeployConfig,
        existing_record: Option<&str>,
    ) -> Result<DeployReport, OrchestratorError> {
        let compiled = compiler::compile(config)?;
        let boot_payload = bootscript::generate(&compiled.boot);
        info!(
            "Provisioning {} ({}) in {}: {} steps",
            config.vm_name,
            config.project_id,
            config.zone,
            compiled.plan.steps.len()
        );

        let steps = match Executor::new(self.cloud, self.options.clone())
            .execute(&compiled.plan, &config.secrets, &boot_payload)
            .await
        {
            Ok(steps) => steps,
            Err(e) => {
                if let Some(id) = existing_record {
                    self.mark_record_error(id).await;
                }
                return Err(e);
            }
        };

        let (record_id, warning) = match self.save_record(config, existing_record).await {
            Ok(id) => (Some(id), None),
            Err(e) => {
                warn!("Instance provisioned but record save failed: {}", e);
                (
                    existing_record.map(|s| s.to_string()),
                    Some(format!(
                        "instance provisioned, but saving the deployment record failed: {}",
                        e
                    )),
                )
            }
        };

        Ok(DeployReport {
            record_id,
            steps,
            warning,
        })
    }

    async fn save_record(
        &self,
        config: &DeployConfig,
        existing_record: Option<&str>,
    ) -> Result<String, OrchestratorError> {
        let mut record = records::DeploymentRecord::from_config(config, existing_record);
        // a re-deploy keeps the original creation time
        if let Some(id) = existing_record {
            if let Some(previous) = records::load(self.store, id).await? {
                record.created_at = previous.created_at;
            }
        }
        records::save(self.store, &record).await?;
        Ok(record.id)
    }

    /// Best effort: a failed run should leave the record in `error`, but the
    /// failure we are already reporting must not be masked by a store issue.
    async fn mark_record_error(&self, id: &str) {
        let result = async {
            if let Some(mut record) = records::load(self.store, id).await? {
                record.status = DeploymentStatus::Error;
                records::save(self.store, &record).await?;
            }
            Ok::<_, OrchestratorError>(())
        }
        .await;
        if let Err(e) = result {
            warn!("Could not mark record {} as errored: {}", id, e);
        }
    }
}

