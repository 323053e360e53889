//! Provisioning plan executor
//!
//! Runs a plan's steps strictly in order against the control plane. Every
//! step is idempotent: "already exists" is a logged skip, any other failure
//! aborts the pipeline with the step name attached.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{NAT_NAME, ROUTER_NAME};
use crate::errors::OrchestratorError;
use crate::gcp::{ApiOutcome, ControlPlane};
use crate::plan::{InstanceSpec, Operation, ProvisioningPlan, Step};

/// Executor timing options. Every wait point is bounded.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Grace period after *creating* a service identity, before granting it
    /// a role. Identity propagation is asynchronous; immediate grants can
    /// silently fail to apply. Not needed when the identity already existed.
    pub identity_propagation_wait: Duration,

    /// Maximum poll attempts for an asynchronous region operation
    pub operation_poll_attempts: u32,

    /// Delay between operation poll attempts
    pub operation_poll_delay: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            identity_propagation_wait: Duration::from_secs(10),
            operation_poll_attempts: 30,
            operation_poll_delay: Duration::from_secs(2),
        }
    }
}

/// How a step concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The remote resource was created or modified
    Applied,

    /// The resource already existed; nothing was changed
    AlreadyExisted,
}

/// Per-step execution report
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: String,
    pub outcome: StepOutcome,
}

/// Executes provisioning plans against a control plane
pub struct Executor<'a, C: ControlPlane + ?Sized> {
    cloud: &'a C,
    options: ExecutorOptions,
}

impl<'a, C: ControlPlane + ?Sized> Executor<'a, C> {
    pub fn new(cloud: &'a C, options: ExecutorOptions) -> Self {
        Self { cloud, options }
    }

    /// Execute all steps in order. Secret plaintext is looked up from
    /// `secrets` at the moment the version-add call happens; it is not part
    /// of the plan.
    pub async fn execute(
        &self,
        plan: &ProvisioningPlan,
        secrets: &BTreeMap<String, SecretString>,
        boot_payload: &str,
    ) -> Result<Vec<StepReport>, OrchestratorError> {
        let mut reports = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            info!("Executing step: {}", step.name);
            let outcome = self
                .execute_step(plan, step, secrets, boot_payload)
                .await
                .map_err(|e| e.for_step(&step.name))?;
            if outcome == StepOutcome::AlreadyExisted {
                info!("Step {}: already exists, skipping", step.name);
            }
            reports.push(StepReport {
                step: step.name.clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    async fn execute_step(
        &self,
        plan: &ProvisioningPlan,
        step: &Step,
        secrets: &BTreeMap<String, SecretString>,
        boot_payload: &str,
    ) -> Result<StepOutcome, OrchestratorError> {
        let project = &plan.project_id;
        match &step.op {
            Operation::EnableApis { apis } => {
                for api in apis {
                    self.cloud.enable_api(project, api).await?;
                    debug!("API enabled: {}", api);
                }
                Ok(StepOutcome::Applied)
            }

            Operation::CreateServiceIdentity {
                account_id,
                display_name,
                ..
            } => {
                let outcome = self
                    .cloud
                    .create_service_identity(project, account_id, display_name)
                    .await?;
                if outcome == ApiOutcome::Created {
                    // Propagation is asynchronous; grant too early and the
                    // binding may not stick.
                    info!(
                        "Service identity created, waiting {:?} for propagation",
                        self.options.identity_propagation_wait
                    );
                    sleep(self.options.identity_propagation_wait).await;
                    Ok(StepOutcome::Applied)
                } else {
                    Ok(StepOutcome::AlreadyExisted)
                }
            }

            Operation::GrantRole { email, role } => {
                let outcome = self.grant_role(project, email, role).await?;
                self.grant_default_compute_identity(project, role).await;
                Ok(outcome)
            }

            Operation::CreateSecret { name } => {
                let outcome = self.cloud.create_secret(project, name).await?;
                if let Some(value) = secrets.get(name) {
                    // Not idempotent in effect (each run adds a version), but
                    // safe to repeat: consumers always read `latest`.
                    self.cloud.add_secret_version(project, name, value).await?;
                } else {
                    warn!("No value supplied for secret {}, skipping version add", name);
                }
                Ok(match outcome {
                    ApiOutcome::Created => StepOutcome::Applied,
                    ApiOutcome::AlreadyExists => StepOutcome::AlreadyExisted,
                })
            }

            Operation::CreateFirewallRule { rule } => {
                match self.cloud.create_firewall_rule(project, rule).await? {
                    ApiOutcome::Created => Ok(StepOutcome::Applied),
                    ApiOutcome::AlreadyExists => Ok(StepOutcome::AlreadyExisted),
                }
            }

            Operation::EnsureRouterNat { region } => self.ensure_router_nat(project, region).await,

            Operation::CreateInstance { spec } => {
                self.create_or_update_instance(project, spec, boot_payload)
                    .await
            }
        }
    }

    /// Read-modify-write role grant: fetch the policy, add the member to the
    /// matching role's member set if absent, write the policy back.
    async fn grant_role(
        &self,
        project: &str,
        email: &str,
        role: &str,
    ) -> Result<StepOutcome, OrchestratorError> {
        let mut policy = self.cloud.get_iam_policy(project).await?;
        let member = format!("serviceAccount:{}", email);
        if add_policy_binding(&mut policy, role, &member) {
            self.cloud.set_iam_policy(project, policy).await?;
            Ok(StepOutcome::Applied)
        } else {
            Ok(StepOutcome::AlreadyExisted)
        }
    }

    /// Best-effort grant to the project's default compute identity as well,
    /// in case the custom identity cannot be attached to the instance.
    async fn grant_default_compute_identity(&self, project: &str, role: &str) {
        let number = match self.cloud.project_number(project).await {
            Ok(Some(number)) => number,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not resolve project number: {}", e);
                return;
            }
        };
        let member = format!(
            "serviceAccount:{}-compute@developer.gserviceaccount.com",
            number
        );
        let result = async {
            let mut policy = self.cloud.get_iam_policy(project).await?;
            if add_policy_binding(&mut policy, role, &member) {
                self.cloud.set_iam_policy(project, policy).await?;
            }
            Ok::<_, OrchestratorError>(())
        }
        .await;
        if let Err(e) = result {
            warn!("Default compute identity grant failed: {}", e);
        }
    }

    /// The router is a region-scoped singleton; NAT is a sub-resource
    /// patched onto it. A freshly created router may need its asynchronous
    /// operation polled to completion before it can be read back.
    async fn ensure_router_nat(
        &self,
        project: &str,
        region: &str,
    ) -> Result<StepOutcome, OrchestratorError> {
        let creation = self.cloud.create_router(project, region, ROUTER_NAME).await?;

        if creation.outcome == ApiOutcome::Created {
            if let Some(operation) = &creation.operation {
                self.wait_for_region_operation(project, region, operation).await;
            }
        }

        let mut router = self.cloud.get_router(project, region, ROUTER_NAME).await?;
        let has_nat = router
            .get("nats")
            .and_then(Value::as_array)
            .map(|nats| {
                nats.iter()
                    .any(|n| n.get("name").and_then(Value::as_str) == Some(NAT_NAME))
            })
            .unwrap_or(false);
        if has_nat {
            return Ok(StepOutcome::AlreadyExisted);
        }

        let nats = router
            .as_object_mut()
            .ok_or_else(|| OrchestratorError::ApiError("router is not an object".to_string()))?
            .entry("nats")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(nats) = nats.as_array_mut() {
            nats.push(json!({
                "name": NAT_NAME,
                "natIpAllocateOption": "AUTO_ONLY",
                "sourceSubnetworkIpRangesToNat": "ALL_SUBNETWORKS_ALL_IP_RANGES",
            }));
        }
        self.cloud
            .patch_router(project, region, ROUTER_NAME, router)
            .await?;
        Ok(StepOutcome::Applied)
    }

    /// Bounded wait for a region operation. Timing out is a soft failure:
    /// missing NAT degrades connectivity but does not abort the deployment.
    async fn wait_for_region_operation(&self, project: &str, region: &str, operation: &str) {
        for _ in 0..self.options.operation_poll_attempts {
            match self
                .cloud
                .region_operation_done(project, region, operation)
                .await
            {
                Ok(true) => return,
                Ok(false) => sleep(self.options.operation_poll_delay).await,
                Err(e) => {
                    warn!("Operation poll failed: {}", e);
                    return;
                }
            }
        }
        warn!(
            "Operation {} did not complete within the poll budget, continuing",
            operation
        );
    }

    /// Create the instance. When it already exists, push the new boot payload
    /// into its metadata and reset it so the change takes effect without
    /// deletion.
    async fn create_or_update_instance(
        &self,
        project: &str,
        spec: &InstanceSpec,
        boot_payload: &str,
    ) -> Result<StepOutcome, OrchestratorError> {
        match self.cloud.create_instance(project, spec, boot_payload).await? {
            ApiOutcome::Created => Ok(StepOutcome::Applied),
            ApiOutcome::AlreadyExists => {
                info!("Instance {} exists, updating boot payload and resetting", spec.name);
                self.cloud
                    .update_instance_metadata(project, &spec.zone, &spec.name, boot_payload)
                    .await?;
                self.cloud
                    .reset_instance(project, &spec.zone, &spec.name)
                    .await?;
                Ok(StepOutcome::AlreadyExisted)
            }
        }
    }
}

/// Add `member` to the binding for `role`, creating the binding if none
/// exists. Returns whether the policy changed. Idempotent under repeated
/// application.
pub fn add_policy_binding(policy: &mut Value, role: &str, member: &str) -> bool {
    let Some(object) = policy.as_object_mut() else {
        return false;
    };
    let bindings = object
        .entry("bindings")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(bindings) = bindings.as_array_mut() else {
        return false;
    };

    for binding in bindings.iter_mut() {
        if binding.get("role").and_then(Value::as_str) == Some(role) {
            let members = binding
                .as_object_mut()
                .map(|b| b.entry("members").or_insert_with(|| Value::Array(Vec::new())))
                .and_then(Value::as_array_mut);
            if let Some(members) = members {
                if members.iter().any(|m| m.as_str() == Some(member)) {
                    return false;
                }
                members.push(Value::String(member.to_string()));
                return true;
            }
            return false;
        }
    }

    bindings.push(json!({ "role": role, "members": [member] }));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_policy_binding_creates_role_entry() {
        let mut policy = json!({});
        assert!(add_policy_binding(&mut policy, "roles/x", "serviceAccount:a@b"));
        assert_eq!(policy["bindings"][0]["role"], "roles/x");
        assert_eq!(policy["bindings"][0]["members"][0], "serviceAccount:a@b");
    }

    #[test]
    fn test_add_policy_binding_is_idempotent() {
        let mut policy = json!({
            "bindings": [{ "role": "roles/x", "members": ["serviceAccount:a@b"] }]
        });
        assert!(!add_policy_binding(&mut policy, "roles/x", "serviceAccount:a@b"));
        assert_eq!(policy["bindings"][0]["members"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_add_policy_binding_appends_to_existing_role() {
        let mut policy = json!({
            "bindings": [{ "role": "roles/x", "members": ["serviceAccount:a@b"] }]
        });
        assert!(add_policy_binding(&mut policy, "roles/x", "serviceAccount:c@d"));
        assert_eq!(policy["bindings"][0]["members"].as_array().unwrap().len(), 2);
    }
}
