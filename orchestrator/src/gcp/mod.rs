//! Cloud control-plane interface
//!
//! The [`ControlPlane`] trait is the seam between the orchestrator and the
//! remote cloud API. The provisioner and the reconciler are written against
//! it, so they can be exercised with an in-memory fake; [`client::GcpClient`]
//! is the production implementation.

pub mod client;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::OrchestratorError;
use crate::plan::{FirewallRule, InstanceSpec};

/// Outcome of a creation call against an idempotent endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOutcome {
    /// The resource did not exist and was created
    Created,

    /// The resource already existed (conflict response); success, not error
    AlreadyExists,
}

/// Router creation result; `operation` names the asynchronous operation to
/// poll when the router was actually created.
#[derive(Debug, Clone)]
pub struct RouterCreation {
    pub outcome: ApiOutcome,
    pub operation: Option<String>,
}

/// Instance metadata sourced from a single remote describe call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceView {
    /// Raw remote status string (e.g. `RUNNING`, `TERMINATED`, `STAGING`)
    pub status: String,

    pub last_start_timestamp: Option<String>,
    pub last_stop_timestamp: Option<String>,
    pub internal_ip: Option<String>,
    pub creation_timestamp: Option<String>,
}

/// Remote control-plane operations the orchestrator performs
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn enable_api(&self, project: &str, api: &str) -> Result<(), OrchestratorError>;

    async fn create_service_identity(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ApiOutcome, OrchestratorError>;

    /// Numeric project number, when resolvable
    async fn project_number(&self, project: &str) -> Result<Option<String>, OrchestratorError>;

    async fn get_iam_policy(&self, project: &str) -> Result<Value, OrchestratorError>;

    async fn set_iam_policy(&self, project: &str, policy: Value) -> Result<(), OrchestratorError>;

    async fn create_secret(
        &self,
        project: &str,
        name: &str,
    ) -> Result<ApiOutcome, OrchestratorError>;

    /// Adds a new version each call; safe to repeat because consumers always
    /// read `latest`.
    async fn add_secret_version(
        &self,
        project: &str,
        name: &str,
        value: &SecretString,
    ) -> Result<(), OrchestratorError>;

    async fn create_firewall_rule(
        &self,
        project: &str,
        rule: &FirewallRule,
    ) -> Result<ApiOutcome, OrchestratorError>;

    async fn create_router(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<RouterCreation, OrchestratorError>;

    /// Whether the named region operation has reached `DONE`
    async fn region_operation_done(
        &self,
        project: &str,
        region: &str,
        operation: &str,
    ) -> Result<bool, OrchestratorError>;

    async fn get_router(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<Value, OrchestratorError>;

    async fn patch_router(
        &self,
        project: &str,
        region: &str,
        name: &str,
        router: Value,
    ) -> Result<(), OrchestratorError>;

    async fn create_instance(
        &self,
        project: &str,
        spec: &InstanceSpec,
        boot_payload: &str,
    ) -> Result<ApiOutcome, OrchestratorError>;

    /// Replace the instance's boot payload metadata (existing-instance path)
    async fn update_instance_metadata(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        boot_payload: &str,
    ) -> Result<(), OrchestratorError>;

    /// Single describe call; `None` when the instance does not exist
    async fn describe_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Option<InstanceView>, OrchestratorError>;

    async fn start_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError>;

    async fn stop_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError>;

    async fn reset_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError>;

    async fn delete_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError>;
}
