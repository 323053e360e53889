//! Provisioning plan model
//!
//! A plan is an ordered list of idempotent remote operations compiled from a
//! [`DeployConfig`](crate::config::DeployConfig). Steps are ordered by hard
//! dependency: identity before role grant, router before NAT, everything
//! before the instance. The plan carries secret *names* only; plaintext
//! values travel separately and never enter the plan representation.

use serde::Serialize;

/// Ordered sequence of provisioning steps for one deployment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningPlan {
    pub project_id: String,
    pub zone: String,
    pub region: String,
    pub steps: Vec<Step>,
}

impl ProvisioningPlan {
    /// Names of all steps, in execution order
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// One named, idempotent remote operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub name: String,
    pub op: Operation,
}

/// The remote side effect a step performs.
///
/// Every creation tolerates "already exists"; the executor treats a conflict
/// as a logged skip, not a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Enable the named control-plane APIs on the project
    EnableApis { apis: Vec<String> },

    /// Create the deployment's service identity (tolerates conflict)
    CreateServiceIdentity {
        account_id: String,
        display_name: String,
        email: String,
    },

    /// Grant the identity a role via policy read-modify-write
    GrantRole { email: String, role: String },

    /// Create a secret container and add a version with its value
    CreateSecret { name: String },

    /// Create a firewall rule (tolerates conflict)
    CreateFirewallRule { rule: FirewallRule },

    /// Ensure the region-scoped router exists and carries NAT config
    EnsureRouterNat { region: String },

    /// Create the instance, or update its boot metadata and reset on conflict
    CreateInstance { spec: InstanceSpec },
}

/// Firewall rule specification, shaped after the compute API body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRule {
    pub name: String,
    pub direction: String,
    pub priority: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<ProtocolPorts>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied: Option<Vec<ProtocolMatch>>,

    pub source_ranges: Vec<String>,
    pub target_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolPorts {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolMatch {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
}

/// Instance shape for the final plan step.
///
/// The boot payload is deliberately absent; the provisioner embeds it as
/// instance metadata when the step executes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSpec {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub service_identity_email: String,
    pub network_tag: String,
}
