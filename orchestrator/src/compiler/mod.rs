//! Deployment configuration compiler
//!
//! Pure transformation of a [`DeployConfig`] into a [`ProvisioningPlan`] and
//! a [`BootScriptContext`]. No remote calls: the service identity email is
//! derived from the project id, and the secret fetch list is computed from
//! the fixed baseline plus whatever the caller supplied.

use crate::bootscript::{BootScriptContext, PluginInstall, SkillInstall};
use crate::config::DeployConfig;
use crate::errors::OrchestratorError;
use crate::plan::{
    FirewallRule, InstanceSpec, Operation, ProtocolMatch, ProtocolPorts, ProvisioningPlan, Step,
};
use crate::registry;

/// Fixed account slug the service identity is created under. The email is
/// fully determined by this and the project id, so later steps can reference
/// the identity without any lookup.
pub const SERVICE_ACCOUNT_SLUG: &str = "steward-sa";

/// Display name for the service identity
pub const SERVICE_ACCOUNT_DISPLAY_NAME: &str = "Steward SA";

/// Role the identity needs to read secrets at boot
pub const SECRET_ACCESSOR_ROLE: &str = "roles/secretmanager.secretAccessor";

/// Control-plane APIs the deployment depends on
pub const REQUIRED_APIS: &[&str] = &["compute.googleapis.com", "secretmanager.googleapis.com"];

/// Network tag attached to the instance and targeted by firewall rules
pub const NETWORK_TAG: &str = "steward";

/// Secrets that may exist in the secret store regardless of what the current
/// request supplies. The boot script always tries to fetch all of them, so
/// re-deploys and reboots work even when the caller did not re-enter keys.
pub const BASELINE_SECRETS: &[&str] = &[
    "telegram-bot-token",
    "google-ai-api-key",
    "openai-api-key",
    "openrouter-api-key",
    "anthropic-api-key",
    "postiz-api-key",
    "postiz-url",
    "beehiiv-api-key",
    "beehiiv-publication-id",
    "twitter-bearer-token",
    "brave-search-api-key",
    "github-token",
    "github-default-owner",
];

/// Result of compiling one deployment request
#[derive(Debug, Clone)]
pub struct CompiledDeployment {
    pub plan: ProvisioningPlan,
    pub boot: BootScriptContext,
}

/// Deterministic service identity email for a project
pub fn service_identity_email(project_id: &str) -> String {
    format!(
        "{}@{}.iam.gserviceaccount.com",
        SERVICE_ACCOUNT_SLUG, project_id
    )
}

/// Baseline secret names unioned with the caller-supplied ones, deduplicated,
/// baseline order first.
pub fn secret_fetch_list(config: &DeployConfig) -> Vec<String> {
    let mut list: Vec<String> = BASELINE_SECRETS.iter().map(|s| s.to_string()).collect();
    for name in config.secrets.keys() {
        if !list.iter().any(|n| n == name) {
            list.push(name.clone());
        }
    }
    list
}

/// Compile a deployment request into a plan and a boot script context
pub fn compile(config: &DeployConfig) -> Result<CompiledDeployment, OrchestratorError> {
    validate(config)?;

    let email = service_identity_email(&config.project_id);
    let region = config.region();

    // Enabled selections, in stable (sorted) order. Unknown ids fail here
    // rather than producing a payload that silently skips them.
    let mut plugins = Vec::new();
    for (id, enabled) in &config.plugins {
        if !enabled {
            continue;
        }
        let meta = registry::plugin_by_id(id)?;
        plugins.push(PluginInstall {
            id: meta.id.to_string(),
            bindings: meta
                .bindings()
                .map(|b| (b.key.to_string(), b.secret_name.to_string()))
                .collect(),
        });
    }

    let mut skills = Vec::new();
    for (id, selection) in &config.skills {
        if !selection.enabled {
            continue;
        }
        let meta = registry::skill_by_id(id)?;
        let schedule = selection
            .schedule_override
            .clone()
            .or_else(|| meta.cron.map(|c| c.to_string()));
        skills.push(SkillInstall {
            id: meta.id.to_string(),
            schedule,
        });
    }

    let mut steps = vec![
        Step {
            name: "enable-apis".to_string(),
            op: Operation::EnableApis {
                apis: REQUIRED_APIS.iter().map(|a| a.to_string()).collect(),
            },
        },
        Step {
            name: "create-service-identity".to_string(),
            op: Operation::CreateServiceIdentity {
                account_id: SERVICE_ACCOUNT_SLUG.to_string(),
                display_name: SERVICE_ACCOUNT_DISPLAY_NAME.to_string(),
                email: email.clone(),
            },
        },
        Step {
            name: "grant-secret-access".to_string(),
            op: Operation::GrantRole {
                email: email.clone(),
                role: SECRET_ACCESSOR_ROLE.to_string(),
            },
        },
    ];

    for name in config.secrets.keys() {
        steps.push(Step {
            name: format!("create-secret:{}", name),
            op: Operation::CreateSecret { name: name.clone() },
        });
    }

    for rule in firewall_rules() {
        steps.push(Step {
            name: format!("create-firewall-rule:{}", rule.name),
            op: Operation::CreateFirewallRule { rule },
        });
    }

    steps.push(Step {
        name: "ensure-router-nat".to_string(),
        op: Operation::EnsureRouterNat {
            region: region.clone(),
        },
    });

    steps.push(Step {
        name: "create-instance".to_string(),
        op: Operation::CreateInstance {
            spec: InstanceSpec {
                name: config.vm_name.clone(),
                zone: config.zone.clone(),
                machine_type: config.machine_type.clone(),
                service_identity_email: email,
                network_tag: NETWORK_TAG.to_string(),
            },
        },
    });

    let plan = ProvisioningPlan {
        project_id: config.project_id.clone(),
        zone: config.zone.clone(),
        region,
        steps,
    };

    let boot = BootScriptContext {
        project_id: config.project_id.clone(),
        secret_fetch_list: secret_fetch_list(config),
        plugins,
        skills,
        branding: config.branding.clone(),
        models: config.models.clone(),
    };

    Ok(CompiledDeployment { plan, boot })
}

fn validate(config: &DeployConfig) -> Result<(), OrchestratorError> {
    if config.project_id.trim().is_empty() {
        return Err(OrchestratorError::ValidationError(
            "project id is required".to_string(),
        ));
    }
    if config.zone.trim().is_empty() {
        return Err(OrchestratorError::ValidationError(
            "zone is required".to_string(),
        ));
    }
    if config.vm_name.trim().is_empty() {
        return Err(OrchestratorError::ValidationError(
            "instance name is required".to_string(),
        ));
    }
    if config.machine_type.trim().is_empty() {
        return Err(OrchestratorError::ValidationError(
            "machine type is required".to_string(),
        ));
    }
    if config.models.primary.trim().is_empty() {
        return Err(OrchestratorError::ValidationError(
            "a primary model is required".to_string(),
        ));
    }
    Ok(())
}

/// The two fixed ingress rules: allow IAP SSH, deny everything else.
fn firewall_rules() -> Vec<FirewallRule> {
    vec![
        FirewallRule {
            name: "allow-iap-ssh".to_string(),
            direction: "INGRESS".to_string(),
            priority: 1000,
            allowed: Some(vec![ProtocolPorts {
                ip_protocol: "tcp".to_string(),
                ports: vec!["22".to_string()],
            }]),
            denied: None,
            source_ranges: vec!["35.235.240.0/20".to_string()],
            target_tags: vec![NETWORK_TAG.to_string()],
        },
        FirewallRule {
            name: "deny-all-ingress".to_string(),
            direction: "INGRESS".to_string(),
            priority: 2000,
            allowed: None,
            denied: Some(vec![ProtocolMatch {
                ip_protocol: "all".to_string(),
            }]),
            source_ranges: vec!["0.0.0.0/0".to_string()],
            target_tags: vec![NETWORK_TAG.to_string()],
        },
    ]
}
