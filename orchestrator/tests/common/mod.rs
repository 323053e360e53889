//! Shared test doubles

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{json, Value};

use steward::errors::OrchestratorError;
use steward::gcp::{ApiOutcome, ControlPlane, InstanceView, RouterCreation};
use steward::plan::{FirewallRule, InstanceSpec};

/// In-memory control plane. Records every call in order and keeps enough
/// resource state for idempotency scenarios. `fail_on` injects a failure on
/// the first call whose label starts with the given prefix.
#[derive(Default)]
pub struct FakeCloud {
    pub calls: Mutex<Vec<String>>,
    pub fail_on: Mutex<Option<String>>,
    pub project_number: Option<String>,

    enabled_apis: Mutex<HashSet<String>>,
    service_accounts: Mutex<HashSet<String>>,
    policy: Mutex<Value>,
    secrets: Mutex<HashSet<String>>,
    firewalls: Mutex<HashSet<String>>,
    routers: Mutex<HashMap<String, Value>>,
    instances: Mutex<HashMap<String, String>>,

    /// Scripted describe responses for reconciliation tests; raw status or
    /// `None` for "instance missing". When exhausted, the last entry repeats.
    describe_script: Mutex<VecDeque<Option<String>>>,
    last_describe: Mutex<Option<Option<String>>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            policy: Mutex::new(json!({})),
            ..Default::default()
        }
    }

    pub fn with_project_number(number: &str) -> Self {
        let mut cloud = Self::new();
        cloud.project_number = Some(number.to_string());
        cloud
    }

    pub fn with_describe_script(statuses: Vec<Option<&str>>) -> Self {
        let cloud = Self::new();
        *cloud.describe_script.lock().unwrap() = statuses
            .into_iter()
            .map(|s| s.map(|s| s.to_string()))
            .collect();
        cloud
    }

    pub fn script_push(&self, status: Option<&str>) {
        self.describe_script
            .lock()
            .unwrap()
            .push_back(status.map(|s| s.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, label: &str) -> Result<(), OrchestratorError> {
        self.calls.lock().unwrap().push(label.to_string());
        let mut fail_on = self.fail_on.lock().unwrap();
        if let Some(prefix) = fail_on.as_deref() {
            if label.starts_with(prefix) {
                let prefix = prefix.to_string();
                *fail_on = None;
                return Err(OrchestratorError::ApiError(format!(
                    "injected failure on {}",
                    prefix
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeCloud {
    async fn enable_api(&self, _project: &str, api: &str) -> Result<(), OrchestratorError> {
        self.record(&format!("enable_api:{}", api))?;
        self.enabled_apis.lock().unwrap().insert(api.to_string());
        Ok(())
    }

    async fn create_service_identity(
        &self,
        _project: &str,
        account_id: &str,
        _display_name: &str,
    ) -> Result<ApiOutcome, OrchestratorError> {
        self.record(&format!("create_service_identity:{}", account_id))?;
        if self
            .service_accounts
            .lock()
            .unwrap()
            .insert(account_id.to_string())
        {
            Ok(ApiOutcome::Created)
        } else {
            Ok(ApiOutcome::AlreadyExists)
        }
    }

    async fn project_number(&self, _project: &str) -> Result<Option<String>, OrchestratorError> {
        self.record("project_number")?;
        Ok(self.project_number.clone())
    }

    async fn get_iam_policy(&self, _project: &str) -> Result<Value, OrchestratorError> {
        self.record("get_iam_policy")?;
        Ok(self.policy.lock().unwrap().clone())
    }

    async fn set_iam_policy(&self, _project: &str, policy: Value) -> Result<(), OrchestratorError> {
        self.record("set_iam_policy")?;
        *self.policy.lock().unwrap() = policy;
        Ok(())
    }

    async fn create_secret(
        &self,
        _project: &str,
        name: &str,
    ) -> Result<ApiOutcome, OrchestratorError> {
        self.record(&format!("create_secret:{}", name))?;
        if self.secrets.lock().unwrap().insert(name.to_string()) {
            Ok(ApiOutcome::Created)
        } else {
            Ok(ApiOutcome::AlreadyExists)
        }
    }

    async fn add_secret_version(
        &self,
        _project: &str,
        name: &str,
        _value: &SecretString,
    ) -> Result<(), OrchestratorError> {
        self.record(&format!("add_secret_version:{}", name))?;
        Ok(())
    }

    async fn create_firewall_rule(
        &self,
        _project: &str,
        rule: &FirewallRule,
    ) -> Result<ApiOutcome, OrchestratorError> {
        self.record(&format!("create_firewall_rule:{}", rule.name))?;
        if self.firewalls.lock().unwrap().insert(rule.name.clone()) {
            Ok(ApiOutcome::Created)
        } else {
            Ok(ApiOutcome::AlreadyExists)
        }
    }

    async fn create_router(
        &self,
        _project: &str,
        region: &str,
        name: &str,
    ) -> Result<RouterCreation, OrchestratorError> {
        self.record(&format!("create_router:{}", name))?;
        let mut routers = self.routers.lock().unwrap();
        if routers.contains_key(region) {
            Ok(RouterCreation {
                outcome: ApiOutcome::AlreadyExists,
                operation: None,
            })
        } else {
            routers.insert(region.to_string(), json!({ "name": name }));
            Ok(RouterCreation {
                outcome: ApiOutcome::Created,
                operation: Some("op-router-1".to_string()),
            })
        }
    }

    async fn region_operation_done(
        &self,
        _project: &str,
        _region: &str,
        operation: &str,
    ) -> Result<bool, OrchestratorError> {
        self.record(&format!("region_operation_done:{}", operation))?;
        Ok(true)
    }

    async fn get_router(
        &self,
        _project: &str,
        region: &str,
        _name: &str,
    ) -> Result<Value, OrchestratorError> {
        self.record("get_router")?;
        self.routers
            .lock()
            .unwrap()
            .get(region)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound("router".to_string()))
    }

    async fn patch_router(
        &self,
        _project: &str,
        region: &str,
        _name: &str,
        router: Value,
    ) -> Result<(), OrchestratorError> {
        self.record("patch_router")?;
        self.routers
            .lock()
            .unwrap()
            .insert(region.to_string(), router);
        Ok(())
    }

    async fn create_instance(
        &self,
        _project: &str,
        spec: &InstanceSpec,
        boot_payload: &str,
    ) -> Result<ApiOutcome, OrchestratorError> {
        self.record(&format!("create_instance:{}", spec.name))?;
        let mut instances = self.instances.lock().unwrap();
        if instances.contains_key(&spec.name) {
            Ok(ApiOutcome::AlreadyExists)
        } else {
            instances.insert(spec.name.clone(), boot_payload.to_string());
            Ok(ApiOutcome::Created)
        }
    }

    async fn update_instance_metadata(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
        boot_payload: &str,
    ) -> Result<(), OrchestratorError> {
        self.record(&format!("update_instance_metadata:{}", name))?;
        self.instances
            .lock()
            .unwrap()
            .insert(name.to_string(), boot_payload.to_string());
        Ok(())
    }

    async fn describe_instance(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<Option<InstanceView>, OrchestratorError> {
        self.record(&format!("describe_instance:{}", name))?;
        let scripted = {
            let mut script = self.describe_script.lock().unwrap();
            match script.pop_front() {
                Some(entry) => {
                    *self.last_describe.lock().unwrap() = Some(entry.clone());
                    Some(entry)
                }
                None => self.last_describe.lock().unwrap().clone(),
            }
        };
        if let Some(entry) = scripted {
            return Ok(entry.map(|status| InstanceView {
                status,
                ..Default::default()
            }));
        }
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(name)
            .map(|_| InstanceView {
                status: "RUNNING".to_string(),
                ..Default::default()
            }))
    }

    async fn start_instance(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.record(&format!("start_instance:{}", name))
    }

    async fn stop_instance(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.record(&format!("stop_instance:{}", name))
    }

    async fn reset_instance(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.record(&format!("reset_instance:{}", name))
    }

    async fn delete_instance(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.record(&format!("delete_instance:{}", name))
    }
}

/// Deployment request used across the integration tests
pub fn sample_config() -> steward::config::DeployConfig {
    serde_json::from_value(json!({
        "project_id": "acme-1",
        "zone": "us-central1-a",
        "vm_name": "steward-vm",
        "machine_type": "e2-small",
        "branding": { "bot_name": "Archie", "personality": "dry wit" },
        "models": { "primary": "gemini-2.5-pro", "fallbacks": ["claude-sonnet-4"] },
        "plugins": { "github": true, "web-tools": true, "postiz": false },
        "skills": {
            "daily-briefing": { "enabled": true },
            "daily-posts": { "enabled": false }
        },
        "secrets": {
            "github-token": "ghp_exampleexampleexample",
            "telegram-bot-token": "123456:test-token"
        }
    }))
    .unwrap()
}
