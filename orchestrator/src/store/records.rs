//! Typed deployment record
//!
//! The record is the externally visible state of one deployment: identity,
//! selections, masked key references, and the latest observed status. Secret
//! plaintext never enters a record; keys are stored masked only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::RecordStore;
use crate::config::{Branding, DeployConfig, ModelSelection, SkillSelection};
use crate::errors::OrchestratorError;
use crate::gcp::InstanceView;
use crate::reconcile::status::DeploymentStatus;
use crate::utils::mask_api_key;

/// Masked reference to a stored secret. Enough to show "key is set" in a UI,
/// never enough to recover the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedKey {
    pub secret_name: String,
    pub masked_value: String,
}

/// One deployment's persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub project_id: String,
    pub zone: String,
    pub vm_name: String,
    pub machine_type: String,
    pub branding: Branding,
    pub models: ModelSelection,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,

    /// Raw remote status string from the most recent poll
    #[serde(default)]
    pub last_health_status: Option<String>,

    #[serde(default)]
    pub internal_ip: Option<String>,

    #[serde(default)]
    pub api_keys: Vec<MaskedKey>,

    #[serde(default)]
    pub plugins: BTreeMap<String, bool>,

    #[serde(default)]
    pub skills: BTreeMap<String, SkillSelection>,
}

impl DeploymentRecord {
    /// Build a fresh record from a deployment request. The id is reused when
    /// re-deploying over an existing record, generated otherwise.
    pub fn from_config(config: &DeployConfig, id: Option<&str>) -> Self {
        let api_keys = config
            .secrets
            .iter()
            .map(|(name, value)| MaskedKey {
                secret_name: name.clone(),
                masked_value: mask_api_key(value.expose_secret()),
            })
            .collect();
        Self {
            id: id
                .map(|s| s.to_string())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            project_id: config.project_id.clone(),
            zone: config.zone.clone(),
            vm_name: config.vm_name.clone(),
            machine_type: config.machine_type.clone(),
            branding: config.branding.clone(),
            models: config.models.clone(),
            status: DeploymentStatus::Provisioning,
            created_at: Utc::now(),
            last_health_check: None,
            last_health_status: None,
            internal_ip: None,
            api_keys,
            plugins: config.plugins.clone(),
            skills: config.skills.clone(),
        }
    }
}

/// Load and deserialize a record, `None` when absent
pub async fn load<S: RecordStore + ?Sized>(
    store: &S,
    id: &str,
) -> Result<Option<DeploymentRecord>, OrchestratorError> {
    match store.get(id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and persist a record under its own id
pub async fn save<S: RecordStore + ?Sized>(
    store: &S,
    record: &DeploymentRecord,
) -> Result<(), OrchestratorError> {
    store.set(&record.id, serde_json::to_value(record)?).await
}

/// Update the status fields of an existing record from one poll observation.
/// Missing records are left alone.
pub async fn update_status<S: RecordStore + ?Sized>(
    store: &S,
    id: &str,
    status: DeploymentStatus,
    raw_status: &str,
    view: Option<&InstanceView>,
) -> Result<(), OrchestratorError> {
    let Some(mut record) = load(store, id).await? else {
        return Ok(());
    };
    record.status = status;
    record.last_health_status = Some(raw_status.to_string());
    record.last_health_check = Some(Utc::now());
    if let Some(view) = view {
        if view.internal_ip.is_some() {
            record.internal_ip = view.internal_ip.clone();
        }
    }
    save(store, &record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn sample_config() -> DeployConfig {
        serde_json::from_value(serde_json::json!({
            "project_id": "acme-1",
            "zone": "us-central1-a",
            "vm_name": "steward-vm",
            "machine_type": "e2-small",
            "models": { "primary": "gemini-2.5-pro", "fallbacks": [] },
            "secrets": { "google-ai-api-key": "AIzaSyExampleExampleExample" }
        }))
        .unwrap()
    }

    #[test]
    fn test_record_masks_keys() {
        let record = DeploymentRecord::from_config(&sample_config(), None);
        assert_eq!(record.api_keys.len(), 1);
        let masked = &record.api_keys[0].masked_value;
        assert!(!masked.contains("ExampleExample"));
        assert!(masked.contains("..."));
    }

    #[test]
    fn test_record_serialization_never_contains_plaintext() {
        let record = DeploymentRecord::from_config(&sample_config(), None);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("AIzaSyExampleExampleExample"));
    }

    #[tokio::test]
    async fn test_update_status_round_trip() {
        let store = MemoryStore::new();
        let record = DeploymentRecord::from_config(&sample_config(), Some("r1"));
        save(&store, &record).await.unwrap();

        let view = InstanceView {
            status: "RUNNING".to_string(),
            internal_ip: Some("10.0.0.5".to_string()),
            ..Default::default()
        };
        update_status(&store, "r1", DeploymentStatus::Running, "running", Some(&view))
            .await
            .unwrap();

        let loaded = load(&store, "r1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DeploymentStatus::Running);
        assert_eq!(loaded.last_health_status.as_deref(), Some("running"));
        assert_eq!(loaded.internal_ip.as_deref(), Some("10.0.0.5"));
        assert!(loaded.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_update_status_on_missing_record_is_noop() {
        let store = MemoryStore::new();
        update_status(&store, "ghost", DeploymentStatus::Running, "running", None)
            .await
            .unwrap();
        assert!(load(&store, "ghost").await.unwrap().is_none());
    }
}
