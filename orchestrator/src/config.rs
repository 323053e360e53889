//! Deployment configuration

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::utils::region_from_zone;

/// Declarative description of one agent deployment.
///
/// Created once per deployment request and discarded after compilation.
/// Secret values are held as [`SecretString`] so they never appear in debug
/// output or serialized plan representations.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Cloud project id
    pub project_id: String,

    /// Compute zone (e.g. `us-central1-a`)
    pub zone: String,

    /// Instance name
    pub vm_name: String,

    /// Machine class (e.g. `e2-small`)
    pub machine_type: String,

    /// Agent branding
    #[serde(default)]
    pub branding: Branding,

    /// Model selection
    pub models: ModelSelection,

    /// Plugin id -> enabled
    #[serde(default)]
    pub plugins: BTreeMap<String, bool>,

    /// Skill id -> selection
    #[serde(default)]
    pub skills: BTreeMap<String, SkillSelection>,

    /// Secret name -> plaintext value
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretString>,
}

impl DeployConfig {
    /// Region derived from the zone (`us-central1-a` -> `us-central1`)
    pub fn region(&self) -> String {
        region_from_zone(&self.zone)
    }
}

/// Agent display name and persona text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branding {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    #[serde(default)]
    pub personality: String,
}

fn default_bot_name() -> String {
    "Steward".to_string()
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            personality: String::new(),
        }
    }
}

/// Primary model plus ordered fallbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub primary: String,

    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// Per-skill selection in a deploy request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillSelection {
    pub enabled: bool,

    /// Overrides the skill's registry cron when set
    #[serde(default)]
    pub schedule_override: Option<String>,
}
