//! Plugin and skill catalogs
//!
//! Closed registries of the extension plugins and skill packs the deployed
//! agent can run. Lookup is by id through a prebuilt index; an unknown id is
//! an explicit error, never a silent miss.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::errors::OrchestratorError;

/// A secret the plugin reads from its config, keyed by the config property
/// name and backed by a named entry in the secret store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretBinding {
    /// Plugin config property (camelCase, as written into the agent config)
    pub key: &'static str,

    /// Secret store entry backing the property
    pub secret_name: &'static str,

    /// Human-readable description
    pub description: &'static str,
}

/// Metadata for one installable plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginMeta {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub required_keys: &'static [SecretBinding],
    pub optional_keys: &'static [SecretBinding],
}

impl PluginMeta {
    /// All secret bindings, required first
    pub fn bindings(&self) -> impl Iterator<Item = &'static SecretBinding> {
        self.required_keys.iter().chain(self.optional_keys.iter())
    }
}

/// Metadata for one installable skill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillMeta {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,

    /// Recurring trigger schedule (cron expression), if the skill has one
    pub cron: Option<&'static str>,

    /// Plugins the skill depends on
    pub required_plugins: &'static [&'static str],
}

pub static PLUGIN_REGISTRY: &[PluginMeta] = &[
    PluginMeta {
        id: "postiz",
        name: "Postiz Social Media",
        description: "Create and schedule social media posts across platforms",
        required_keys: &[
            SecretBinding {
                key: "postizUrl",
                secret_name: "postiz-url",
                description: "Postiz instance URL",
            },
            SecretBinding {
                key: "postizApiKey",
                secret_name: "postiz-api-key",
                description: "Postiz API key",
            },
        ],
        optional_keys: &[],
    },
    PluginMeta {
        id: "beehiiv",
        name: "Beehiiv Newsletter",
        description: "Draft and manage newsletter content via Beehiiv",
        required_keys: &[
            SecretBinding {
                key: "beehiivApiKey",
                secret_name: "beehiiv-api-key",
                description: "Beehiiv API key",
            },
            SecretBinding {
                key: "beehiivPublicationId",
                secret_name: "beehiiv-publication-id",
                description: "Beehiiv publication ID",
            },
        ],
        optional_keys: &[],
    },
    PluginMeta {
        id: "image-gen",
        name: "Image Generation",
        description: "Generate images with Gemini and DALL-E",
        required_keys: &[SecretBinding {
            key: "geminiApiKey",
            secret_name: "google-ai-api-key",
            description: "Google AI (Gemini) API key",
        }],
        optional_keys: &[SecretBinding {
            key: "openaiApiKey",
            secret_name: "openai-api-key",
            description: "OpenAI API key (DALL-E fallback)",
        }],
    },
    PluginMeta {
        id: "twitter-research",
        name: "Twitter/X Research",
        description: "Research trends, search tweets, and monitor influencers",
        required_keys: &[SecretBinding {
            key: "bearerToken",
            secret_name: "twitter-bearer-token",
            description: "Twitter API bearer token",
        }],
        optional_keys: &[],
    },
    PluginMeta {
        id: "github",
        name: "GitHub",
        description: "Read code, create branches, commit files, and open PRs",
        required_keys: &[SecretBinding {
            key: "githubToken",
            secret_name: "github-token",
            description: "GitHub fine-grained PAT",
        }],
        optional_keys: &[SecretBinding {
            key: "defaultOwner",
            secret_name: "github-default-owner",
            description: "Default GitHub org/user",
        }],
    },
    PluginMeta {
        id: "web-tools",
        name: "Web Tools",
        description: "Crawl websites and extract text from PDF files",
        required_keys: &[],
        optional_keys: &[],
    },
];

pub static SKILL_REGISTRY: &[SkillMeta] = &[
    SkillMeta {
        id: "daily-briefing",
        name: "Daily Briefing",
        description: "Morning news briefing across followed topics",
        cron: Some("0 13 * * *"),
        required_plugins: &[],
    },
    SkillMeta {
        id: "content-engine",
        name: "Content Engine",
        description: "Weekly content calendar generation from trending topics",
        cron: Some("0 1 * * 1"),
        required_plugins: &[],
    },
    SkillMeta {
        id: "daily-posts",
        name: "Daily Posts",
        description: "Draft daily social media posts from the content calendar",
        cron: Some("0 13 * * *"),
        required_plugins: &["postiz"],
    },
    SkillMeta {
        id: "newsletter-writer",
        name: "Newsletter Writer",
        description: "Weekly newsletter draft from calendar and engagement data",
        cron: Some("0 14 * * 2"),
        required_plugins: &["beehiiv"],
    },
    SkillMeta {
        id: "engagement-monitor",
        name: "Engagement Monitor",
        description: "Weekly social media analytics and performance insights",
        cron: Some("0 18 * * 5"),
        required_plugins: &["postiz"],
    },
    SkillMeta {
        id: "job-hunter",
        name: "Job Hunter",
        description: "On-demand job search, company research, and outreach drafting",
        cron: None,
        required_plugins: &[],
    },
];

fn plugin_index() -> &'static HashMap<&'static str, &'static PluginMeta> {
    static INDEX: OnceLock<HashMap<&'static str, &'static PluginMeta>> = OnceLock::new();
    INDEX.get_or_init(|| PLUGIN_REGISTRY.iter().map(|p| (p.id, p)).collect())
}

fn skill_index() -> &'static HashMap<&'static str, &'static SkillMeta> {
    static INDEX: OnceLock<HashMap<&'static str, &'static SkillMeta>> = OnceLock::new();
    INDEX.get_or_init(|| SKILL_REGISTRY.iter().map(|s| (s.id, s)).collect())
}

/// Look up a plugin by id
pub fn plugin_by_id(id: &str) -> Result<&'static PluginMeta, OrchestratorError> {
    plugin_index()
        .get(id)
        .copied()
        .ok_or_else(|| OrchestratorError::UnknownPlugin(id.to_string()))
}

/// Look up a skill by id
pub fn skill_by_id(id: &str) -> Result<&'static SkillMeta, OrchestratorError> {
    skill_index()
        .get(id)
        .copied()
        .ok_or_else(|| OrchestratorError::UnknownSkill(id.to_string()))
}
