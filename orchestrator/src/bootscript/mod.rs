//! Boot payload generation
//!
//! Renders a [`BootScriptContext`] into one self-contained POSIX shell script
//! embedded as instance metadata. The machine executes it with no further
//! contact with the orchestrator, so everything it needs is in here: secret
//! names to fetch, plugin and skill artifacts to download, the full agent
//! configuration, and the service definition.
//!
//! Rendering is deterministic: the same context always produces byte-identical
//! output.

use serde_json::{json, Map, Value};

use crate::config::{Branding, ModelSelection};

/// npm package the first-boot block installs
pub const AGENT_PACKAGE: &str = "steward-agent";

/// Pinned agent version
pub const AGENT_VERSION: &str = "1.4.2";

/// Fixed artifact source plugin and skill files are downloaded from
pub const ARTIFACT_BASE: &str = "https://raw.githubusercontent.com/steward-dev/steward/main";

/// Marker file gating the one-time install block
const INSTALL_MARKER: &str = "/opt/steward/.installed";

/// Marker file gating the one-time grace restart
const GRACE_MARKER: &str = "/opt/steward/.grace-restarted";

/// Model providers recognized by the auth-profile builder, with the env var
/// whose presence enables each entry.
const AUTH_PROVIDERS: &[(&str, &str, &str)] = &[
    ("google:manual", "google", "GOOGLE_AI_API_KEY"),
    ("anthropic:manual", "anthropic", "ANTHROPIC_API_KEY"),
    ("openai:manual", "openai", "OPENAI_API_KEY"),
    ("openrouter:manual", "openrouter", "OPENROUTER_API_KEY"),
];

/// Everything the boot script needs, closed over at compile time
#[derive(Debug, Clone)]
pub struct BootScriptContext {
    pub project_id: String,

    /// Secret names to fetch at boot (baseline union caller-supplied)
    pub secret_fetch_list: Vec<String>,

    /// Enabled plugins with their config-key -> secret-name bindings
    pub plugins: Vec<PluginInstall>,

    /// Enabled skills with their effective schedule
    pub skills: Vec<SkillInstall>,

    pub branding: Branding,
    pub models: ModelSelection,
}

/// One plugin to materialize at boot
#[derive(Debug, Clone)]
pub struct PluginInstall {
    pub id: String,

    /// (config key, secret name) pairs, required keys first
    pub bindings: Vec<(String, String)>,
}

/// One skill to materialize at boot
#[derive(Debug, Clone)]
pub struct SkillInstall {
    pub id: String,
    pub schedule: Option<String>,
}

/// Uppercase, hyphen-to-underscore environment variable name for a secret
pub fn env_var_name(secret_name: &str) -> String {
    secret_name.to_uppercase().replace('-', "_")
}

/// Render the boot payload for a context
pub fn generate(ctx: &BootScriptContext) -> String {
    let mut script = String::new();

    script.push_str("#!/usr/bin/env bash\n");
    script.push_str("set -euo pipefail\n\n");
    script.push_str("STEWARD_DIR=\"/opt/steward\"\n");
    script.push_str(&format!("MARKER=\"{}\"\n\n", INSTALL_MARKER));

    push_install_block(&mut script);
    push_secret_fetches(&mut script, ctx);
    push_env_file(&mut script, ctx);
    push_plugin_installs(&mut script, ctx);
    push_agent_config(&mut script, ctx);
    push_auth_profiles(&mut script);
    push_skill_installs(&mut script, ctx);
    push_service_unit(&mut script, ctx);
    push_grace_restart(&mut script);

    script
}

/// First-boot guard: runtime and agent install happen once, gated on a
/// marker file. Reboots skip straight to configuration.
fn push_install_block(script: &mut String) {
    script.push_str("# --- Install Node 22 + Steward (first boot only) ---\n");
    script.push_str("if [ ! -f \"${MARKER}\" ]; then\n");
    script.push_str("  echo \"==> Installing dependencies...\"\n");
    script.push_str("  apt-get update -y\n");
    script.push_str("  apt-get install -y git curl build-essential python3\n\n");
    script.push_str("  echo \"==> Installing Node 22...\"\n");
    script.push_str("  curl -fsSL https://deb.nodesource.com/setup_22.x | bash -\n");
    script.push_str("  apt-get install -y nodejs\n\n");
    script.push_str("  echo \"==> Installing Steward...\"\n");
    script.push_str(&format!(
        "  npm install -g {}@{}\n\n",
        AGENT_PACKAGE, AGENT_VERSION
    ));
    script.push_str("  mkdir -p \"${STEWARD_DIR}\"\n");
    script.push_str("  touch \"${MARKER}\"\n");
    script.push_str("fi\n\n");
}

/// One fetch per secret name. A missing secret yields an empty variable, not
/// an aborted boot; plugin registration downstream self-disables on missing
/// config.
fn push_secret_fetches(script: &mut String, ctx: &BootScriptContext) {
    script.push_str("# --- Fetch secrets ---\n");
    script.push_str(&format!(
        "PROJECT_ID=\"{}\"\n\n",
        escape_for_shell(&ctx.project_id)
    ));
    script.push_str("fetch_secret() {\n");
    script.push_str(
        "  gcloud secrets versions access latest --secret=\"$1\" --project=\"${PROJECT_ID}\" 2>/dev/null\n",
    );
    script.push_str("}\n\n");
    script.push_str("echo \"==> Fetching secrets...\"\n");
    for name in &ctx.secret_fetch_list {
        script.push_str(&format!(
            "{}=\"$(fetch_secret {} || true)\"\n",
            env_var_name(name),
            name
        ));
    }
    script.push('\n');
}

/// Owner-only environment file. The service reads secrets from here, never
/// from command-line arguments or the unit file.
fn push_env_file(script: &mut String, ctx: &BootScriptContext) {
    script.push_str("# --- Environment file ---\n");
    script.push_str("cat > /etc/steward.env <<ENVFILE\n");
    for name in &ctx.secret_fetch_list {
        let var = env_var_name(name);
        script.push_str(&format!("{}=${{{}}}\n", var, var));
    }
    // Alias for tools that expect the GEMINI_ name
    script.push_str("GEMINI_API_KEY=${GOOGLE_AI_API_KEY}\n");
    script.push_str("ENVFILE\n");
    script.push_str("chmod 600 /etc/steward.env\n\n");
}

/// Per-plugin artifact download with all-or-nothing cleanup: when the plugin
/// manifest is missing after the attempt, the whole directory is removed so a
/// half-installed plugin never lingers.
fn push_plugin_installs(script: &mut String, ctx: &BootScriptContext) {
    script.push_str("# --- Install plugins ---\n");
    script.push_str("echo \"==> Installing plugins...\"\n");
    for plugin in &ctx.plugins {
        let id = &plugin.id;
        script.push_str(&format!("\n# Install plugin: {}\n", id));
        script.push_str(&format!("DEST=\"/root/.steward/extensions/{}\"\n", id));
        script.push_str("mkdir -p \"${DEST}\"\n");
        for file in ["package.json", "index.ts", "steward.plugin.json"] {
            script.push_str(&format!(
                "curl -sfL \"{base}/plugins/{id}/{file}\" -o \"${{DEST}}/{file}\" 2>/dev/null || rm -f \"${{DEST}}/{file}\"\n",
                base = ARTIFACT_BASE,
                id = id,
                file = file
            ));
        }
        script.push_str("# Remove plugin dir if manifest is missing (download failed)\n");
        script.push_str(
            "[ -f \"${DEST}/steward.plugin.json\" ] && cd \"${DEST}\" && npm install --omit=dev 2>/dev/null || rm -rf \"${DEST}\"\n",
        );
    }
    script.push('\n');
}

/// Full agent configuration, written through an unquoted heredoc so the
/// `${VAR}` tokens expand at write time. The JSON itself is rendered in two
/// phases (see [`render_config_json`]); secret values never appear in the
/// script body.
fn push_agent_config(script: &mut String, ctx: &BootScriptContext) {
    script.push_str("# --- Write full steward.json (heredoc with shell var expansion) ---\n");
    script.push_str("echo \"==> Writing Steward configuration...\"\n");
    script.push_str("GATEWAY_TOKEN=\"$(openssl rand -hex 32)\"\n");
    script.push_str("mkdir -p /root/.steward\n");
    script.push_str("cat > /root/.steward/steward.json <<CFGEOF\n");
    script.push_str(&render_config_json(ctx));
    script.push('\n');
    script.push_str("CFGEOF\n");
    script.push_str("echo \"==> Configuration written\"\n\n");
}

/// Auth-profile document built incrementally: one entry per recognized
/// provider whose secret variable is non-empty, with the separator emitted
/// before every entry after the first.
fn push_auth_profiles(script: &mut String) {
    script.push_str("# --- Write auth profiles ---\n");
    script.push_str("echo \"==> Writing auth profiles...\"\n");
    script.push_str("mkdir -p /root/.steward/agents/main/agent\n");
    script.push_str("printf '{\"version\":1,\"profiles\":{' > /tmp/auth-profiles.json\n");
    script.push_str("SEP=\"\"\n");
    for (profile, provider, env_var) in AUTH_PROVIDERS {
        script.push_str(&format!("if [ -n \"${{{}:-}}\" ]; then\n", env_var));
        script.push_str(&format!(
            "  printf '%s\"{profile}\":{{\"provider\":\"{provider}\",\"token\":\"%s\",\"createdAt\":\"2026-01-01T00:00:00Z\"}}' \"${{SEP}}\" \"${{{var}}}\" >> /tmp/auth-profiles.json\n",
            profile = profile,
            provider = provider,
            var = env_var
        ));
        script.push_str("  SEP=\",\"\n");
        script.push_str("fi\n");
    }
    script.push_str("printf '}}' >> /tmp/auth-profiles.json\n");
    script.push_str("mv /tmp/auth-profiles.json /root/.steward/agents/main/agent/auth-profiles.json\n");
    script.push_str("echo \"==> Auth profiles written\"\n\n");
}

/// Per-skill definition download; schedule registration failures are
/// tolerated so an existing trigger is left alone.
fn push_skill_installs(script: &mut String, ctx: &BootScriptContext) {
    script.push_str("# --- Install skills ---\n");
    script.push_str("echo \"==> Installing skills...\"\n");
    for skill in &ctx.skills {
        let id = &skill.id;
        script.push_str(&format!("\n# Install skill: {}\n", id));
        script.push_str(&format!("SKILL_DIR=\"/root/.steward/skills/{}\"\n", id));
        script.push_str("mkdir -p \"${SKILL_DIR}\"\n");
        script.push_str(&format!(
            "curl -sL \"{}/skills/{}/SKILL.md\" -o \"${{SKILL_DIR}}/SKILL.md\" || true\n",
            ARTIFACT_BASE, id
        ));
        if let Some(cron) = &skill.schedule {
            script.push_str(&format!(
                "steward cron add --name '{id}' --cron '{cron}' --message '/{id}' 2>/dev/null || true\n",
                id = id,
                cron = cron
            ));
        }
    }
    script.push('\n');
}

/// Service unit wired to the environment file, restarting on crash
fn push_service_unit(script: &mut String, ctx: &BootScriptContext) {
    script.push_str("# --- Systemd unit ---\n");
    script.push_str("cat > /etc/systemd/system/steward.service <<UNIT\n");
    script.push_str("[Unit]\n");
    script.push_str(&format!(
        "Description=Steward Gateway - {}\n",
        escape_for_heredoc(&ctx.branding.bot_name)
    ));
    script.push_str("After=network-online.target\n");
    script.push_str("Wants=network-online.target\n\n");
    script.push_str("[Service]\n");
    script.push_str("Type=simple\n");
    script.push_str("EnvironmentFile=/etc/steward.env\n");
    script.push_str("ExecStartPre=-/usr/bin/env steward security audit\n");
    script.push_str("ExecStart=/usr/bin/env steward gateway run --bind loopback\n");
    script.push_str("Restart=always\n");
    script.push_str("RestartSec=10\n\n");
    script.push_str("[Install]\n");
    script.push_str("WantedBy=multi-user.target\n");
    script.push_str("UNIT\n\n");
    script.push_str("systemctl daemon-reload\n");
    script.push_str("systemctl enable steward\n");
    script.push_str("systemctl restart steward\n");
    script.push_str("echo \"==> Steward gateway started\"\n\n");
}

/// One-shot, marker-guarded delayed restart. On first boot the gateway comes
/// up under heavy I/O from plugin installs; the restart 90s later lets
/// channel polling initialize cleanly. Scheduled, never confirmed.
fn push_grace_restart(script: &mut String) {
    script.push_str("# --- First-boot grace restart ---\n");
    script.push_str(&format!("if [ ! -f \"{}\" ]; then\n", GRACE_MARKER));
    script.push_str("  echo \"==> Scheduling grace restart in 90s (first boot)...\"\n");
    script.push_str(&format!(
        "  (sleep 90 && systemctl restart steward && touch {}) &\n",
        GRACE_MARKER
    ));
    script.push_str("  disown\n");
    script.push_str("fi\n");
}

/// Two-phase config render: build the JSON document with opaque placeholder
/// markers where secret values go, serialize it, escape the result for the
/// unquoted heredoc, then substitute each marker with its `${VAR}` token.
/// Secret values are never concatenated into the document.
pub fn render_config_json(ctx: &BootScriptContext) -> String {
    let mut entries = Map::new();
    for plugin in &ctx.plugins {
        let mut cfg = Map::new();
        for (key, secret_name) in &plugin.bindings {
            cfg.insert(key.clone(), Value::String(marker(&env_var_name(secret_name))));
        }
        entries.insert(
            plugin.id.clone(),
            json!({ "enabled": true, "config": Value::Object(cfg) }),
        );
    }

    let mut models = Map::new();
    models.insert(ctx.models.primary.clone(), json!({}));
    for fallback in &ctx.models.fallbacks {
        models.insert(fallback.clone(), json!({}));
    }

    let allow: Vec<&str> = ctx.plugins.iter().map(|p| p.id.as_str()).collect();

    let config = json!({
        "meta": { "lastTouchedVersion": AGENT_VERSION },
        "agents": {
            "defaults": {
                "identity": {
                    "name": ctx.branding.bot_name,
                    "persona": ctx.branding.personality,
                },
                "model": {
                    "primary": ctx.models.primary,
                    "fallbacks": ctx.models.fallbacks,
                },
                "models": Value::Object(models),
            }
        },
        "channels": {
            "telegram": {
                "enabled": true,
                "dmPolicy": "open",
                "botToken": marker("TELEGRAM_BOT_TOKEN"),
                "allowFrom": ["*"],
                "groupPolicy": "open",
            }
        },
        "gateway": {
            "mode": "local",
            "bind": "loopback",
            "auth": { "token": marker("GATEWAY_TOKEN") },
        },
        "plugins": {
            "allow": allow,
            "entries": Value::Object(entries),
        },
    });

    let serialized = serde_json::to_string_pretty(&config)
        .unwrap_or_else(|_| String::from("{}"));
    substitute_markers(&escape_for_heredoc(&serialized))
}

const MARKER_PREFIX: &str = "@@ENV:";
const MARKER_SUFFIX: &str = "@@";

fn marker(env_var: &str) -> String {
    format!("{}{}{}", MARKER_PREFIX, env_var, MARKER_SUFFIX)
}

/// Replace every `"@@ENV:VAR@@"` occurrence with the shell-expandable token.
/// Markers only ever appear as whole JSON string values, so the replacement
/// cannot corrupt surrounding structure.
fn substitute_markers(serialized: &str) -> String {
    let mut out = String::with_capacity(serialized.len());
    let mut rest = serialized;
    while let Some(start) = rest.find(MARKER_PREFIX) {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        let after_prefix = &tail[MARKER_PREFIX.len()..];
        match after_prefix.find(MARKER_SUFFIX) {
            Some(end) => {
                let var = &after_prefix[..end];
                out.push_str(&format!("${{{}}}", var));
                rest = &after_prefix[end + MARKER_SUFFIX.len()..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escape text destined for an unquoted heredoc body so the shell leaves it
/// alone at expansion time. Backslash first, then the expansion triggers.
fn escape_for_heredoc(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
}

/// Escape text placed inside a double-quoted shell word
fn escape_for_shell(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BootScriptContext {
        BootScriptContext {
            project_id: "acme-1".to_string(),
            secret_fetch_list: vec![
                "telegram-bot-token".to_string(),
                "google-ai-api-key".to_string(),
            ],
            plugins: vec![PluginInstall {
                id: "postiz".to_string(),
                bindings: vec![
                    ("postizUrl".to_string(), "postiz-url".to_string()),
                    ("postizApiKey".to_string(), "postiz-api-key".to_string()),
                ],
            }],
            skills: vec![SkillInstall {
                id: "daily-briefing".to_string(),
                schedule: Some("0 13 * * *".to_string()),
            }],
            branding: Branding::default(),
            models: ModelSelection {
                primary: "anthropic/claude-sonnet-4".to_string(),
                fallbacks: vec!["openai/gpt-4o".to_string()],
            },
        }
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("telegram-bot-token"), "TELEGRAM_BOT_TOKEN");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let ctx = context();
        assert_eq!(generate(&ctx), generate(&ctx));
    }

    #[test]
    fn test_secret_fetches_tolerate_absence() {
        let script = generate(&context());
        assert!(script.contains("TELEGRAM_BOT_TOKEN=\"$(fetch_secret telegram-bot-token || true)\""));
    }

    #[test]
    fn test_config_markers_are_substituted() {
        let rendered = render_config_json(&context());
        assert!(rendered.contains("\"botToken\": \"${TELEGRAM_BOT_TOKEN}\""));
        assert!(rendered.contains("\"postizApiKey\": \"${POSTIZ_API_KEY}\""));
        assert!(!rendered.contains(MARKER_PREFIX));
    }

    #[test]
    fn test_heredoc_escaping_protects_user_text() {
        let mut ctx = context();
        ctx.branding.personality = "costs $5 and `loves` back\\slashes".to_string();
        let rendered = render_config_json(&ctx);
        assert!(rendered.contains("costs \\$5"));
        assert!(rendered.contains("\\`loves\\`"));
        // The intentional expansion tokens survive unescaped
        assert!(rendered.contains("${GATEWAY_TOKEN}"));
    }

    #[test]
    fn test_plugin_cleanup_is_all_or_nothing() {
        let script = generate(&context());
        assert!(script.contains(
            "[ -f \"${DEST}/steward.plugin.json\" ] && cd \"${DEST}\" && npm install --omit=dev 2>/dev/null || rm -rf \"${DEST}\""
        ));
    }

    #[test]
    fn test_env_file_has_owner_only_permissions() {
        let script = generate(&context());
        assert!(script.contains("chmod 600 /etc/steward.env"));
    }

    #[test]
    fn test_grace_restart_is_marker_guarded() {
        let script = generate(&context());
        assert!(script.contains("if [ ! -f \"/opt/steward/.grace-restarted\" ]; then"));
        assert!(script.contains("(sleep 90 && systemctl restart steward && touch /opt/steward/.grace-restarted) &"));
    }
}
