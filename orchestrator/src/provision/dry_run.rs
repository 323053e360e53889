//! Dry-run plan rendering
//!
//! Renders every plan step as the equivalent `gcloud` invocation without
//! touching the control plane. Secret values never appear here; version adds
//! are shown reading from stdin.

use colored::Colorize;

use super::{NAT_NAME, ROUTER_NAME};
use crate::plan::{FirewallRule, Operation, ProvisioningPlan};

/// One rendered command block per plan step, in execution order
pub fn render(plan: &ProvisioningPlan) -> Vec<String> {
    plan.steps
        .iter()
        .map(|step| render_op(plan, &step.op))
        .collect()
}

fn render_op(plan: &ProvisioningPlan, op: &Operation) -> String {
    let project = &plan.project_id;
    match op {
        Operation::EnableApis { apis } => format!(
            "gcloud services enable {} --project={}",
            apis.join(" "),
            project
        ),

        Operation::CreateServiceIdentity {
            account_id,
            display_name,
            ..
        } => format!(
            "gcloud iam service-accounts create {} --display-name=\"{}\" --project={}",
            account_id, display_name, project
        ),

        Operation::GrantRole { email, role } => format!(
            "gcloud projects add-iam-policy-binding {} --member=serviceAccount:{} --role={}",
            project, email, role
        ),

        Operation::CreateSecret { name } => format!(
            "gcloud secrets create {name} --replication-policy=automatic --project={project}\n\
             gcloud secrets versions add {name} --data-file=- --project={project}"
        ),

        Operation::CreateFirewallRule { rule } => render_firewall_rule(project, rule),

        Operation::EnsureRouterNat { region } => format!(
            "gcloud compute routers create {ROUTER_NAME} --network=default --region={region} --project={project}\n\
             gcloud compute routers nats create {NAT_NAME} --router={ROUTER_NAME} --region={region} \
             --auto-allocate-nat-external-ips --nat-all-subnet-ip-ranges --project={project}"
        ),

        Operation::CreateInstance { spec } => format!(
            "gcloud compute instances create {} --zone={} --machine-type={} \
             --image-family=debian-12 --image-project=debian-cloud \
             --service-account={} --scopes=cloud-platform --tags={} \
             --no-address --metadata-from-file=startup-script=<generated> --project={}",
            spec.name, spec.zone, spec.machine_type, spec.service_identity_email,
            spec.network_tag, project
        ),
    }
}

fn render_firewall_rule(project: &str, rule: &FirewallRule) -> String {
    let (action, rules) = match (&rule.allowed, &rule.denied) {
        (Some(allowed), _) => (
            "ALLOW",
            allowed
                .iter()
                .map(|p| {
                    if p.ports.is_empty() {
                        p.ip_protocol.clone()
                    } else {
                        format!("{}:{}", p.ip_protocol, p.ports.join(","))
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        (None, Some(denied)) => (
            "DENY",
            denied
                .iter()
                .map(|p| p.ip_protocol.clone())
                .collect::<Vec<_>>()
                .join(","),
        ),
        (None, None) => ("ALLOW", String::new()),
    };
    format!(
        "gcloud compute firewall-rules create {} --project={} --direction={} --priority={} \
         --network=default --action={} --rules={} --source-ranges={} --target-tags={}",
        rule.name,
        project,
        rule.direction,
        rule.priority,
        action,
        rules,
        rule.source_ranges.join(","),
        rule.target_tags.join(",")
    )
}

/// Print the rendered plan and the generated boot payload to stdout
pub fn print(plan: &ProvisioningPlan, boot_payload: &str) {
    println!(
        "{}",
        format!(
            "Dry run: {} steps for project {} ({})",
            plan.steps.len(),
            plan.project_id,
            plan.zone
        )
        .bold()
    );
    for (step, command) in plan.steps.iter().zip(render(plan)) {
        println!();
        println!("{}", format!("# {}", step.name).dimmed());
        println!("{}", command);
    }
    println!();
    println!("{}", "# Generated boot payload:".dimmed());
    for line in boot_payload.lines() {
        println!("  {}", line.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler;
    use crate::config::DeployConfig;

    fn sample_config() -> DeployConfig {
        serde_json::from_value(serde_json::json!({
            "project_id": "acme-1",
            "zone": "us-central1-a",
            "vm_name": "steward-vm",
            "machine_type": "e2-small",
            "models": { "primary": "gemini-2.5-pro", "fallbacks": [] },
            "secrets": { "telegram-bot-token": "123:abc" }
        }))
        .unwrap()
    }

    #[test]
    fn test_render_covers_every_step() {
        let compiled = compiler::compile(&sample_config()).unwrap();
        let rendered = render(&compiled.plan);
        assert_eq!(rendered.len(), compiled.plan.steps.len());
    }

    #[test]
    fn test_render_never_contains_secret_values() {
        let compiled = compiler::compile(&sample_config()).unwrap();
        for command in render(&compiled.plan) {
            assert!(!command.contains("123:abc"));
        }
    }

    #[test]
    fn test_firewall_rule_rendering() {
        let compiled = compiler::compile(&sample_config()).unwrap();
        let rendered = render(&compiled.plan).join("\n");
        assert!(rendered.contains("--action=ALLOW --rules=tcp:22"));
        assert!(rendered.contains("--action=DENY --rules=all"));
        assert!(rendered.contains("--source-ranges=35.235.240.0/20"));
    }
}
