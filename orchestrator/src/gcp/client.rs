//! GCP REST client implementation

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{header, Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use super::{ApiOutcome, ControlPlane, InstanceView, RouterCreation};
use crate::errors::OrchestratorError;
use crate::plan::{FirewallRule, InstanceSpec};

const COMPUTE_BASE: &str = "https://compute.googleapis.com/compute/v1";
const SM_BASE: &str = "https://secretmanager.googleapis.com/v1";
const SU_BASE: &str = "https://serviceusage.googleapis.com/v1";
const IAM_BASE: &str = "https://iam.googleapis.com/v1";
const CRM_BASE: &str = "https://cloudresourcemanager.googleapis.com/v1";

/// Authenticated client for the cloud control-plane APIs
pub struct GcpClient {
    client: Client,
    token: SecretString,
}

impl GcpClient {
    /// Create a new client with a bearer token
    pub fn new(token: SecretString) -> Result<Self, OrchestratorError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client, token })
    }

    async fn get(&self, url: &str) -> Result<Response, OrchestratorError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
            .send()
            .await?;
        Ok(response)
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> Result<Response, OrchestratorError> {
        debug!("{} {}", method, url);
        let response = self
            .client
            .request(method, url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Response, OrchestratorError> {
        self.send_json(reqwest::Method::POST, url, body).await
    }

    /// Extract a human-readable message from an API error response
    async fn api_error(response: Response, context: &str) -> OrchestratorError {
        let status = response.status();
        let message = match response.json::<Value>().await {
            Ok(body) => body
                .pointer("/error/message")
                .or_else(|| body.pointer("/error/status"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };
        OrchestratorError::ApiError(format!("{}: {}", context, message))
    }

    /// Treat 2xx as created, 409 as already-exists, anything else as an error
    async fn creation_outcome(
        response: Response,
        context: &str,
    ) -> Result<ApiOutcome, OrchestratorError> {
        if response.status() == StatusCode::CONFLICT {
            return Ok(ApiOutcome::AlreadyExists);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response, context).await);
        }
        Ok(ApiOutcome::Created)
    }
}

#[async_trait::async_trait]
impl ControlPlane for GcpClient {
    async fn enable_api(&self, project: &str, api: &str) -> Result<(), OrchestratorError> {
        let url = format!("{}/projects/{}/services/{}:enable", SU_BASE, project, api);
        let response = self.post(&url, &json!({})).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, &format!("Failed to enable API {}", api)).await);
        }
        Ok(())
    }

    async fn create_service_identity(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<ApiOutcome, OrchestratorError> {
        let url = format!("{}/projects/{}/serviceAccounts", IAM_BASE, project);
        let body = json!({
            "accountId": account_id,
            "serviceAccount": { "displayName": display_name },
        });
        let response = self.post(&url, &body).await?;
        Self::creation_outcome(response, "Failed to create service identity").await
    }

    async fn project_number(&self, project: &str) -> Result<Option<String>, OrchestratorError> {
        let url = format!("{}/projects/{}", CRM_BASE, project);
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body: Value = response.json().await?;
        Ok(body
            .get("projectNumber")
            .and_then(Value::as_str)
            .map(|s| s.to_string()))
    }

    async fn get_iam_policy(&self, project: &str) -> Result<Value, OrchestratorError> {
        let url = format!("{}/projects/{}:getIamPolicy", CRM_BASE, project);
        let response = self.post(&url, &json!({})).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to read IAM policy").await);
        }
        Ok(response.json().await?)
    }

    async fn set_iam_policy(&self, project: &str, policy: Value) -> Result<(), OrchestratorError> {
        let url = format!("{}/projects/{}:setIamPolicy", CRM_BASE, project);
        let response = self.post(&url, &json!({ "policy": policy })).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to write IAM policy").await);
        }
        Ok(())
    }

    async fn create_secret(
        &self,
        project: &str,
        name: &str,
    ) -> Result<ApiOutcome, OrchestratorError> {
        let url = format!("{}/projects/{}/secrets?secretId={}", SM_BASE, project, name);
        let body = json!({ "replication": { "automatic": {} } });
        let response = self.post(&url, &body).await?;
        Self::creation_outcome(response, &format!("Failed to create secret {}", name)).await
    }

    async fn add_secret_version(
        &self,
        project: &str,
        name: &str,
        value: &SecretString,
    ) -> Result<(), OrchestratorError> {
        let url = format!("{}/projects/{}/secrets/{}:addVersion", SM_BASE, project, name);
        let payload = BASE64.encode(value.expose_secret().as_bytes());
        let response = self.post(&url, &json!({ "payload": { "data": payload } })).await?;
        if !response.status().is_success() {
            return Err(
                Self::api_error(response, &format!("Failed to add version to secret {}", name))
                    .await,
            );
        }
        Ok(())
    }

    async fn create_firewall_rule(
        &self,
        project: &str,
        rule: &FirewallRule,
    ) -> Result<ApiOutcome, OrchestratorError> {
        let url = format!("{}/projects/{}/global/firewalls", COMPUTE_BASE, project);
        let mut body = serde_json::to_value(rule)?;
        body["network"] = json!(format!("projects/{}/global/networks/default", project));
        let response = self.post(&url, &body).await?;
        Self::creation_outcome(
            response,
            &format!("Failed to create firewall rule {}", rule.name),
        )
        .await
    }

    async fn create_router(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<RouterCreation, OrchestratorError> {
        let url = format!(
            "{}/projects/{}/regions/{}/routers",
            COMPUTE_BASE, project, region
        );
        let body = json!({
            "name": name,
            "network": format!("projects/{}/global/networks/default", project),
        });
        let response = self.post(&url, &body).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(RouterCreation {
                outcome: ApiOutcome::AlreadyExists,
                operation: None,
            });
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to create router").await);
        }
        let op: Value = response.json().await?;
        Ok(RouterCreation {
            outcome: ApiOutcome::Created,
            operation: op.get("name").and_then(Value::as_str).map(|s| s.to_string()),
        })
    }

    async fn region_operation_done(
        &self,
        project: &str,
        region: &str,
        operation: &str,
    ) -> Result<bool, OrchestratorError> {
        let url = format!(
            "{}/projects/{}/regions/{}/operations/{}",
            COMPUTE_BASE, project, region, operation
        );
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to poll operation").await);
        }
        let body: Value = response.json().await?;
        Ok(body.get("status").and_then(Value::as_str) == Some("DONE"))
    }

    async fn get_router(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<Value, OrchestratorError> {
        let url = format!(
            "{}/projects/{}/regions/{}/routers/{}",
            COMPUTE_BASE, project, region, name
        );
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to get router").await);
        }
        Ok(response.json().await?)
    }

    async fn patch_router(
        &self,
        project: &str,
        region: &str,
        name: &str,
        router: Value,
    ) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/projects/{}/regions/{}/routers/{}",
            COMPUTE_BASE, project, region, name
        );
        let response = self.send_json(reqwest::Method::PATCH, &url, &router).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to configure NAT").await);
        }
        Ok(())
    }

    async fn create_instance(
        &self,
        project: &str,
        spec: &InstanceSpec,
        boot_payload: &str,
    ) -> Result<ApiOutcome, OrchestratorError> {
        let url = format!(
            "{}/projects/{}/zones/{}/instances",
            COMPUTE_BASE, project, spec.zone
        );
        let body = json!({
            "name": spec.name,
            "machineType": format!("zones/{}/machineTypes/{}", spec.zone, spec.machine_type),
            "disks": [{
                "initializeParams": {
                    "sourceImage": "projects/debian-cloud/global/images/family/debian-12",
                },
                "boot": true,
                "autoDelete": true,
            }],
            "networkInterfaces": [{ "network": "global/networks/default" }],
            "serviceAccounts": [{
                "email": spec.service_identity_email,
                "scopes": ["https://www.googleapis.com/auth/cloud-platform"],
            }],
            "tags": { "items": [spec.network_tag] },
            "metadata": {
                "items": [{ "key": "startup-script", "value": boot_payload }],
            },
        });
        let response = self.post(&url, &body).await?;
        Self::creation_outcome(response, "Failed to create instance").await
    }

    async fn update_instance_metadata(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        boot_payload: &str,
    ) -> Result<(), OrchestratorError> {
        // setMetadata needs the current fingerprint
        let url = format!(
            "{}/projects/{}/zones/{}/instances/{}",
            COMPUTE_BASE, project, zone, name
        );
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to read instance metadata").await);
        }
        let instance: Value = response.json().await?;
        let fingerprint = instance
            .pointer("/metadata/fingerprint")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OrchestratorError::ApiError("instance metadata has no fingerprint".to_string())
            })?;

        let url = format!(
            "{}/projects/{}/zones/{}/instances/{}/setMetadata",
            COMPUTE_BASE, project, zone, name
        );
        let body = json!({
            "fingerprint": fingerprint,
            "items": [{ "key": "startup-script", "value": boot_payload }],
        });
        let response = self.post(&url, &body).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to update instance metadata").await);
        }
        Ok(())
    }

    async fn describe_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Option<InstanceView>, OrchestratorError> {
        let url = format!(
            "{}/projects/{}/zones/{}/instances/{}",
            COMPUTE_BASE, project, zone, name
        );
        let response = self.get(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to describe instance").await);
        }
        let body: Value = response.json().await?;
        let view = InstanceView {
            status: body
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            last_start_timestamp: json_str(&body, "/lastStartTimestamp"),
            last_stop_timestamp: json_str(&body, "/lastStopTimestamp"),
            internal_ip: json_str(&body, "/networkInterfaces/0/networkIP"),
            creation_timestamp: json_str(&body, "/creationTimestamp"),
        };
        Ok(Some(view))
    }

    async fn start_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.instance_action(project, zone, name, "start").await
    }

    async fn stop_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.instance_action(project, zone, name, "stop").await
    }

    async fn reset_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.instance_action(project, zone, name, "reset").await
    }

    async fn delete_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/projects/{}/zones/{}/instances/{}",
            COMPUTE_BASE, project, zone, name
        );
        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(&url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
            .send()
            .await?;
        // Already gone
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response, "Failed to delete instance").await);
        }
        Ok(())
    }
}

impl GcpClient {
    async fn instance_action(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        action: &str,
    ) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/projects/{}/zones/{}/instances/{}/{}",
            COMPUTE_BASE, project, zone, name, action
        );
        let response = self.post(&url, &json!({})).await?;
        if !response.status().is_success() {
            return Err(
                Self::api_error(response, &format!("Failed to {} instance {}", action, name))
                    .await,
            );
        }
        Ok(())
    }
}

fn json_str(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}
