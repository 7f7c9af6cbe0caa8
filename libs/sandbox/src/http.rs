//! REST client for the sandbox provisioning service.
//!
//! Endpoints (all authenticated with an `X-API-Key` header):
//! - `POST   /sandboxes`                   create
//! - `GET    /sandboxes`                   list
//! - `GET    /sandboxes/{id}`              liveness
//! - `DELETE /sandboxes/{id}`              kill
//! - `GET    /sandboxes/{id}/files?path=`  read file
//! - `POST   /sandboxes/{id}/files?path=`  write file
//! - `POST   /sandboxes/{id}/commands`     run command (foreground or background)
//!
//! Individual calls are not retried here; callers decide what a failure
//! means.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use warden_id::{InstanceId, TemplateId};

use crate::client::{CommandEnv, InstanceClient, InstanceInfo};
use crate::error::ClientError;

const API_KEY_HEADER: &str = "X-API-Key";

/// Extra time allowed on top of a command's own timeout for the HTTP round trip.
const COMMAND_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Connection settings for [`HttpInstanceClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the provisioning API.
    pub api_url: String,

    pub api_key: String,

    /// Template new instances are created from.
    pub template_id: TemplateId,

    /// Lifetime requested for new instances.
    pub instance_timeout: Duration,

    /// Timeout for ordinary (non-command) requests.
    pub request_timeout: Duration,
}

/// Provisioning API client.
pub struct HttpInstanceClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpInstanceClient {
    /// Create a new client.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn instance_url(&self, instance_id: &InstanceId, suffix: &str) -> String {
        self.url(&format!("/sandboxes/{}{}", instance_id, suffix))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(API_KEY_HEADER, &self.config.api_key)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header(API_KEY_HEADER, &self.config.api_key)
    }

    async fn send_command(
        &self,
        instance_id: &InstanceId,
        request: &CommandRequest<'_>,
        timeout: Duration,
    ) -> Result<CommandResponse, ClientError> {
        let url = self.instance_url(instance_id, "/commands");
        let response = self
            .post(&url)
            .timeout(timeout + COMMAND_TIMEOUT_SLACK)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout(timeout)
                } else {
                    ClientError::Http(e)
                }
            })?;

        let response = check_status(response, instance_id).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
}

#[derive(Debug, Deserialize)]
struct ListedSandbox {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "templateID", default)]
    template_id: Option<String>,
    #[serde(rename = "startedAt", default)]
    started_at: Option<String>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

impl ListedSandbox {
    fn into_info(self) -> Result<InstanceInfo, ClientError> {
        let instance_id =
            InstanceId::parse(&self.sandbox_id).map_err(|e| ClientError::Decode(e.to_string()))?;
        // A malformed template id is metadata noise, not a reason to drop the instance.
        let template_id = self.template_id.and_then(|t| TemplateId::parse(&t).ok());
        Ok(InstanceInfo {
            instance_id,
            template_id,
            started_at: self.started_at,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    cmd: &'a str,
    envs: &'a CommandEnv,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    background: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandResponse {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

/// Map error statuses to [`ClientError`].
async fn check_status(response: Response, instance_id: &InstanceId) -> Result<Response, ClientError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(instance_id.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl InstanceClient for HttpInstanceClient {
    async fn create(&self) -> Result<InstanceId, ClientError> {
        let request = CreateRequest {
            template_id: self.config.template_id.as_str(),
            timeout: self.config.instance_timeout.as_secs(),
        };

        let response = self
            .post(&self.url("/sandboxes"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreateResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let instance_id =
            InstanceId::parse(&created.sandbox_id).map_err(|e| ClientError::Decode(e.to_string()))?;

        info!(
            instance_id = %instance_id,
            template_id = %self.config.template_id,
            "Instance created"
        );
        Ok(instance_id)
    }

    async fn list(&self) -> Result<Vec<InstanceInfo>, ClientError> {
        let response = self.get(&self.url("/sandboxes")).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let listed: Vec<ListedSandbox> = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let instances = listed
            .into_iter()
            .map(ListedSandbox::into_info)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = instances.len(), "Listed instances");
        Ok(instances)
    }

    async fn kill(&self, instance_id: &InstanceId) -> Result<bool, ClientError> {
        warn!(instance_id = %instance_id, "Killing instance");

        let response = self
            .client
            .delete(self.instance_url(instance_id, ""))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;

        match check_status(response, instance_id).await {
            Ok(_) => {
                info!(instance_id = %instance_id, "Instance killed");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                warn!(instance_id = %instance_id, "Instance not found or already dead");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn is_running(&self, instance_id: &InstanceId) -> Result<bool, ClientError> {
        let response = self.get(&self.instance_url(instance_id, "")).send().await?;

        match check_status(response, instance_id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read_file(
        &self,
        instance_id: &InstanceId,
        path: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let response = self
            .get(&self.instance_url(instance_id, "/files"))
            .query(&[("path", path)])
            .send()
            .await?;

        let response = check_status(response, instance_id).await?;
        let bytes = response.bytes().await?;
        debug!(instance_id = %instance_id, path, bytes = bytes.len(), "Read file");
        Ok(bytes.to_vec())
    }

    async fn write_file(
        &self,
        instance_id: &InstanceId,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ClientError> {
        let response = self
            .post(&self.instance_url(instance_id, "/files"))
            .query(&[("path", path)])
            .body(contents.to_vec())
            .send()
            .await?;

        check_status(response, instance_id).await?;
        info!(instance_id = %instance_id, path, bytes = contents.len(), "Wrote file");
        Ok(())
    }

    async fn run_command(
        &self,
        instance_id: &InstanceId,
        command: &str,
        env: &CommandEnv,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let request = CommandRequest {
            cmd: command,
            envs: env,
            timeout: Some(timeout.as_secs()),
            background: false,
        };

        let output = self.send_command(instance_id, &request, timeout).await?;
        if output.exit_code != 0 {
            return Err(ClientError::CommandFailed {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        debug!(
            instance_id = %instance_id,
            command = %truncate(command, 50),
            "Command succeeded"
        );
        Ok(output.stdout)
    }

    async fn start_background_command(
        &self,
        instance_id: &InstanceId,
        command: &str,
        env: &CommandEnv,
    ) -> Result<(), ClientError> {
        let request = CommandRequest {
            cmd: command,
            envs: env,
            timeout: None,
            background: true,
        };

        let url = self.instance_url(instance_id, "/commands");
        let response = self.post(&url).json(&request).send().await?;
        check_status(response, instance_id).await?;

        info!(
            instance_id = %instance_id,
            command = %truncate(command, 50),
            "Background command started"
        );
        Ok(())
    }
}

/// First `max` characters of a command, single line, for logging.
fn truncate(command: &str, max: usize) -> String {
    command
        .chars()
        .take(max)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}
