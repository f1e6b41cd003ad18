//! HTTP client for the autodeploy API, used by the `--submit` command

use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use openapi_server::models::{
    CancelResponse, DeployRequest, DeployResponse, ErrorResponse, JobStatus, JobStatusResponse,
};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::DeployError;

/// Default server address for the CLI
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

/// HTTP client for a running autodeploy server
pub struct DeployClient {
    client: Client,
    base_url: String,
}

impl DeployClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, DeployError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP request failed: {} - {}", status, body);
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(if status == reqwest::StatusCode::NOT_FOUND {
                DeployError::NotFound(message)
            } else {
                DeployError::ServerError(format!("{}: {}", status, message))
            });
        }
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeployError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        Self::parse(self.client.get(&url).send().await?).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DeployError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        Self::parse(self.client.post(&url).json(body).send().await?).await
    }

    pub async fn submit(&self, request: &DeployRequest) -> Result<DeployResponse, DeployError> {
        self.post("/deploy", request).await
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatusResponse, DeployError> {
        self.get(&format!("/deploy/{}", job_id)).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<CancelResponse, DeployError> {
        self.post(&format!("/deploy/{}/cancel", job_id), &serde_json::json!({}))
            .await
    }
}

/// Arguments of the `--submit` command
#[derive(Debug, Clone)]
pub struct SubmitArgs {
    pub server: String,
    pub description: String,
    pub repo_url: String,
    pub follow: bool,
    pub poll_interval: Duration,
}

/// Submit a deployment and, with `follow`, print its logs until it finishes
pub async fn submit_command(args: SubmitArgs) -> anyhow::Result<JobStatus> {
    let client = DeployClient::new(&args.server).context("building HTTP client")?;

    let accepted = client
        .submit(&DeployRequest {
            description: args.description.clone(),
            repo_url: args.repo_url.clone(),
        })
        .await
        .with_context(|| format!("submitting to {}", client.base_url()))?;

    println!("{} job {}", "Submitted".green().bold(), accepted.job_id);
    if !args.follow {
        return Ok(accepted.status);
    }

    let mut printed = 0;
    loop {
        let job = client
            .status(&accepted.job_id)
            .await
            .with_context(|| format!("polling job {}", accepted.job_id))?;

        for entry in job.logs.iter().skip(printed) {
            let level = match entry.level.as_str() {
                "error" => entry.level.red().bold(),
                "warn" => entry.level.yellow(),
                _ => entry.level.dimmed(),
            };
            println!(
                "{} {:>5} {}",
                entry.timestamp.format("%H:%M:%S"),
                level,
                entry.message
            );
        }
        printed = job.logs.len();

        if job.status.is_terminal() {
            match (&job.result, &job.error) {
                (Some(result), _) => println!("{} {}", "Deployed:".green().bold(), result.url),
                (_, Some(err)) => {
                    eprintln!("{} {} ({})", "Failed:".red().bold(), err.message, err.kind)
                }
                _ => {}
            }
            return Ok(job.status);
        }
        tokio::time::sleep(args.poll_interval).await;
    }
}
