//! Admin gateway client
//!
//! [`ClusterAdmin`] over the master's HTTP admin gateway. JSON in, JSON out;
//! transport failures map to `Unreachable`, status codes to the matching
//! [`ClusterError`] variant.

use async_trait::async_trait;
use regionctl_core::{RegionInfo, ServerLoad, ServerName, TableName};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use crate::cluster::{ClusterAdmin, ClusterError, Result};

/// Request timeout for a single admin call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct AssignmentsRequest<'a> {
    tables: &'a BTreeSet<TableName>,
}

#[derive(Debug, Deserialize)]
struct AssignmentEntry {
    region: RegionInfo,
    server: ServerName,
}

#[derive(Debug, Serialize)]
struct MoveRequest<'a> {
    destination: &'a ServerName,
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    server: Option<ServerName>,
}

#[derive(Debug, Serialize)]
struct BalancerRunRequest<'a> {
    tables: &'a BTreeSet<TableName>,
}

#[derive(Debug, Deserialize)]
struct BalancerRunResponse {
    moved: bool,
}

/// HTTP admin client
pub struct HttpClusterAdmin {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpClusterAdmin {
    /// Create a client for a gateway base URL
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClusterError::Unreachable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: std::env::var("REGIONCTL_ADMIN_TOKEN").ok(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        self.authorized(req).send().await.map_err(transport_error)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");
        let response = self.send(self.client.get(&url)).await?;
        decode(check(response, path).await?).await
    }
}

fn transport_error(e: reqwest::Error) -> ClusterError {
    if e.is_timeout() {
        ClusterError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        ClusterError::Unreachable(e.to_string())
    } else {
        ClusterError::Rpc(e.to_string())
    }
}

/// Map non-success statuses to cluster errors
async fn check(response: Response, subject: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => ClusterError::UnknownRegion(subject.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ClusterError::Timeout(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            ClusterError::Unreachable(format!("{} - {}", status.as_u16(), message))
        }
        _ => ClusterError::Rpc(format!("{} - {}", status.as_u16(), message)),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| ClusterError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ClusterAdmin for HttpClusterAdmin {
    async fn list_tables(&self) -> Result<Vec<TableName>> {
        self.get_json("/tables").await
    }

    async fn current_assignments(
        &self,
        tables: &BTreeSet<TableName>,
    ) -> Result<Vec<(RegionInfo, ServerName)>> {
        let url = format!("{}/assignments", self.base_url);
        let response = self
            .send(self.client.post(&url).json(&AssignmentsRequest { tables }))
            .await?;
        let entries: Vec<AssignmentEntry> = decode(check(response, "/assignments").await?).await?;
        Ok(entries
            .into_iter()
            .map(|e| (e.region.with_derived_name(), e.server))
            .collect())
    }

    async fn server_roster(&self) -> Result<Vec<ServerName>> {
        self.get_json("/servers").await
    }

    async fn server_load(&self, server: &ServerName) -> Result<ServerLoad> {
        let path = format!("/servers/{}/load", server);
        let url = format!("{}{}", self.base_url, path);
        let response = self.send(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClusterError::UnknownServer(server.to_string()));
        }
        decode(check(response, &path).await?).await
    }

    async fn move_region(&self, region: &RegionInfo, destination: &ServerName) -> Result<()> {
        let url = format!("{}/regions/{}/move", self.base_url, region.encoded_name);
        let response = self
            .send(self.client.post(&url).json(&MoveRequest { destination }))
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ClusterError::Rejected {
                    region: region.encoded_name.clone(),
                    destination: destination.to_string(),
                    reason: response.text().await.unwrap_or_default(),
                })
            }
            _ => check(response, &region.encoded_name).await.map(|_| ()),
        }
    }

    async fn region_location(&self, region: &RegionInfo) -> Result<Option<ServerName>> {
        let path = format!("/regions/{}/location", region.encoded_name);
        let location: LocationResponse = self.get_json(&path).await?;
        Ok(location.server)
    }

    async fn balancer_run(&self, tables: &BTreeSet<TableName>) -> Result<bool> {
        let url = format!("{}/balancer/run", self.base_url);
        let response = self
            .send(self.client.post(&url).json(&BalancerRunRequest { tables }))
            .await?;
        let outcome: BalancerRunResponse = decode(check(response, "/balancer/run").await?).await?;
        Ok(outcome.moved)
    }
}
