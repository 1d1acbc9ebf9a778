//! REST sub-client (§4.10 "REST client"). Pooled HTTP, 30s total / 10s
//! connect timeout, every request carries `X-Device-Token`. Grounded in
//! `original_source/agent/communication.py`'s `requests.Session` usage.

use chrono::{DateTime, Utc};
use heimdall_types::rules::ResolvedRules;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub type RestResult<T> = Result<T, RestError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEventRequest {
    pub app_package: Option<String>,
    pub app_group_id: Option<Uuid>,
    pub event_type: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    device_token: String,
}

impl RestClient {
    pub fn new(base_url: String, device_token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url, device_token })
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> RestResult<Value> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-Device-Token", &self.device_token)
            .json(body)
            .send()
            .await?;
        Self::into_json(response).await
    }

    async fn get(&self, path: &str) -> RestResult<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Device-Token", &self.device_token)
            .send()
            .await?;
        Self::into_json(response).await
    }

    async fn into_json(response: reqwest::Response) -> RestResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestError::Status { status: status.as_u16(), body });
        }
        Ok(response.json().await?)
    }

    pub async fn heartbeat(&self, active_app: Option<&str>, safe_mode: bool) -> RestResult<Value> {
        self.post(
            "/agent/heartbeat",
            &json!({
                "timestamp": Utc::now(),
                "active_app": active_app,
                "safe_mode": safe_mode,
            }),
        )
        .await
    }

    pub async fn usage_event(&self, event: &UsageEventRequest) -> RestResult<Value> {
        self.post("/agent/usage-event", event).await
    }

    pub async fn current_rules(&self) -> RestResult<ResolvedRules> {
        let value = self.get("/agent/rules/current").await?;
        serde_json::from_value(value).map_err(|e| RestError::Status { status: 0, body: e.to_string() })
    }

    pub async fn tamper_alert(&self, reason: &str) -> RestResult<Value> {
        self.post("/agent/tamper-alert", &json!({ "timestamp": Utc::now(), "reason": reason }))
            .await
    }
}
