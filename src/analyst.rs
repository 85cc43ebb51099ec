use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::AnalystConfig;

const MSG_SERVICE_UNAVAILABLE: &str =
    "Sorry, the analysis service is unavailable. Please try again later.";
const MSG_BAD_REQUEST: &str = "I could not process your query. Please rephrase your question.";
const MSG_INTERNAL_ERROR: &str =
    "An error occurred while analyzing your query. Please try again.";
const MSG_UPSTREAM_UNAVAILABLE: &str =
    "The AI service is unavailable. Please try again later.";
const MSG_DATA_UNAVAILABLE: &str =
    "Could not connect to the database. Please try again later.";
pub const MSG_UNEXPECTED: &str = "An unexpected error occurred. Please try again later.";

/// Body of `POST /api/v1/analysis`. Optional fields are sent as explicit nulls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub exclude_tables: Option<Vec<String>>,
    pub generate_charts: Option<bool>,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            exclude_tables: None,
            generate_charts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chart {
    #[serde(rename = "type")]
    pub chart_type: String,
    pub title: String,
    pub image_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResponse {
    pub explanation: String,
    pub sql_query: String,
    #[serde(default)]
    pub charts: Vec<Chart>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Classified failure categories of the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalystErrorKind {
    /// Connection refused, timeout or other network failure. Only refused
    /// connections and timeouts carry the synthetic 503; other network
    /// failures have no status.
    ServiceUnavailable,
    /// Remote 400.
    BadRequest,
    /// Remote 500.
    InternalError,
    /// Remote 502.
    UpstreamUnavailable,
    /// Remote 503.
    DataUnavailable,
    /// Any other status, or a response we could not make sense of.
    Unclassified,
}

impl AnalystErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            500 => Self::InternalError,
            502 => Self::UpstreamUnavailable,
            503 => Self::DataUnavailable,
            _ => Self::Unclassified,
        }
    }

    /// Fixed user-facing text for this kind.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::ServiceUnavailable => MSG_SERVICE_UNAVAILABLE,
            Self::BadRequest => MSG_BAD_REQUEST,
            Self::InternalError => MSG_INTERNAL_ERROR,
            Self::UpstreamUnavailable => MSG_UPSTREAM_UNAVAILABLE,
            Self::DataUnavailable => MSG_DATA_UNAVAILABLE,
            Self::Unclassified => MSG_UNEXPECTED,
        }
    }
}

/// Error returned by the analysis client. `message` is safe to show to users;
/// `status` and `detail` are for logs.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AnalystError {
    pub kind: AnalystErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub detail: Option<String>,
}

impl AnalystError {
    pub fn new(kind: AnalystErrorKind, status: Option<u16>, detail: Option<String>) -> Self {
        Self {
            kind,
            message: kind.user_message().to_string(),
            status,
            detail,
        }
    }

    pub fn unavailable() -> Self {
        Self::new(AnalystErrorKind::ServiceUnavailable, Some(503), None)
    }

    pub fn from_status(status: u16, detail: String) -> Self {
        Self::new(AnalystErrorKind::from_status(status), Some(status), Some(detail))
    }

    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            error!("Analyst service unavailable: {}", err);
            return Self::unavailable();
        }
        if err.is_decode() {
            error!("Malformed analyst service response: {}", err);
            return Self::new(AnalystErrorKind::Unclassified, None, Some(err.to_string()));
        }
        error!("Network error talking to analyst service: {}", err);
        Self::new(AnalystErrorKind::ServiceUnavailable, None, Some(err.to_string()))
    }
}

pub type AnalystResult<T> = std::result::Result<T, AnalystError>;

/// Anything that can turn a prompt into an analysis.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze_prompt(&self, prompt: &str) -> AnalystResult<AnalysisResponse>;
}

pub struct AnalystClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnalystClient {
    pub fn new(config: &AnalystConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to build analyst HTTP client")?;
        Ok(Self {
            client,
            base_url: config.effective_base_url().to_string(),
        })
    }

    fn analysis_url(&self) -> String {
        format!("{}/api/v1/analysis", self.base_url)
    }
}

#[async_trait]
impl AnalysisService for AnalystClient {
    async fn analyze_prompt(&self, prompt: &str) -> AnalystResult<AnalysisResponse> {
        let url = self.analysis_url();
        let request = AnalysisRequest::new(prompt);

        info!("Sending analysis request to {}", url);
        debug!("Prompt: {}", prompt);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(AnalystError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.detail)
                .unwrap_or_else(|| "Unknown error".to_string());
            error!("Analyst service error ({}): {}", status.as_u16(), detail);
            return Err(AnalystError::from_status(status.as_u16(), detail));
        }

        let analysis: AnalysisResponse = response
            .json()
            .await
            .map_err(AnalystError::from_transport)?;

        info!(
            "Analysis completed: {} chars of explanation, {} chart(s)",
            analysis.explanation.len(),
            analysis.charts.len()
        );
        debug!("SQL: {}", analysis.sql_query);
        for chart in &analysis.charts {
            debug!("Chart {:?} ({})", chart.title, chart.chart_type);
        }

        Ok(analysis)
    }
}
