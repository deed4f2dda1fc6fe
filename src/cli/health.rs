use std::time::{Duration, Instant};

use crate::entities::query::{BackendQuery, QUALIFICATION_FIELD, QueryDirective};
use crate::error::FaersLensError;
use crate::sources::RetryPolicy;
use crate::sources::openfda::{OpenFdaClient, OpenFdaConfig};

const PROBE_SEARCH: &str = "_exists_:safetyreportid";

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub base: String,
    pub api_key: bool,
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# faers-lens Health Check\n\n");
        out.push_str(&format!("Endpoint: {}\n", self.base));
        out.push_str(&format!(
            "API key: {}\n\n",
            if self.api_key { "configured" } else { "not set" }
        ));
        out.push_str("| Probe | Status | Latency |\n");
        out.push_str("|-------|--------|---------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.api, row.status, row.latency
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} probes healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

async fn check_one(client: &OpenFdaClient, api: &str, query: BackendQuery) -> HealthRow {
    let start = Instant::now();
    let result = client.execute(&query).await;
    let elapsed = start.elapsed().as_millis();

    match result {
        Ok(_) => HealthRow {
            api: api.to_string(),
            status: "ok".into(),
            latency: format!("{elapsed}ms"),
        },
        Err(err) => {
            let reason = match err {
                FaersLensError::BackendUnavailable { .. } => "unavailable",
                FaersLensError::BackendProtocol { .. } => "bad response",
                FaersLensError::Cancelled { .. } => "cancelled",
                _ => "error",
            };
            HealthRow {
                api: api.to_string(),
                status: "error".into(),
                latency: format!("{elapsed}ms ({reason})"),
            }
        }
    }
}

/// Probes openFDA with a one-record search and a one-bucket count, without retries.
pub async fn check_with(client: &OpenFdaClient) -> HealthReport {
    let (records, counts) = tokio::join!(
        check_one(
            client,
            "openFDA drug/event search",
            BackendQuery {
                search: PROBE_SEARCH.to_string(),
                directive: QueryDirective::Records { limit: 1 },
            },
        ),
        check_one(
            client,
            "openFDA drug/event count",
            BackendQuery {
                search: PROBE_SEARCH.to_string(),
                directive: QueryDirective::Count {
                    field: QUALIFICATION_FIELD,
                    limit: Some(1),
                },
            },
        ),
    );

    let rows = vec![records, counts];
    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    HealthReport {
        base: client.config().base.to_string(),
        api_key: client.config().api_key.is_some(),
        healthy,
        total: rows.len(),
        rows,
    }
}

/// Runs the openFDA connectivity probes with the environment's configuration.
///
/// # Errors
///
/// Returns an error when the shared HTTP client cannot be created.
pub async fn check() -> Result<HealthReport, FaersLensError> {
    let config = OpenFdaConfig {
        deadline: Duration::from_secs(10),
        retry: RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        },
        ..OpenFdaConfig::from_env()
    };
    let client = OpenFdaClient::from_config(config)?;
    Ok(check_with(&client).await)
}
