//! Client for the attempt statistics API.

use std::time::Duration;

use serde_json::Value;

use crate::error::{EtlError, Result};

/// Delay before each retry; the last entry repeats once the schedule runs out.
const BACKOFF: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

pub struct StatisticsClient {
    http: reqwest::Client,
    url: String,
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl StatisticsClient {
    pub fn new(url: &str, timeout: Duration, max_attempts: u32) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            max_attempts: max_attempts.max(1),
            backoff: BACKOFF.to_vec(),
        })
    }

    /// Replace the retry delays (tests use zero delays).
    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Fetches one page of attempt records.
    ///
    /// Connection failures, timeouts, 429 and 5xx responses are retried up
    /// to the configured number of attempts. Any other failure is returned
    /// immediately.
    pub async fn fetch(&self, params: &[(String, String)]) -> Result<Vec<Value>> {
        let mut attempt = 1;
        loop {
            match self.fetch_once(params).await {
                Ok(records) => {
                    tracing::info!(records = records.len(), attempt, "statistics fetched");
                    return Ok(records);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "statistics request failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).saturating_sub(1);
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_default()
    }

    async fn fetch_once(&self, params: &[(String, String)]) -> Result<Vec<Value>> {
        let resp = self.http.get(&self.url).query(params).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(EtlError::Status {
                context: "statistics API",
                status,
                body,
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| EtlError::Decode(format!("statistics body is not JSON: {e}")))?;

        match body {
            Value::Array(records) => Ok(records),
            other => Err(EtlError::Decode(format!(
                "expected a JSON array of attempts, got {}",
                json_type(&other)
            ))),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
