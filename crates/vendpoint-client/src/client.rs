//! HTTP client for the admin log endpoints

use crate::context::RequestContext;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use vendpoint_core::config::ApiConfig;
use vendpoint_core::{
    BucketSize, CountFilters, CountResponse, Error, GroupedBucket, LogFilters, LogRecord, Result,
    UnixSeconds, UsageSummary, usage_series,
};

/// Path of the log listing endpoint
pub const LOGS_PATH: &str = "/admin/logs/";

/// Path of the log count endpoint
pub const COUNT_PATH: &str = "/admin/logs/count";

/// Client for `GET /admin/logs` and `GET /admin/logs/count`
#[derive(Debug, Clone)]
pub struct LogClient {
    http: Client,
}

impl LogClient {
    /// Create a client with a request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vendpoint-usage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(api: &ApiConfig) -> Result<Self> {
        Self::new(Duration::from_secs(api.timeout_secs))
    }

    /// Fetch log records, newest first
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid filters, otherwise an error if
    /// the request fails, the API answers with a non-success status or the
    /// body is not a list of records.
    pub async fn logs(&self, ctx: &RequestContext, filters: &LogFilters) -> Result<Vec<LogRecord>> {
        filters.check()?;
        let records: Vec<LogRecord> = self
            .get_json(ctx, LOGS_PATH, &filters.to_query_pairs())
            .await?;
        debug!(records = records.len(), "Fetched log records");
        Ok(records)
    }

    /// Count matching requests, or distinct API keys
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API answers with a
    /// non-success status.
    pub async fn count(&self, ctx: &RequestContext, filters: &CountFilters) -> Result<u64> {
        filters.filters.check()?;
        let response: CountResponse = self
            .get_json(ctx, COUNT_PATH, &filters.to_query_pairs())
            .await?;
        Ok(response.count)
    }

    /// Successful versus failed requests since `start`, bucketed
    ///
    /// Both outcome sets are fetched concurrently, at most `lines` records
    /// each.
    ///
    /// # Errors
    ///
    /// Returns the first error of either fetch.
    pub async fn usage_series(
        &self,
        ctx: &RequestContext,
        start: UnixSeconds,
        bucket_size: BucketSize,
        lines: u32,
    ) -> Result<Vec<GroupedBucket>> {
        let success_filters = LogFilters::outcome_since(true, start).with_lines(lines);
        let failure_filters = LogFilters::outcome_since(false, start).with_lines(lines);

        let (success, failure) = tokio::try_join!(
            self.logs(ctx, &success_filters),
            self.logs(ctx, &failure_filters)
        )?;

        let limit = lines as usize;
        if success.len() >= limit || failure.len() >= limit {
            warn!(
                lines,
                successful = success.len(),
                failed = failure.len(),
                "Record limit reached, oldest buckets may be incomplete"
            );
        }

        usage_series(&success, &failure, bucket_size)
    }

    /// Request totals since `since`, from the count endpoint
    ///
    /// # Errors
    ///
    /// Returns the first error of the underlying count queries.
    pub async fn summary(&self, ctx: &RequestContext, since: UnixSeconds) -> Result<UsageSummary> {
        let window = LogFilters {
            start: Some(since),
            ..LogFilters::default()
        };
        let requests = CountFilters {
            filters: window.clone(),
            unique_api_keys: false,
        };
        let successful = CountFilters {
            filters: LogFilters {
                is_success: Some(true),
                ..window.clone()
            },
            unique_api_keys: false,
        };
        let unique = CountFilters {
            filters: window,
            unique_api_keys: true,
        };

        let (requests, successful, unique_api_keys) = tokio::try_join!(
            self.count(ctx, &requests),
            self.count(ctx, &successful),
            self.count(ctx, &unique)
        )?;

        Ok(UsageSummary {
            since,
            requests,
            successful,
            failed: requests.saturating_sub(successful),
            unique_api_keys,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = ctx.url(path);
        debug!(url = %url, params = query.len(), "GET");

        let mut request = self.http.get(&url).query(query);
        if let Some(token) = ctx.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Request failed");
            Error::Request(format!("GET {path}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "API returned an error");
            return Err(status_error(status, path, body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Request(format!("GET {path}: failed to read body: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Map a non-success status to an error
fn status_error(status: StatusCode, path: &str, body: String) -> Error {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Authentication(message),
        StatusCode::NOT_FOUND => Error::NotFound {
            resource: path.to_string(),
        },
        _ => Error::Http {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, LOGS_PATH, String::new()),
            Error::Authentication(ref m) if m == "Unauthorized"
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, LOGS_PATH, "no admin scope".to_string()),
            Error::Authentication(ref m) if m == "no admin scope"
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, COUNT_PATH, String::new()),
            Error::NotFound { ref resource } if resource == COUNT_PATH
        ));

        match status_error(StatusCode::UNPROCESSABLE_ENTITY, LOGS_PATH, "{\"detail\":[]}".to_string()) {
            Error::Http { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "{\"detail\":[]}");
            }
            other => panic!("Expected Http error, got {other:?}"),
        }
    }

    #[test]
    fn test_client_builds() {
        assert!(LogClient::from_config(&ApiConfig::default()).is_ok());
    }
}
