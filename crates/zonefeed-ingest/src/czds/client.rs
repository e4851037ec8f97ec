//! CZDS HTTP client

use chrono::{Local, NaiveDate};
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zonefeed_common::types::DownloadResult;

use super::retry::{RetryBudget, RetryDecision};
use super::{CzdsError, Result};
use crate::config::{CzdsConfig, RetryConfig};

/// On-disk name of a downloaded zone file: `{tld}_{YYYYMMDD}.zone.gz`
pub fn zone_file_name(tld: &str, date: NaiveDate) -> String {
    format!("{}_{}.zone.gz", tld, date.format("%Y%m%d"))
}

/// Extract the TLD from a download link such as
/// `https://czds-api.icann.org/czds/downloads/com.zone`
pub fn tld_from_link(link: &str) -> Option<String> {
    let segment = link.trim_end_matches('/').rsplit('/').next()?;
    let tld = segment.strip_suffix(".zone").unwrap_or(segment);
    if tld.is_empty() {
        None
    } else {
        Some(tld.to_string())
    }
}

/// True iff the file exists and is exactly `expected_size` bytes
pub fn verify_file_integrity(path: impl AsRef<Path>, expected_size: u64) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() == expected_size)
        .unwrap_or(false)
}

fn check_size(expected: Option<u64>, actual: u64) -> Result<()> {
    match expected {
        Some(expected) if expected > 0 && expected != actual => {
            Err(CzdsError::SizeMismatch { expected, actual })
        },
        _ => Ok(()),
    }
}

fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Map a non-success response to an error
fn check_response(response: &Response, url: &str, tld: Option<&str>) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    match (status, tld) {
        (StatusCode::TOO_MANY_REQUESTS, _) => Err(CzdsError::RateLimited {
            retry_after: retry_after_secs(response),
        }),
        (StatusCode::NOT_FOUND, Some(tld)) => Err(CzdsError::NotFound(tld.to_string())),
        _ => Err(CzdsError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        }),
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

struct CachedToken {
    value: String,
    issued_at: Instant,
}

/// Client for the ICANN Centralized Zone Data Service
pub struct CzdsClient {
    config: CzdsConfig,
    retry: RetryConfig,
    /// Short timeout, for authentication and metadata calls
    http: Client,
    /// Long timeout, for zone file downloads
    download_http: Client,
    token: Mutex<Option<CachedToken>>,
}

impl CzdsClient {
    pub fn new(config: CzdsConfig, retry: RetryConfig) -> Result<Self> {
        let user_agent = concat!("zonefeed/", env!("CARGO_PKG_VERSION"));
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(config.request_timeout())
            .build()?;
        let download_http = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(config.request_timeout())
            .timeout(config.download_timeout())
            .build()?;

        Ok(Self {
            config,
            retry,
            http,
            download_http,
            token: Mutex::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Authenticate and cache a fresh access token
    ///
    /// A 401 from the auth endpoint is terminal. Other failures are retried
    /// with backoff and end in [`CzdsError::Authentication`] when exhausted.
    pub async fn authenticate(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let token = self.fetch_token().await?;
        *cached = Some(CachedToken {
            value: token.clone(),
            issued_at: Instant::now(),
        });
        Ok(token)
    }

    /// Cached token, refreshed when older than the refresh window
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.issued_at.elapsed() < self.config.token_refresh_after() {
                return Ok(token.value.clone());
            }
            info!("Access token is about to expire, refreshing");
        }
        let token = self.fetch_token().await?;
        *cached = Some(CachedToken {
            value: token.clone(),
            issued_at: Instant::now(),
        });
        Ok(token)
    }

    /// Replace a token the API rejected, unless another task already did
    async fn reauthenticate(&self, rejected: &str) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.value != rejected {
                return Ok(token.value.clone());
            }
        }
        let token = self.fetch_token().await?;
        *cached = Some(CachedToken {
            value: token.clone(),
            issued_at: Instant::now(),
        });
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<String> {
        let mut budget = RetryBudget::new(self.retry);
        loop {
            let error = match self.request_token().await {
                Ok(token) => {
                    info!("Authenticated with CZDS");
                    return Ok(token);
                },
                Err(e @ CzdsError::Authentication(_)) => return Err(e),
                Err(e) => e,
            };

            match budget.next(&error) {
                RetryDecision::Wait(delay) => {
                    warn!(
                        attempt = budget.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Authentication attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                RetryDecision::Reauthenticate | RetryDecision::GiveUp => {
                    return Err(CzdsError::Authentication(format!(
                        "gave up after {} attempts: {}",
                        budget.attempts().max(1),
                        error
                    )));
                },
            }
        }
    }

    async fn request_token(&self) -> Result<String> {
        let url = &self.config.auth_url;
        debug!(url = %url, "Requesting access token");

        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "username": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CzdsError::Authentication(
                "Invalid ICANN credentials".to_string(),
            ));
        }
        check_response(&response, url, None)?;

        let body: AuthResponse = response.json().await.map_err(|e| {
            CzdsError::Authentication(format!("Invalid authentication response: {e}"))
        })?;
        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CzdsError::Authentication("Response did not contain an access token".to_string())
            })
    }

    /// Run an authenticated call through the retry loop
    async fn call_with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut budget = RetryBudget::new(self.retry);
        let mut token = self.access_token().await?;

        loop {
            let error = match call(token.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match budget.next(&error) {
                RetryDecision::Reauthenticate => {
                    warn!(operation, "Access token rejected, reauthenticating");
                    token = self.reauthenticate(&token).await?;
                },
                RetryDecision::Wait(delay) => {
                    warn!(
                        operation,
                        attempt = budget.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }

    /// List the TLDs this account may download, in API order
    pub async fn get_approved_tlds(&self) -> Result<Vec<String>> {
        let url = self.api_url("/czds/downloads/links");
        let links: Vec<String> = self
            .call_with_retry("list_tlds", |token| {
                let url = url.clone();
                async move {
                    let response = self.http.get(&url).bearer_auth(token).send().await?;
                    check_response(&response, &url, None)?;
                    Ok(response.json::<Vec<String>>().await?)
                }
            })
            .await?;

        let tlds: Vec<String> = links.iter().filter_map(|l| tld_from_link(l)).collect();
        info!(count = tlds.len(), "Fetched approved TLDs");
        Ok(tlds)
    }

    /// Download today's zone file for `tld` into `output_dir`
    ///
    /// Never fails: errors are reported through the result's status.
    pub async fn download_zone_file(&self, tld: &str, output_dir: &Path) -> DownloadResult {
        self.download_zone_file_dated(tld, output_dir, Local::now().date_naive())
            .await
    }

    /// Like [`download_zone_file`](Self::download_zone_file) with an explicit file date
    pub async fn download_zone_file_dated(
        &self,
        tld: &str,
        output_dir: &Path,
        date: NaiveDate,
    ) -> DownloadResult {
        let started = Instant::now();
        let path = output_dir.join(zone_file_name(tld, date));
        info!(tld = %tld, path = %path.display(), "Downloading zone file");

        match self.try_download(tld, output_dir, &path).await {
            Ok(size) => {
                let elapsed = started.elapsed();
                info!(
                    tld = %tld,
                    size_bytes = size,
                    duration_secs = elapsed.as_secs(),
                    "Zone file downloaded"
                );
                DownloadResult::success(tld, path.to_string_lossy(), size, elapsed.as_secs())
            },
            Err(e) => {
                warn!(tld = %tld, error = %e, "Zone file download failed");
                DownloadResult::failed(
                    tld,
                    &format!("Download failed for {tld}: {e}"),
                    started.elapsed().as_secs(),
                )
            },
        }
    }

    async fn try_download(&self, tld: &str, output_dir: &Path, path: &Path) -> Result<u64> {
        tokio::fs::create_dir_all(output_dir).await?;
        let url = self.api_url(&format!("/czds/downloads/{tld}.zone"));
        self.call_with_retry("download", |token| self.fetch_zone(tld, &url, path, token))
            .await
    }

    async fn fetch_zone(&self, tld: &str, url: &str, path: &Path, token: String) -> Result<u64> {
        let response = self.download_http.get(url).bearer_auth(token).send().await?;
        check_response(&response, url, Some(tld))?;
        let expected = response.content_length();

        let written = write_body(response, path)
            .await
            .and_then(|written| check_size(expected, written).map(|_| written));

        if written.is_err() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "Could not remove partial file");
            }
        }
        written
    }

    /// Same check as [`verify_file_integrity`]
    pub fn verify_file_integrity(&self, path: impl AsRef<Path>, expected_size: u64) -> bool {
        verify_file_integrity(path, expected_size)
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }
}

async fn write_body(response: Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}
