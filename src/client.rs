//! Gmail API client with rate limiting and retry logic

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use google_gmail1::api::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::{GmailHub, READONLY_SCOPES};
use crate::error::{ReportError, Result};
use crate::models::RawMessageRecord;

/// Headers requested with `format=metadata`
pub const METADATA_HEADERS: [&str; 3] = ["From", "Subject", "Date"];

/// One page of a `messages.list` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Low-level Gmail operations used by the exporter
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List one page of message IDs matching a query
    async fn list_message_page(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage>;

    /// Fetch `From`/`Subject`/`Date` metadata for one message
    async fn get_message_metadata(&self, id: &str) -> Result<RawMessageRecord>;
}

/// Production Gmail client
///
/// Bounds in-flight requests with a semaphore and retries transient
/// failures (429, 5xx, network) with exponential backoff.
pub struct ProductionGmailClient {
    hub: GmailHub,
    rate_limiter: Arc<Semaphore>,
}

impl ProductionGmailClient {
    /// `max_concurrent` is typically 40-50 for 5-unit operations
    pub fn new(hub: GmailHub, max_concurrent: usize) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Address of the authenticated account
    pub async fn profile_email(&self) -> Result<String> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile("me")
            .add_scope(READONLY_SCOPES[0])
            .doit()
            .await?;
        Ok(profile.email_address.unwrap_or_default())
    }

    async fn fetch_single_with_retry(&self, id: &str) -> Result<RawMessageRecord> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            ReportError::NetworkError(format!("Failed to acquire rate limit permit: {}", e))
        })?;

        let mut attempts = 0;
        let max_attempts = 4; // Initial + 3 retries
        let mut delay = Duration::from_millis(100);

        loop {
            attempts += 1;

            let mut call = self
                .hub
                .users()
                .messages_get("me", id)
                .format("metadata");
            for header in METADATA_HEADERS {
                call = call.add_metadata_headers(header);
            }

            match call.add_scope(READONLY_SCOPES[0]).doit().await {
                Ok((_, msg)) => return parse_message_record(msg),
                Err(e) => {
                    let error = ReportError::from(e);
                    if error.is_transient() && attempts < max_attempts {
                        debug!("Retrying message {} after {:?}: {}", id, delay, error);
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    fn should_retry(error: &ReportError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(operation_name: &str, max_retries: u32, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Convert a metadata-format Gmail message into a raw record
///
/// The `Date` header is preferred; without it `internalDate` (epoch millis)
/// is rendered as RFC 3339 UTC, and failing that the date is empty.
pub fn parse_message_record(msg: Message) -> Result<RawMessageRecord> {
    let unique_id = msg
        .id
        .ok_or_else(|| ReportError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();

    let header = |wanted: &str| -> Option<String> {
        headers
            .iter()
            .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(wanted)))
            .and_then(|h| h.value.clone())
    };

    let from_raw = header("From").unwrap_or_default();
    let subject = header("Subject").unwrap_or_default();
    let date = header("Date")
        .filter(|d| !d.is_empty())
        .or_else(|| msg.internal_date.and_then(format_internal_date))
        .unwrap_or_default();

    Ok(RawMessageRecord {
        date,
        from_raw,
        subject,
        unique_id,
    })
}

fn format_internal_date(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_message_page(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        Self::with_retry("list_message_page", 3, || async {
            let timeout_duration = Duration::from_secs(30);
            let api_call = async {
                let mut call = self
                    .hub
                    .users()
                    .messages_list("me")
                    .q(query)
                    .max_results(page_size);
                if let Some(token) = page_token.as_deref() {
                    call = call.page_token(token);
                }
                call.add_scope(READONLY_SCOPES[0]).doit().await
            };

            let (_, response) = match tokio::time::timeout(timeout_duration, api_call).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Gmail API messages.list call timed out after {:?}", timeout_duration);
                    return Err(ReportError::NetworkError(format!(
                        "API call timed out after {:?}",
                        timeout_duration
                    )));
                }
            };

            let ids: Vec<String> = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect();

            debug!("Listed {} message IDs", ids.len());
            Ok(MessagePage {
                ids,
                next_page_token: response.next_page_token,
            })
        })
        .await
    }

    async fn get_message_metadata(&self, id: &str) -> Result<RawMessageRecord> {
        self.fetch_single_with_retry(id).await
    }
}
