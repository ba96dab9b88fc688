//! Paged, resumable retrieval of message metadata

use std::collections::HashSet;
use std::path::Path;
use std::pin::Pin;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::GmailClient;
use crate::config::MAX_PAGE_SIZE;
use crate::error::{ReportError, Result};
use crate::models::RawMessageRecord;

/// Position in a paged listing, emitted after every completed page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageCursor {
    /// Query the token belongs to; a token is meaningless for any other query
    pub query: String,
    /// Opaque provider token for the next page
    pub page_token: Option<String>,
    pub messages_fetched: usize,
    /// Set once the listing has no further pages
    pub complete: bool,
    pub timestamp: DateTime<Utc>,
}

impl PageCursor {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            page_token: None,
            messages_fetched: 0,
            complete: false,
            timestamp: Utc::now(),
        }
    }

    fn advance(&mut self, next_page_token: Option<String>, fetched: usize) {
        self.complete = next_page_token.is_none();
        self.page_token = next_page_token;
        self.messages_fetched += fetched;
        self.timestamp = Utc::now();
    }
}

/// Cursor plus every record from the pages it covers, saved after each page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchCheckpoint {
    pub cursor: PageCursor,
    #[serde(default)]
    pub records: Vec<RawMessageRecord>,
}

#[derive(Serialize)]
struct CheckpointRef<'a> {
    cursor: &'a PageCursor,
    records: &'a [RawMessageRecord],
}

impl FetchCheckpoint {
    /// Load a checkpoint from file; `None` when the file does not exist
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let checkpoint = serde_json::from_str(&content).map_err(|e| {
                    ReportError::ConfigError(format!("Invalid cursor file: {}", e))
                })?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Written to a sibling `.tmp` file, then renamed over `path`
    pub async fn save(path: &Path, cursor: &PageCursor, records: &[RawMessageRecord]) -> Result<()> {
        let json = serde_json::to_string(&CheckpointRef { cursor, records })?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Item produced by [`MessageSource::fetch_metadata`]
#[derive(Debug, Clone)]
pub enum FetchItem {
    Record(RawMessageRecord),
    Cursor(PageCursor),
}

pub type FetchStream<'a> = Pin<Box<dyn Stream<Item = Result<FetchItem>> + Send + 'a>>;

/// Anything that can list and fetch message metadata for a query
pub trait MessageSource: Send + Sync {
    /// Stream up to `max_messages` records matching `query`.
    ///
    /// Passing a cursor from an earlier run resumes after its last
    /// completed page; messages it already counts are charged against
    /// `max_messages`. Records arrive in listing order.
    fn fetch_metadata<'a>(
        &'a self,
        query: &'a str,
        max_messages: usize,
        cursor: Option<PageCursor>,
    ) -> FetchStream<'a>;
}

/// [`MessageSource`] backed by the Gmail API
pub struct GmailMessageSource<C: GmailClient> {
    client: C,
    page_size: u32,
    concurrency: usize,
}

impl<C: GmailClient> GmailMessageSource<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            page_size: MAX_PAGE_SIZE,
            concurrency: 40,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Number of metadata requests in flight per page
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

}

impl<C: GmailClient> MessageSource for GmailMessageSource<C> {
    fn fetch_metadata<'a>(
        &'a self,
        query: &'a str,
        max_messages: usize,
        cursor: Option<PageCursor>,
    ) -> FetchStream<'a> {
        Box::pin(stream! {
            let mut cursor = match cursor {
                Some(c) if c.query == query => c,
                Some(c) => {
                    warn!("Ignoring cursor saved for a different query: {:?}", c.query);
                    PageCursor::new(query)
                }
                None => PageCursor::new(query),
            };

            let client = &self.client;
            let mut fetched = 0usize;

            loop {
                if cursor.complete {
                    info!("Cursor already complete after {} messages", cursor.messages_fetched);
                    yield Ok(FetchItem::Cursor(cursor.clone()));
                    break;
                }

                let remaining = max_messages.saturating_sub(cursor.messages_fetched);
                if remaining == 0 {
                    debug!("Reached max_messages ({}) across runs", max_messages);
                    break;
                }

                // remaining is at least 1 here, so the page size is too
                let page_size = (self.page_size as usize).min(remaining) as u32;
                let page = match client
                    .list_message_page(query, page_size, cursor.page_token.clone())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        warn!("Error listing messages: {}", e);
                        yield Err(e);
                        break;
                    }
                };

                if page.ids.is_empty() {
                    info!("No more messages to process");
                    cursor.advance(None, 0);
                    yield Ok(FetchItem::Cursor(cursor.clone()));
                    break;
                }

                let ids: Vec<String> = page.ids.into_iter().take(remaining).collect();
                debug!("Fetching metadata for {} messages", ids.len());

                let mut fetches = stream::iter(ids)
                    .map(|id| async move { client.get_message_metadata(&id).await })
                    .buffered(self.concurrency);

                let mut page_count = 0usize;
                let mut failed = false;
                while let Some(result) = fetches.next().await {
                    match result {
                        Ok(record) => {
                            page_count += 1;
                            yield Ok(FetchItem::Record(record));
                        }
                        Err(e) => {
                            warn!("Error fetching message metadata: {}", e);
                            failed = true;
                            yield Err(e);
                            break;
                        }
                    }
                }
                if failed {
                    break;
                }

                fetched += page_count;
                cursor.advance(page.next_page_token, page_count);
                yield Ok(FetchItem::Cursor(cursor.clone()));

                if cursor.complete {
                    info!("Reached end of messages");
                    break;
                }
            }

            info!("Fetch finished: {} messages this run, {} total", fetched, cursor.messages_fetched);
        })
    }
}

/// Drain a fetch stream into records, appending to `resumed`.
///
/// `on_progress` receives the running record count, resumed records
/// included. When `checkpoint_path` is given a [`FetchCheckpoint`] holding
/// every record so far is written there after each page. Records whose
/// `unique_id` is already present are skipped.
pub async fn collect_records<F>(
    mut stream: FetchStream<'_>,
    checkpoint_path: Option<&Path>,
    resumed: Vec<RawMessageRecord>,
    mut on_progress: F,
) -> Result<Vec<RawMessageRecord>>
where
    F: FnMut(usize),
{
    let mut seen: HashSet<String> = resumed.iter().map(|r| r.unique_id.clone()).collect();
    let mut records = resumed;

    while let Some(item) = stream.next().await {
        match item? {
            FetchItem::Record(record) => {
                if !seen.insert(record.unique_id.clone()) {
                    debug!("Skipping already collected message {}", record.unique_id);
                    continue;
                }
                records.push(record);
                on_progress(records.len());
            }
            FetchItem::Cursor(cursor) => {
                if let Some(path) = checkpoint_path {
                    FetchCheckpoint::save(path, &cursor, &records).await?;
                    debug!("Saved checkpoint ({} records) to {:?}", records.len(), path);
                }
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MessagePage;
    use async_trait::async_trait;
    use tempfile::NamedTempFile;

    mockall::mock! {
        pub TestGmailClient {}

        #[async_trait]
        impl GmailClient for TestGmailClient {
            async fn list_message_page(&self, query: &str, page_size: u32, page_token: Option<String>) -> Result<MessagePage>;
            async fn get_message_metadata(&self, id: &str) -> Result<RawMessageRecord>;
        }
    }

    fn record_for(id: &str) -> RawMessageRecord {
        RawMessageRecord {
            date: "Mon, 1 Jan 2024 10:00:00 +0000".to_string(),
            from_raw: format!("Sender {} <s{}@example.com>", id, id),
            subject: format!("Subject {}", id),
            unique_id: id.to_string(),
        }
    }

    fn ids(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("m{}", i)).collect()
    }

    fn metadata_echo(client: &mut MockTestGmailClient) {
        client
            .expect_get_message_metadata()
            .returning(|id| Ok(record_for(id)));
    }

    async fn drain(
        mut stream: FetchStream<'_>,
    ) -> (Vec<RawMessageRecord>, Vec<PageCursor>, Option<ReportError>) {
        let mut records = Vec::new();
        let mut cursors = Vec::new();
        let mut error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(FetchItem::Record(r)) => records.push(r),
                Ok(FetchItem::Cursor(c)) => cursors.push(c),
                Err(e) => error = Some(e),
            }
        }
        (records, cursors, error)
    }

    #[tokio::test]
    async fn test_pages_until_token_exhausted() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .returning(|_, _, token| match token.as_deref() {
                None => Ok(MessagePage { ids: ids(0..3), next_page_token: Some("p2".to_string()) }),
                Some("p2") => Ok(MessagePage { ids: ids(3..5), next_page_token: None }),
                Some(other) => panic!("unexpected token {}", other),
            });
        metadata_echo(&mut client);

        let source = GmailMessageSource::new(client).with_concurrency(2);
        let (records, cursors, error) = drain(source.fetch_metadata("in:inbox", 100, None)).await;

        assert!(error.is_none());
        let got: Vec<&str> = records.iter().map(|r| r.unique_id.as_str()).collect();
        assert_eq!(got, vec!["m0", "m1", "m2", "m3", "m4"]);

        assert_eq!(cursors.len(), 2);
        assert_eq!(cursors[0].page_token.as_deref(), Some("p2"));
        assert!(!cursors[0].complete);
        assert!(cursors[1].complete);
        assert_eq!(cursors[1].messages_fetched, 5);
    }

    #[tokio::test]
    async fn test_page_size_shrinks_to_remaining_budget() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .withf(|_, size, token| *size == 500 && token.is_none())
            .times(1)
            .returning(|_, _, _| Ok(MessagePage { ids: ids(0..500), next_page_token: Some("p2".to_string()) }));
        client
            .expect_list_message_page()
            .withf(|_, size, token| *size == 200 && token.as_deref() == Some("p2"))
            .times(1)
            .returning(|_, _, _| Ok(MessagePage { ids: ids(500..700), next_page_token: Some("p3".to_string()) }));
        metadata_echo(&mut client);

        let source = GmailMessageSource::new(client);
        let (records, cursors, error) = drain(source.fetch_metadata("", 700, None)).await;

        assert!(error.is_none());
        assert_eq!(records.len(), 700);
        // budget reached with pages left: cursor stays resumable
        let last = cursors.last().unwrap();
        assert!(!last.complete);
        assert_eq!(last.page_token.as_deref(), Some("p3"));
    }

    #[tokio::test]
    async fn test_oversized_page_is_truncated_to_budget() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .returning(|_, _, _| Ok(MessagePage { ids: ids(0..10), next_page_token: None }));
        metadata_echo(&mut client);

        let source = GmailMessageSource::new(client);
        let (records, _, _) = drain(source.fetch_metadata("", 4, None)).await;
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_first_page() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .times(1)
            .returning(|_, _, _| Ok(MessagePage::default()));
        client.expect_get_message_metadata().never();

        let source = GmailMessageSource::new(client);
        let (records, cursors, error) = drain(source.fetch_metadata("from:nobody", 50, None)).await;

        assert!(records.is_empty());
        assert!(error.is_none());
        assert_eq!(cursors.len(), 1);
        assert!(cursors[0].complete);
    }

    #[tokio::test]
    async fn test_resume_from_cursor() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .withf(|_, _, token| token.as_deref() == Some("p2"))
            .times(1)
            .returning(|_, _, _| Ok(MessagePage { ids: ids(3..5), next_page_token: None }));
        metadata_echo(&mut client);

        let mut cursor = PageCursor::new("q");
        cursor.advance(Some("p2".to_string()), 3);

        let source = GmailMessageSource::new(client);
        let (records, cursors, _) = drain(source.fetch_metadata("q", 100, Some(cursor))).await;

        assert_eq!(records.len(), 2);
        assert_eq!(cursors.last().unwrap().messages_fetched, 5);
    }

    #[tokio::test]
    async fn test_cursor_for_other_query_is_ignored() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .withf(|_, _, token| token.is_none())
            .times(1)
            .returning(|_, _, _| Ok(MessagePage { ids: ids(0..1), next_page_token: None }));
        metadata_echo(&mut client);

        let mut cursor = PageCursor::new("older query");
        cursor.advance(Some("stale".to_string()), 10);

        let source = GmailMessageSource::new(client);
        let (records, _, _) = drain(source.fetch_metadata("q", 100, Some(cursor))).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_cursor_fetches_nothing() {
        let mut client = MockTestGmailClient::new();
        client.expect_list_message_page().never();

        let mut cursor = PageCursor::new("q");
        cursor.advance(None, 12);

        let source = GmailMessageSource::new(client);
        let (records, cursors, _) = drain(source.fetch_metadata("q", 100, Some(cursor))).await;
        assert!(records.is_empty());
        assert_eq!(cursors.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_error_stops_stream() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .times(1)
            .returning(|_, _, _| Ok(MessagePage { ids: ids(0..3), next_page_token: Some("p2".to_string()) }));
        client.expect_get_message_metadata().returning(|id| {
            if id == "m1" {
                Err(ReportError::Forbidden("denied".to_string()))
            } else {
                Ok(record_for(id))
            }
        });

        let source = GmailMessageSource::new(client).with_concurrency(1);
        let (records, cursors, error) = drain(source.fetch_metadata("", 100, None)).await;

        assert_eq!(records.len(), 1);
        assert!(cursors.is_empty());
        assert!(matches!(error, Some(ReportError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_resumed_cursor_counts_against_max_messages() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .withf(|_, size, token| *size == 2 && token.as_deref() == Some("p2"))
            .times(1)
            .returning(|_, _, _| Ok(MessagePage { ids: ids(3..6), next_page_token: Some("p3".to_string()) }));
        metadata_echo(&mut client);

        let mut cursor = PageCursor::new("q");
        cursor.advance(Some("p2".to_string()), 3);

        let source = GmailMessageSource::new(client);
        let (records, cursors, _) = drain(source.fetch_metadata("q", 5, Some(cursor))).await;

        assert_eq!(records.len(), 2);
        assert_eq!(cursors.last().unwrap().messages_fetched, 5);
    }

    #[tokio::test]
    async fn test_cursor_at_max_messages_fetches_nothing() {
        let mut client = MockTestGmailClient::new();
        client.expect_list_message_page().never();

        let mut cursor = PageCursor::new("q");
        cursor.advance(Some("p2".to_string()), 4);

        let source = GmailMessageSource::new(client);
        let (records, cursors, error) = drain(source.fetch_metadata("q", 4, Some(cursor))).await;
        assert!(records.is_empty());
        assert!(cursors.is_empty());
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_collect_records_checkpoints_every_page() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .returning(|_, _, token| match token.as_deref() {
                None => Ok(MessagePage { ids: ids(0..2), next_page_token: Some("p2".to_string()) }),
                _ => Ok(MessagePage { ids: ids(2..3), next_page_token: None }),
            });
        metadata_echo(&mut client);

        let checkpoint_file = NamedTempFile::new().unwrap();
        let source = GmailMessageSource::new(client);
        let mut progress = Vec::new();

        let records = collect_records(
            source.fetch_metadata("q", 10, None),
            Some(checkpoint_file.path()),
            Vec::new(),
            |n| progress.push(n),
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(progress, vec![1, 2, 3]);

        let saved = FetchCheckpoint::load(checkpoint_file.path()).await.unwrap().unwrap();
        assert!(saved.cursor.complete);
        assert_eq!(saved.cursor.messages_fetched, 3);
        assert_eq!(saved.cursor.query, "q");
        assert_eq!(saved.records, records);
    }

    #[tokio::test]
    async fn test_failed_page_leaves_checkpoint_at_last_complete_page() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .returning(|_, _, token| match token.as_deref() {
                None => Ok(MessagePage { ids: ids(0..2), next_page_token: Some("p2".to_string()) }),
                _ => Ok(MessagePage { ids: ids(2..4), next_page_token: None }),
            });
        client.expect_get_message_metadata().returning(|id| {
            if id == "m3" {
                Err(ReportError::ServerError { status: 500, message: "backend".to_string() })
            } else {
                Ok(record_for(id))
            }
        });

        let checkpoint_file = NamedTempFile::new().unwrap();
        let source = GmailMessageSource::new(client).with_concurrency(1);
        let result = collect_records(
            source.fetch_metadata("q", 10, None),
            Some(checkpoint_file.path()),
            Vec::new(),
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(ReportError::ServerError { .. })));

        // m2 arrived from the failed page but is not part of the checkpoint
        let saved = FetchCheckpoint::load(checkpoint_file.path()).await.unwrap().unwrap();
        assert_eq!(saved.cursor.page_token.as_deref(), Some("p2"));
        let got: Vec<&str> = saved.records.iter().map(|r| r.unique_id.as_str()).collect();
        assert_eq!(got, vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn test_collect_records_skips_resumed_duplicates() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .returning(|_, _, _| Ok(MessagePage { ids: ids(1..3), next_page_token: None }));
        metadata_echo(&mut client);

        let source = GmailMessageSource::new(client);
        let records = collect_records(
            source.fetch_metadata("q", 10, None),
            None,
            vec![record_for("m0"), record_for("m1")],
            |_| {},
        )
        .await
        .unwrap();

        let got: Vec<&str> = records.iter().map(|r| r.unique_id.as_str()).collect();
        assert_eq!(got, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_collect_records_propagates_errors() {
        let mut client = MockTestGmailClient::new();
        client
            .expect_list_message_page()
            .returning(|_, _, _| Err(ReportError::AuthError("expired".to_string())));

        let source = GmailMessageSource::new(client);
        let result =
            collect_records(source.fetch_metadata("q", 10, None), None, Vec::new(), |_| {}).await;
        assert!(matches!(result, Err(ReportError::AuthError(_))));
    }

    #[tokio::test]
    async fn test_checkpoint_load_missing_file() {
        let loaded = FetchCheckpoint::load(Path::new("/tmp/no-such-sender-report-cursor.json"))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }
}
