//! Common test utilities and fixtures

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use gmail_sender_report::client::{parse_message_record, GmailClient, MessagePage};
use gmail_sender_report::error::{ReportError, Result};
use gmail_sender_report::models::{ExportRecord, RawMessageRecord};
use google_gmail1::api::Message;
use mockall::mock;
use serde_json::json;

/// Create a raw record with a fixed date
pub fn create_raw_record(id: &str, from: &str, subject: &str) -> RawMessageRecord {
    RawMessageRecord {
        date: "Mon, 1 Jan 2024 10:00:00 -0800".to_string(),
        from_raw: from.to_string(),
        subject: subject.to_string(),
        unique_id: id.to_string(),
    }
}

/// Create a canonicalized export record
pub fn create_export_record(id: &str, from: &str, subject: &str) -> ExportRecord {
    ExportRecord::from_raw(create_raw_record(id, from, subject))
}

/// A small mailbox: alice x3, carol x2, bob x1 and one sender without an address
pub fn sample_mailbox() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("m1", "Alice <alice@example.com>", "Invoice 1"),
        ("m2", "Carol Smith <CAROL@Example.NET>", "Lunch?"),
        ("m3", "bob@example.org", "Hello"),
        ("m4", "Alice <alice@example.com>", "Invoice 2"),
        ("m5", "Mailer Daemon", "Delivery failure"),
        ("m6", "\"Smith, Carol\" <carol@example.net>", "Re: Lunch?"),
        ("m7", "ALICE@EXAMPLE.COM", "Invoice 3"),
    ]
}

/// Create mock Gmail API message response (JSON), metadata format
pub fn mock_gmail_message_response(id: &str, from: &str, subject: &str) -> serde_json::Value {
    json!({
        "id": id,
        "threadId": format!("thread_{}", id),
        "labelIds": ["INBOX", "UNREAD"],
        "payload": {
            "headers": [
                {"name": "From", "value": from},
                {"name": "Subject", "value": subject},
                {"name": "Date", "value": "Mon, 1 Jan 2024 10:00:00 -0800"}
            ]
        },
        "internalDate": "1704124800000",
        "sizeEstimate": 1234
    })
}

/// Parse a mock response the way the production client does
pub fn record_from_response(response: serde_json::Value) -> Result<RawMessageRecord> {
    let message: Message = serde_json::from_value(response)?;
    parse_message_record(message)
}

/// Write records as a JSON export file
pub fn write_export_fixture(dir: &Path, name: &str, records: &[ExportRecord]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(records).unwrap()).unwrap();
    path
}

/// Read a CSV file into rows of strings, header included
pub fn read_csv_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

// Mock implementation of GmailClient for testing
mock! {
    pub GmailClient {}

    #[async_trait::async_trait]
    impl GmailClient for GmailClient {
        async fn list_message_page(&self, query: &str, page_size: u32, page_token: Option<String>) -> Result<MessagePage>;
        async fn get_message_metadata(&self, id: &str) -> Result<RawMessageRecord>;
    }
}

/// Mock client serving `mailbox` in pages of `page_len`
pub fn mock_client_for(
    mailbox: Vec<(&'static str, &'static str, &'static str)>,
    page_len: usize,
) -> MockGmailClient {
    mock_client_failing_once(mailbox, page_len, None)
}

/// Like [`mock_client_for`], but the first metadata fetch of `failing_id` is forbidden
pub fn mock_client_failing_once(
    mailbox: Vec<(&'static str, &'static str, &'static str)>,
    page_len: usize,
    failing_id: Option<&'static str>,
) -> MockGmailClient {
    let mut client = MockGmailClient::new();

    let ids: Vec<String> = mailbox.iter().map(|(id, _, _)| id.to_string()).collect();
    client
        .expect_list_message_page()
        .returning(move |_, page_size, token| {
            let start: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let end = (start + page_len.min(page_size as usize)).min(ids.len());
            Ok(MessagePage {
                ids: ids[start..end].to_vec(),
                next_page_token: (end < ids.len()).then(|| end.to_string()),
            })
        });

    let mut failed = false;
    client.expect_get_message_metadata().returning(move |id| {
        if !failed && failing_id == Some(id) {
            failed = true;
            return Err(ReportError::Forbidden(format!("message {}", id)));
        }
        let (_, from, subject) = mailbox
            .iter()
            .find(|(mid, _, _)| *mid == id)
            .copied()
            .unwrap();
        record_from_response(mock_gmail_message_response(id, from, subject))
    });

    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_export_record() {
        let record = create_export_record("m1", "Alice <Alice@Example.com>", "Hi");
        assert_eq!(record.canonical_email, "alice@example.com");
        assert_eq!(record.unique_id, "m1");
    }

    #[test]
    fn test_record_from_response() {
        let record =
            record_from_response(mock_gmail_message_response("abc", "x@y.com", "Subj")).unwrap();
        assert_eq!(record.unique_id, "abc");
        assert_eq!(record.from_raw, "x@y.com");
        assert_eq!(record.date, "Mon, 1 Jan 2024 10:00:00 -0800");
    }
}
