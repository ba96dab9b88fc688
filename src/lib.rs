//! Gmail Sender Report
//!
//! Exports Gmail message headers and ranks senders by how many messages
//! they sent, so a mailbox owner can see who fills the inbox.
//!
//! # Overview
//!
//! - **Identity**: canonical sender email from a raw `From` header
//! - **Export**: paged, resumable metadata retrieval saved as JSON
//! - **Ingest**: CSV/XLSX loading with tolerant column matching
//! - **Aggregation**: per-sender counts, an inclusive count range, ranking
//! - **Reports**: ranking and annotated-message CSVs
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_sender_report::{aggregate, ingest, CountRange};
//!
//! fn main() -> anyhow::Result<()> {
//!     let records = ingest::load_export("exports/gmail_headers.json".as_ref())?;
//!     let result = aggregate(&records, CountRange::new(5, None));
//!
//!     for entry in result.ranking.iter().take(10) {
//!         println!("{:>5}  {}", entry.count, entry.canonical_email);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`aggregator`] - Sender counting, range filtering and ranking
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`cli`] - Command-line interface and pipeline orchestration
//! - [`client`] - Rate-limited Gmail API client with retry logic
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`export`] - JSON and CSV writers
//! - [`identity`] - Canonical email extraction
//! - [`ingest`] - CSV, XLSX and JSON export loaders
//! - [`models`] - Core data structures
//! - [`source`] - Paged metadata retrieval with resumable cursors

pub mod aggregator;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod source;

pub use error::{ReportError, Result};

pub use models::{AnnotatedRecord, CanonicalRecord, ExportRecord, RawMessageRecord, SenderRanking};

pub use identity::extract_canonical_email;

pub use aggregator::{aggregate, Aggregation, CountRange};

pub use config::{AnalysisConfig, ClientConfig, Config, ExportConfig};

pub use client::{GmailClient, MessagePage, ProductionGmailClient};

pub use source::{
    collect_records, FetchCheckpoint, FetchItem, GmailMessageSource, MessageSource, PageCursor,
};

pub use cli::{AnalysisReport, Cli, Commands, ExportReport, ProgressReporter};
