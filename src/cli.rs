//! Command-line interface

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::aggregator::aggregate;
use crate::auth;
use crate::client::ProductionGmailClient;
use crate::config::{AnalysisConfig, ClientConfig, ExportConfig};
use crate::error::Result;
use crate::export::{self, ExportPaths};
use crate::ingest;
use crate::models::ExportRecord;
use crate::source::{collect_records, FetchCheckpoint, GmailMessageSource, MessageSource};

#[derive(Parser, Debug)]
#[command(name = "gmail-senders")]
#[command(version = "0.1.0")]
#[command(about = "Export Gmail headers and rank senders by message count", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-senders/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Export message headers matching a Gmail query to JSON
    Export(ExportArgs),

    /// Rank senders in a JSON export and write CSV reports
    Analyze(AnalyzeArgs),

    /// Load raw messages from a CSV or XLSX file
    Ingest {
        /// Path to .csv or .xlsx
        #[arg(long)]
        input: PathBuf,

        /// XLSX sheet name (defaults to the first sheet)
        #[arg(long)]
        sheet: Option<String>,
    },

    /// Convert a JSON export to CSV
    ToCsv {
        /// JSON export to convert
        #[arg(long, default_value = "exports/gmail_headers.json")]
        input: PathBuf,

        /// CSV file to write
        #[arg(long, default_value = "reports/gmail_headers.csv")]
        output: PathBuf,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Flags for `export`; unset flags fall back to `[export]` in the config
#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Gmail search query (same syntax as the Gmail search box)
    #[arg(long)]
    pub query: Option<String>,

    /// Maximum number of messages to fetch
    #[arg(long)]
    pub max: Option<usize>,

    /// Output directory for the JSON files
    #[arg(long)]
    pub outdir: Option<PathBuf>,

    /// Persist the paging cursor here and resume from it if present
    #[arg(long)]
    pub cursor_file: Option<PathBuf>,
}

impl ExportArgs {
    pub fn apply(&self, base: &ExportConfig) -> ExportConfig {
        ExportConfig {
            query: self.query.clone().unwrap_or_else(|| base.query.clone()),
            max_messages: self.max.unwrap_or(base.max_messages),
            output_dir: self.outdir.clone().unwrap_or_else(|| base.output_dir.clone()),
        }
    }
}

/// Flags for `analyze`; unset flags fall back to `[analysis]` in the config
#[derive(Args, Debug, Clone, Default)]
pub struct AnalyzeArgs {
    /// Path to the JSON export
    #[arg(long)]
    pub json_file: Option<PathBuf>,

    /// Minimum message count per sender to include
    #[arg(long)]
    pub min_count: Option<usize>,

    /// Maximum message count per sender to include
    #[arg(long)]
    pub max_count: Option<usize>,

    /// Output directory for CSV files
    #[arg(long)]
    pub outdir: Option<PathBuf>,

    /// Label to include in output filenames (e.g. 'inbox14d')
    #[arg(long)]
    pub label: Option<String>,
}

impl AnalyzeArgs {
    pub fn apply(&self, base: &AnalysisConfig) -> AnalysisConfig {
        AnalysisConfig {
            input_path: self.json_file.clone().unwrap_or_else(|| base.input_path.clone()),
            output_dir: self.outdir.clone().unwrap_or_else(|| base.output_dir.clone()),
            label: self.label.clone().unwrap_or_else(|| base.label.clone()),
            min_count: self.min_count.unwrap_or(base.min_count),
            max_count: self.max_count.or(base.max_count),
        }
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a `MultiProgress` with the log writer so log lines print above bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of an export run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Records in the export, resumed ones included
    pub fetched: usize,
    /// Records carried over from an earlier interrupted run
    pub resumed: usize,
    /// Records whose sender address could not be determined
    pub missing_canonical: usize,
    /// `None` when nothing matched the query and no file was written
    pub paths: Option<ExportPaths>,
}

/// Outcome of an analysis run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub records_loaded: usize,
    pub senders_in_range: usize,
    pub messages_in_range: usize,
    pub ranking_path: PathBuf,
    pub messages_path: PathBuf,
}

/// Authenticate, then export headers for `export_config.query`
pub async fn run_export(
    cli: &Cli,
    export_config: &ExportConfig,
    client_config: &ClientConfig,
    cursor_file: Option<&Path>,
    reporter: &ProgressReporter,
) -> Result<ExportReport> {
    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated successfully");

    let client = ProductionGmailClient::new(hub, client_config.max_concurrent_requests);
    let source = GmailMessageSource::new(client)
        .with_page_size(client_config.page_size)
        .with_concurrency(client_config.max_concurrent_requests);

    export_from_source(&source, export_config, cursor_file, reporter).await
}

/// Fetch, canonicalize and save; the Gmail-independent half of `export`
pub async fn export_from_source<S: MessageSource>(
    source: &S,
    export_config: &ExportConfig,
    cursor_file: Option<&Path>,
    reporter: &ProgressReporter,
) -> Result<ExportReport> {
    let checkpoint = match cursor_file {
        Some(path) => FetchCheckpoint::load(path).await?,
        None => None,
    };
    let (cursor, resumed) = match checkpoint {
        Some(c) if c.cursor.query == export_config.query => {
            info!(
                "Resuming from cursor: {} messages already fetched",
                c.cursor.messages_fetched
            );
            (Some(c.cursor), c.records)
        }
        Some(c) => {
            warn!("Cursor file belongs to query {:?}; starting over", c.cursor.query);
            (None, Vec::new())
        }
        None => (None, Vec::new()),
    };
    let resumed_count = resumed.len();

    info!("Fetching messages with query: {:?}", export_config.query);
    let fetch_bar = reporter.add_progress_bar(
        export_config.max_messages as u64,
        "Fetching message metadata...",
    );
    let progress = fetch_bar.clone();

    let stream = source.fetch_metadata(&export_config.query, export_config.max_messages, cursor);
    let raw = collect_records(stream, cursor_file, resumed, move |n| {
        progress.set_position(n as u64)
    })
    .await;
    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            fetch_bar.abandon_with_message("Fetch failed");
            return Err(e);
        }
    };
    fetch_bar.finish_with_message(format!("Fetched {} messages", raw.len()));

    let records: Vec<ExportRecord> = raw.into_iter().map(ExportRecord::from_raw).collect();
    let fetched = records.len();

    if records.is_empty() {
        info!("No messages matched the query");
        return Ok(ExportReport {
            fetched,
            resumed: resumed_count,
            missing_canonical: 0,
            paths: None,
        });
    }

    let missing_canonical = records
        .iter()
        .filter(|r| r.canonical_email.is_empty())
        .count();
    if missing_canonical > 0 {
        warn!("Missing canonical email for {} records", missing_canonical);
    }

    let paths = export::save_export_json(&records, &export_config.output_dir)?;

    Ok(ExportReport {
        fetched,
        resumed: resumed_count,
        missing_canonical,
        paths: Some(paths),
    })
}

/// Load an export, rank senders and write both CSV reports
pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisReport> {
    let records = ingest::load_export(&config.input_path)?;

    let range = config.count_range();
    if range.is_empty() {
        warn!(
            "max_count ({:?}) is below min_count ({}); reports will be empty",
            config.max_count, config.min_count
        );
    }

    let aggregation = aggregate(&records, range);

    let ranking_path =
        export::write_ranking_csv(&aggregation.ranking, &config.output_dir, &config.label)?;
    let messages_path =
        export::write_messages_csv(&aggregation.messages, &config.output_dir, &config.label)?;

    Ok(AnalysisReport {
        records_loaded: records.len(),
        senders_in_range: aggregation.ranking.len(),
        messages_in_range: aggregation.messages.len(),
        ranking_path,
        messages_path,
    })
}

/// Flatten a JSON export to CSV, returning the number of rows written
pub fn run_to_csv(input: &Path, output: &Path) -> Result<usize> {
    let records = ingest::load_export(input)?;
    export::write_headers_csv(&records, output)?;
    Ok(records.len())
}
