use anyhow::Result;
use clap::Parser;
use gmail_sender_report::cli::{self, Cli, Commands, ProgressReporter};
use gmail_sender_report::client::ProductionGmailClient;
use gmail_sender_report::config::Config;
use gmail_sender_report::error::ReportError;
use gmail_sender_report::{auth, ingest};
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: MultiProgress,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: MultiProgress,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(self.multi.clone())
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-senders --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Several dependencies pull in rustls; pick one provider explicitly
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_sender_report=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_sender_report=info,warn"))
    };

    // MultiProgress is a shared handle; logs and bars draw through the same one
    let multi_progress = MultiProgress::new();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: multi_progress.clone(),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if *force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let config = Config::load(&cli.config).await?;
            let client = ProductionGmailClient::new(hub, config.client.max_concurrent_requests);
            println!("Connected to account: {}", client.profile_email().await?);

            Ok(())
        }

        Commands::Export(args) => {
            let config = Config::load(&cli.config).await?;
            let export_config = args.apply(&config.export);
            if export_config.max_messages == 0 {
                return Err(ReportError::ConfigError("--max must be at least 1".to_string()).into());
            }

            let reporter = ProgressReporter::with_multi_progress(multi_progress.clone());
            let report = cli::run_export(
                &cli,
                &export_config,
                &config.client,
                args.cursor_file.as_deref(),
                &reporter,
            )
            .await?;

            println!("Fetched {} messages.", report.fetched);
            if report.resumed > 0 {
                println!("  ({} carried over from the cursor file)", report.resumed);
            }
            match report.paths {
                None => println!("No messages matched the query."),
                Some(paths) => {
                    println!(
                        "QA: Missing canonical email for {} records.",
                        report.missing_canonical
                    );
                    println!("Saved JSON to: {}", paths.timestamped.display());
                    println!("Updated latest export: {}", paths.latest.display());
                }
            }

            Ok(())
        }

        Commands::Analyze(args) => {
            let config = Config::load(&cli.config).await?;
            let analysis_config = args.apply(&config.analysis);
            tracing::debug!("Analysis settings: {:?}", analysis_config);

            let report = cli::run_analysis(&analysis_config)?;

            println!(
                "Loaded {} records from {}",
                report.records_loaded,
                analysis_config.input_path.display()
            );
            println!("Unique senders in range: {}", report.senders_in_range);
            println!("Messages in range: {}", report.messages_in_range);
            println!("Sender ranking CSV: {}", report.ranking_path.display());
            println!("Messages with counts CSV: {}", report.messages_path.display());

            Ok(())
        }

        Commands::Ingest { input, sheet } => {
            let rows = ingest::load_messages(input, sheet.as_deref())?;

            println!("Loaded {} rows from {}", rows.len(), input.display());
            if let Some(r) = rows.first() {
                println!("Sample row:");
                println!("  Date: {}", r.date);
                println!("  From: {}", r.from_raw);
                println!("  Subject: {}", r.subject);
                println!("  Unique ID: {}", r.unique_id);
            }

            Ok(())
        }

        Commands::ToCsv { input, output } => {
            let rows = cli::run_to_csv(input, output)?;
            println!("Wrote CSV: {} ({} rows)", output.display(), rows);
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !*force {
                return Err(ReportError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - export.query: Gmail search query for `export`");
            println!("  - export.max_messages: Upper bound on messages fetched");
            println!("  - analysis.min_count / analysis.max_count: Sender count range for reports");
            println!("  - analysis.label: Tag added to report filenames");

            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(report_err) = error.downcast_ref::<ReportError>() {
        match report_err {
            ReportError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: gmail-senders auth --force");
            }
            ReportError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: You've hit Gmail API rate limits.");
                eprintln!("      Wait a few seconds and try again.");
                eprintln!("      Consider reducing client.max_concurrent_requests in config.");
            }
            ReportError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-senders init-config --force");
            }
            ReportError::InputNotFound(_) => {
                eprintln!("\nHint: Run `gmail-senders export` first, or pass --json-file / --input.");
            }
            ReportError::MissingFields { .. } => {
                eprintln!("\nHint: The input needs Date, From, Subject and Unique ID columns.");
            }
            _ => {}
        }
    }
}
