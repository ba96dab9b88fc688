use thiserror::Error;

/// Type alias for Result with ReportError
pub type Result<T> = std::result::Result<T, ReportError>;

/// Error types for the export, ingest and report adapters
///
/// The core (identity extraction and aggregation) never returns these; it
/// signals an undetermined sender with an empty canonical email instead.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Message payload missing data we need
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input file does not exist
    #[error("Input file not found: {0}")]
    InputNotFound(String),

    /// Input file has an extension we cannot read
    #[error("Unsupported input type: {0} (use .csv or .xlsx)")]
    UnsupportedInput(String),

    /// Tabular input lacks columns from the required schema
    #[error("Missing required field(s): {}. Found: {}", missing.join(", "), found.join(", "))]
    MissingFields {
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// Tabular input has no header row
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// XLSX workbook error
    #[error("Workbook error: {0}")]
    WorkbookError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ReportError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReportError::RateLimitExceeded { .. }
                | ReportError::ServerError { .. }
                | ReportError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl From<calamine::Error> for ReportError {
    fn from(error: calamine::Error) -> Self {
        ReportError::WorkbookError(error.to_string())
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The header is either delay-seconds ("120") or an HTTP-date. Missing,
/// invalid or past values fall back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for ReportError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        ReportError::RateLimitExceeded { retry_after }
                    }
                    404 => ReportError::MessageNotFound("Resource not found".to_string()),
                    400 => ReportError::BadRequest(message),
                    401 => ReportError::AuthError(message),
                    403 => ReportError::Forbidden(message),
                    500..=599 => ReportError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => ReportError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => ReportError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                ReportError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => ReportError::NetworkError(err.to_string()),
            _ => ReportError::ApiError(error.to_string()),
        }
    }
}
