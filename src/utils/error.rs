use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Compiled regex patterns for redacting sensitive data.
/// Using LazyLock for thread-safe one-time initialization.
///
/// Note: These patterns are static compile-time constants that are validated by tests.
/// The expect() calls here are acceptable because:
/// 1. Patterns are known-valid literals, not runtime input
/// 2. Tests verify all patterns compile successfully
/// 3. Any regex error would be caught immediately at first use
static REDACTION_PATTERNS: LazyLock<[(regex::Regex, &'static str); 4]> = LazyLock::new(|| {
    [
        (
            regex::Regex::new(r"(api[_-]?key[=:\s]+)[^\s]+")
                .expect("api_key redaction pattern is invalid"),
            "${1}[REDACTED]",
        ),
        (
            regex::Regex::new(r"(token[=:\s]+)[^\s]+").expect("token redaction pattern is invalid"),
            "${1}[REDACTED]",
        ),
        (
            regex::Regex::new(r"(?i)(bearer\s+)[^\s]+")
                .expect("bearer redaction pattern is invalid"),
            "${1}[REDACTED]",
        ),
        (
            regex::Regex::new(r"(sk-[a-zA-Z0-9]{8,})")
                .expect("sk-key redaction pattern is invalid"),
            "[REDACTED]",
        ),
    ]
});

#[derive(Debug, Error)]
pub enum PlanweaveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding dimension mismatch: backend produced {actual}, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Backend error: {backend} - {}", redact_sensitive_data(message))]
    Backend { backend: String, message: String },

    #[error("Rate limited by {backend}, retry after {retry_after:?}")]
    RateLimited {
        backend: String,
        retry_after: Option<Duration>,
    },

    #[error("Malformed structured output from {agent}: {message}")]
    MalformedOutput {
        agent: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Document parse error in {document}: {message}")]
    DocumentParse { document: String, message: String },

    #[error("Knowledge store error: {0}")]
    Store(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Validation error: {message}\nSuggestion: {suggestion}")]
    ValidationError { message: String, suggestion: String },

    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Supervisor rerun budget exhausted after {reruns} rerun(s)")]
    RerunExhausted { reruns: u32 },
}

/// Redact sensitive information from error messages.
fn redact_sensitive_data(message: &str) -> String {
    let mut result = message.to_string();
    for (pattern, replacement) in REDACTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

impl PlanweaveError {
    /// Transient errors are retried with exponential backoff; everything
    /// else escalates immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlanweaveError::RateLimited { .. } | PlanweaveError::NetworkError { .. }
        )
    }

    pub fn malformed(agent: &str, message: impl Into<String>) -> Self {
        PlanweaveError::MalformedOutput {
            agent: agent.to_string(),
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_level(level: &str) -> Self {
        PlanweaveError::ValidationError {
            message: format!("Invalid organizational level: '{}'", level),
            suggestion: "Valid levels are: ministry, university, center".to_string(),
        }
    }

    pub fn invalid_chunk_config(size: usize, overlap: usize) -> Self {
        PlanweaveError::ValidationError {
            message: format!(
                "Invalid chunk configuration: size={} overlap={}",
                size, overlap
            ),
            suggestion: "Overlap must be smaller than chunk size, and chunk size at least 50 tokens"
                .to_string(),
        }
    }

    pub fn missing_api_key(backend: &str) -> Self {
        let env_var = format!("{}_API_KEY", backend.to_uppercase());
        PlanweaveError::ValidationError {
            message: format!("API key not configured for backend '{}'", backend),
            suggestion: format!(
                "Set the {} environment variable or add it to the per-agent config block",
                env_var
            ),
        }
    }
}

impl From<serde_json::Error> for PlanweaveError {
    fn from(err: serde_json::Error) -> Self {
        PlanweaveError::MalformedOutput {
            agent: "unknown".to_string(),
            message: "Failed to parse JSON response".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for PlanweaveError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out. Check your network connection.".to_string()
        } else if err.is_connect() {
            "Failed to connect to server. Check your network connection.".to_string()
        } else if err.is_status() {
            format!(
                "HTTP error: {}",
                err.status()
                    .map_or("unknown".to_string(), |s| s.to_string())
            )
        } else {
            "Network request failed".to_string()
        };

        PlanweaveError::NetworkError {
            message,
            source: Some(Box::new(err)),
        }
    }
}

/// Format a `PlanweaveError` with contextual information and suggestions.
///
/// Provides user-friendly error output with a clear error type header, a
/// "What happened" section, and actionable suggestions. Verbose mode adds
/// the full error chain.
pub fn format_error(error: &PlanweaveError, verbose: bool) -> String {
    use std::fmt::Write;

    let mut output = String::new();

    // Error header with warning symbol
    let _ = writeln!(output, "\n\u{26a0} Error: {}", error_title(error));

    // What happened section
    let context_lines = error_context_lines(error);
    let _ = writeln!(output, "\nWhat happened:");
    for (i, line) in context_lines.iter().enumerate() {
        let prefix = if i == context_lines.len() - 1 {
            "\u{2514}\u{2500}"
        } else {
            "\u{251c}\u{2500}"
        };
        let _ = writeln!(output, "{} {}", prefix, line);
    }

    // Suggestions section
    let suggestions = error_suggestions(error);
    if !suggestions.is_empty() {
        let _ = writeln!(output, "\nHow to fix:");
        for suggestion in suggestions {
            let _ = writeln!(output, "\u{2022} {}", suggestion);
        }
    }

    if verbose {
        let _ = writeln!(output, "\nDebug info:");
        let _ = writeln!(output, "{:?}", error);
    }

    output
}

/// Get a short title for the error type.
fn error_title(error: &PlanweaveError) -> &'static str {
    match error {
        PlanweaveError::Config(_) => "Configuration error",
        PlanweaveError::DimensionMismatch { .. } => "Embedding dimension mismatch",
        PlanweaveError::FileSystem(_) => "File system error",
        PlanweaveError::Backend { .. } => "LLM backend error",
        PlanweaveError::RateLimited { .. } => "Rate limit exceeded",
        PlanweaveError::MalformedOutput { .. } => "Malformed agent output",
        PlanweaveError::DocumentParse { .. } => "Document parse error",
        PlanweaveError::Store(_) => "Knowledge store error",
        PlanweaveError::NodeNotFound(_) => "Node not found",
        PlanweaveError::ValidationError { .. } => "Validation error",
        PlanweaveError::NetworkError { .. } => "Network error",
        PlanweaveError::StageFailed { .. } => "Pipeline stage failed",
        PlanweaveError::RerunExhausted { .. } => "Supervisor rerun budget exhausted",
    }
}

/// Get context lines explaining what happened.
fn error_context_lines(error: &PlanweaveError) -> Vec<String> {
    match error {
        PlanweaveError::Config(msg) => {
            vec![
                "Stage: Loading configuration".to_string(),
                format!("Error: {}", msg),
            ]
        }
        PlanweaveError::DimensionMismatch { expected, actual } => {
            vec![
                "Stage: Verifying embedding backend".to_string(),
                format!("Store dimension: {}", expected),
                format!("Backend dimension: {}", actual),
            ]
        }
        PlanweaveError::FileSystem(err) => {
            vec![
                "Stage: File system operation".to_string(),
                format!("Error: {}", err),
            ]
        }
        PlanweaveError::Backend { backend, message } => {
            vec![
                format!("Stage: Communicating with {} backend", backend),
                format!("Error: {}", redact_sensitive_data(message)),
            ]
        }
        PlanweaveError::RateLimited {
            backend,
            retry_after,
        } => {
            let mut lines = vec![
                format!("Stage: Calling {} backend", backend),
                "Error: Rate limit exceeded (429)".to_string(),
            ];
            if let Some(duration) = retry_after {
                lines.push(format!("Retry after: {} seconds", duration.as_secs()));
            }
            lines
        }
        PlanweaveError::MalformedOutput { agent, message, .. } => {
            vec![
                format!("Stage: Parsing structured output from '{}' agent", agent),
                format!("Error: {}", message),
            ]
        }
        PlanweaveError::DocumentParse { document, message } => {
            vec![
                format!("Stage: Parsing document '{}'", document),
                format!("Error: {}", message),
            ]
        }
        PlanweaveError::Store(msg) => {
            vec![
                "Stage: Knowledge store operation".to_string(),
                format!("Error: {}", msg),
            ]
        }
        PlanweaveError::NodeNotFound(id) => {
            vec![
                "Stage: Resolving graph node".to_string(),
                format!("Missing node id: {}", id),
            ]
        }
        PlanweaveError::ValidationError { message, .. } => {
            vec![
                "Stage: Validating input".to_string(),
                format!("Error: {}", message),
            ]
        }
        PlanweaveError::NetworkError { message, .. } => {
            vec![
                "Stage: Network communication".to_string(),
                format!("Error: {}", message),
            ]
        }
        PlanweaveError::StageFailed { stage, message } => {
            vec![
                format!("Stage: {}", stage),
                format!("Error: {}", message),
            ]
        }
        PlanweaveError::RerunExhausted { reruns } => {
            vec![
                "Stage: Supervisor review".to_string(),
                format!("Reruns attempted: {}", reruns),
            ]
        }
    }
}

/// Get actionable suggestions for the error.
fn error_suggestions(error: &PlanweaveError) -> Vec<String> {
    match error {
        PlanweaveError::Config(msg) => {
            if msg.contains("not found") || msg.contains("missing") {
                vec![
                    "Create a planweave.toml config file in your project root".to_string(),
                    "Or run without a config file to use defaults".to_string(),
                ]
            } else {
                vec!["Check your planweave.toml syntax and values".to_string()]
            }
        }
        PlanweaveError::DimensionMismatch { .. } => {
            vec![
                "Set embedding_dimension to match the embedding model's output size".to_string(),
                "Or re-ingest the corpus after switching embedding models".to_string(),
            ]
        }
        PlanweaveError::FileSystem(err) => {
            if err.kind() == std::io::ErrorKind::PermissionDenied {
                vec!["Check file permissions for the target directory".to_string()]
            } else if err.kind() == std::io::ErrorKind::NotFound {
                vec!["Verify the path exists and is accessible".to_string()]
            } else {
                vec!["Check disk space and file system permissions".to_string()]
            }
        }
        PlanweaveError::Backend { backend, message } => {
            if message.to_lowercase().contains("api key")
                || message.to_lowercase().contains("unauthorized")
                || message.to_lowercase().contains("401")
            {
                let env_var = format!("{}_API_KEY", backend.to_uppercase());
                vec![
                    format!("Set the {} environment variable:", env_var),
                    format!("  export {}=your-key-here", env_var),
                ]
            } else {
                vec![
                    "Check the backend's status page for outages".to_string(),
                    "Or switch this agent to a different backend in the per-agent config"
                        .to_string(),
                ]
            }
        }
        PlanweaveError::RateLimited { retry_after, .. } => {
            let wait_suggestion = retry_after
                .map(|d| format!("Wait {} seconds and try again", d.as_secs()))
                .unwrap_or_else(|| "Wait 60 seconds and try again".to_string());
            vec![
                wait_suggestion,
                "Or lower the fan-out worker count to reduce request rate".to_string(),
            ]
        }
        PlanweaveError::MalformedOutput { .. } => {
            vec![
                "The LLM response was malformed".to_string(),
                "Try again - LLM outputs can vary".to_string(),
                "If the problem persists, try a different model for this agent".to_string(),
            ]
        }
        PlanweaveError::DocumentParse { .. } => {
            vec!["Check the document is valid markdown with # headings".to_string()]
        }
        PlanweaveError::Store(msg) => {
            if msg.contains("corrupt") || msg.contains("invalid") {
                vec!["Delete the store directory and re-ingest the corpus".to_string()]
            } else {
                vec!["Check disk space and permissions".to_string()]
            }
        }
        PlanweaveError::NodeNotFound(_) => {
            vec![
                "Re-ingest the corpus so node ids match the current documents".to_string(),
                "Check special_protocols_node_ids against `planweave ingest` output".to_string(),
            ]
        }
        PlanweaveError::ValidationError { suggestion, .. } => {
            vec![suggestion.clone()]
        }
        PlanweaveError::NetworkError { message, .. } => {
            if message.contains("timeout") {
                vec![
                    "Check your network connection".to_string(),
                    "The LLM backend may be experiencing high load".to_string(),
                    "Try again in a few moments".to_string(),
                ]
            } else {
                vec![
                    "Check your internet connection".to_string(),
                    "Verify the backend's API endpoint is accessible".to_string(),
                ]
            }
        }
        PlanweaveError::StageFailed { .. } => {
            vec![
                "Run with --verbose to see per-stage retry details".to_string(),
                "The errors log in the generation report names the failing agent".to_string(),
            ]
        }
        PlanweaveError::RerunExhausted { .. } => {
            vec![
                "The best available plan was returned with approved_with_warnings".to_string(),
                "Review the supervisor report and adjust the failing agent's model or prompt"
                    .to_string(),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_data_redaction() {
        let message = "Error with api_key=sk-1234567890abcdefghij and token=secret123";
        let redacted = redact_sensitive_data(message);
        assert!(!redacted.contains("sk-1234567890abcdefghij"));
        assert!(!redacted.contains("secret123"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn test_backend_error_redacts_api_key() {
        let err = PlanweaveError::Backend {
            backend: "openai".to_string(),
            message: "Failed with key sk-test123456789012345678901234".to_string(),
        };
        let msg = err.to_string();
        assert!(!msg.contains("sk-test123456789012345678901234"));
        assert!(msg.contains("[REDACTED]"));
    }

    #[test]
    fn test_missing_api_key_shows_env_var() {
        let err = PlanweaveError::missing_api_key("openai");
        let msg = err.to_string();
        assert!(msg.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            PlanweaveError::RateLimited {
                backend: "openai".to_string(),
                retry_after: None,
            }
            .is_transient()
        );
        assert!(
            PlanweaveError::NetworkError {
                message: "timeout".to_string(),
                source: None,
            }
            .is_transient()
        );
        assert!(!PlanweaveError::Config("bad".to_string()).is_transient());
        assert!(!PlanweaveError::malformed("selector", "not json").is_transient());
    }

    #[test]
    fn test_format_error_dimension_mismatch() {
        let err = PlanweaveError::DimensionMismatch {
            expected: 768,
            actual: 1024,
        };
        let formatted = format_error(&err, false);

        assert!(formatted.contains("Embedding dimension mismatch"));
        assert!(formatted.contains("768"));
        assert!(formatted.contains("1024"));
        assert!(formatted.contains("embedding_dimension"));
    }

    #[test]
    fn test_format_error_rate_limited() {
        let err = PlanweaveError::RateLimited {
            backend: "openai".to_string(),
            retry_after: Some(Duration::from_secs(60)),
        };
        let formatted = format_error(&err, false);

        assert!(formatted.contains("Rate limit exceeded"));
        assert!(formatted.contains("Calling openai backend"));
        assert!(formatted.contains("Wait 60 seconds"));
    }

    #[test]
    fn test_format_error_verbose_mode() {
        let err = PlanweaveError::malformed("timing", "Invalid JSON");
        let formatted = format_error(&err, true);

        assert!(formatted.contains("Debug info:"));
        assert!(formatted.contains("Invalid JSON"));
    }

    #[test]
    fn test_format_error_stage_failed() {
        let err = PlanweaveError::StageFailed {
            stage: "assigner".to_string(),
            message: "all retries exhausted".to_string(),
        };
        let formatted = format_error(&err, false);

        assert!(formatted.contains("Pipeline stage failed"));
        assert!(formatted.contains("assigner"));
        assert!(formatted.contains("--verbose"));
    }

    #[test]
    fn test_node_not_found_display() {
        let err = PlanweaveError::NodeNotFound("doc1_h5".to_string());
        assert!(err.to_string().contains("doc1_h5"));
    }
}
