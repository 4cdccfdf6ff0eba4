//! Output formatting for CLI commands.
//!
//! Supports text and JSON output formats.

use serde::Serialize;
use std::fmt::Write;
use std::io::Write as IoWrite;

use crate::chunking::ChunkPlan;
use crate::core::{FileContent, ProcessedDocument};
use crate::error::{CommandError, Error};
use crate::io::find_char_boundary;
use crate::pipeline::{ProgressSink, ProgressUpdate};

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output.
    Json,
}

impl OutputFormat {
    /// Parses format from string, falling back to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        Self::from_flag(s).unwrap_or(Self::Text)
    }

    /// Parses the `--format` flag strictly.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidArgument`] for anything other than
    /// `text` or `json`.
    pub fn from_flag(s: &str) -> Result<Self, CommandError> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CommandError::InvalidArgument(format!(
                "unknown output format '{other}'"
            ))),
        }
    }
}

/// Formats the chunk plan of a document.
#[must_use]
pub fn format_chunk_plan(
    document: &FileContent,
    plan: &ChunkPlan,
    preview_len: usize,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Text => format_chunk_plan_text(document, plan, preview_len),
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct PlanOutput<'a> {
                document: &'a str,
                size: u64,
                characters: usize,
                #[serde(flatten)]
                plan: &'a ChunkPlan,
            }
            format_json(&PlanOutput {
                document: &document.file_name,
                size: document.size,
                characters: document.char_len(),
                plan,
            })
        }
    }
}

fn format_chunk_plan_text(document: &FileContent, plan: &ChunkPlan, preview_len: usize) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Document: {}", document.file_name);
    let _ = writeln!(output, "  Size:         {}", format_size(document.size));
    let _ = writeln!(output, "  Characters:   {}", document.char_len());
    let _ = writeln!(output, "  Chunk size:   {}", plan.chunk_size);
    let _ = writeln!(output, "  Multiplier:   {:.2}", plan.profile.multiplier);
    let _ = writeln!(output, "  Density:      {:.2}", plan.density.factor());
    let _ = writeln!(output, "  Chunks:       {}", plan.chunks.len());

    if plan.chunks.is_empty() {
        return output;
    }

    output.push('\n');
    let _ = writeln!(
        output,
        "{:<6} {:<12} {:<12} {:<8} Preview",
        "Part", "Start", "End", "Chars"
    );
    output.push_str(&"-".repeat(70));
    output.push('\n');

    for chunk in &plan.chunks {
        let preview = truncate(&chunk.text().replace('\n', "\\n"), preview_len);
        let _ = writeln!(
            output,
            "{:<6} {:<12} {:<12} {:<8} {}",
            chunk.number(),
            chunk.char_range().start,
            chunk.char_range().end,
            chunk.char_len(),
            preview
        );
    }

    output
}

/// A follow-up question and its answer.
#[derive(Debug, Clone, Serialize)]
pub struct FollowUp {
    /// The question.
    pub question: String,
    /// The answer.
    pub answer: String,
}

/// Formats the result of `process`.
#[must_use]
pub fn format_process_result(
    document: Option<&ProcessedDocument>,
    answer: &str,
    follow_ups: &[FollowUp],
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = String::new();
            if let Some(doc) = document {
                let _ = writeln!(
                    output,
                    "{}: {} of {} parts summarized\n",
                    doc.document_id,
                    doc.succeeded_count(),
                    doc.total()
                );
            }
            output.push_str(answer);
            output.push('\n');
            for follow_up in follow_ups {
                let _ = write!(output, "\nQ: {}\nA: {}\n", follow_up.question, follow_up.answer);
            }
            output
        }
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct ProcessOutput<'a> {
                document: Option<&'a str>,
                succeeded: Option<usize>,
                total: Option<usize>,
                answer: &'a str,
                follow_ups: &'a [FollowUp],
            }
            format_json(&ProcessOutput {
                document: document.map(|d| d.document_id.as_str()),
                succeeded: document.map(ProcessedDocument::succeeded_count),
                total: document.map(ProcessedDocument::total),
                answer,
                follow_ups,
            })
        }
    }
}

/// Formats a one-shot chat reply.
#[must_use]
pub fn format_chat_reply(model: &str, reply: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("{reply}\n"),
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct ChatOutput<'a> {
                model: &'a str,
                reply: &'a str,
            }
            format_json(&ChatOutput { model, reply })
        }
    }
}

/// Formats an error for display.
///
/// Busy and timeout errors carry a "try again" hint; nothing retries
/// them automatically.
#[must_use]
pub fn format_error(error: &Error, format: OutputFormat) -> String {
    let message = if error.is_transient() {
        format!("{error} (try again)")
    } else {
        error.to_string()
    };
    match format {
        OutputFormat::Text => message,
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct ErrorOutput<'a> {
                error: &'a str,
                transient: bool,
            }
            format_json(&ErrorOutput {
                error: &message,
                transient: error.is_transient(),
            })
        }
    }
}

/// Progress lines on stderr, for text output.
#[derive(Debug, Default)]
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        let line = match update.chunk {
            Some(chunk) => format!("[{:>3}%] {}\n", chunk.percent, update.message),
            None => format!("{}\n", update.message),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Formats a value as JSON.
pub fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Formats a byte size as human-readable.
#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Truncates a string to max bytes with ellipsis, on a character boundary.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s[..find_char_boundary(s, max_len)].to_string()
    } else {
        format!("{}...", &s[..find_char_boundary(s, max_len - 3)])
    }
}
