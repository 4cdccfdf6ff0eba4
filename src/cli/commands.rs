//! CLI command implementations.
//!
//! Contains the logic for each CLI command. Output goes to the writer
//! handed in by the binary; progress goes to stderr.

use futures_util::StreamExt;
use std::io::{self, Write};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::assistant::Assistant;
use crate::backend;
use crate::chunking::{DocumentChunker, ModelProfile};
use crate::cli::output::{
    FollowUp, OutputFormat, StderrProgress, format_chat_reply, format_chunk_plan, format_error,
    format_json, format_process_result,
};
use crate::cli::parser::{Cli, Commands};
use crate::config::Config;
use crate::core::FileContent;
use crate::error::{Error, GenerationError, Result};
use crate::generation::ChatMessage;
use crate::pipeline::{NoopProgress, ProgressSink};
use crate::runtime::FinishReason;

/// Executes the CLI command.
///
/// # Arguments
///
/// * `cli` - Parsed CLI arguments.
/// * `out` - Destination for command output.
///
/// # Errors
///
/// Returns an error if the command fails to execute.
pub async fn execute<W: Write>(cli: &Cli, out: &mut W) -> Result<()> {
    let format = OutputFormat::from_flag(&cli.format)?;
    let config = cli.effective_config()?;

    match &cli.command {
        Commands::Config => emit(out, &format!("{}\n", format_json(&config))),
        Commands::Chunks { file, preview_len } => {
            cmd_chunks(&config, file, *preview_len, format, out)
        }
        Commands::Chat { message } => {
            let assistant = start(config)?;
            let result = match message {
                Some(message) => cmd_chat_once(&assistant, message, format, out).await,
                None => cmd_chat_interactive(&assistant, format, out).await,
            };
            finish(assistant, result).await
        }
        Commands::Process {
            file,
            instruction,
            follow_up,
        } => {
            let assistant = start(config)?;
            let result = cmd_process(&assistant, file, instruction, follow_up, format, out).await;
            finish(assistant, result).await
        }
    }
}

fn start(config: Config) -> Result<Assistant> {
    let backend = backend::from_config(&config.engine)?;
    Assistant::init(config, backend)
}

/// Shuts the assistant down, keeping the command's error if it had one.
async fn finish(assistant: Assistant, result: Result<()>) -> Result<()> {
    let shutdown = assistant.shutdown().await;
    result?;
    shutdown
}

fn cmd_chunks<W: Write>(
    config: &Config,
    file: &Path,
    preview_len: usize,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let document = FileContent::read(file)?;
    let profile = ModelProfile::for_model(&config.engine.default_model);
    let plan = DocumentChunker::new(config.chunking).plan(&document.content, &profile)?;
    emit(out, &format_chunk_plan(&document, &plan, preview_len, format))
}

async fn cmd_chat_once<W: Write>(
    assistant: &Assistant,
    message: &str,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    assistant.ensure_model().await?;
    let reply = stream_reply(assistant, message, &[], format, out).await?;

    if format == OutputFormat::Json {
        let model = assistant.runtime().current_model().unwrap_or_default();
        emit(out, &format!("{}\n", format_chat_reply(&model, &reply, format)))?;
    }
    Ok(())
}

async fn cmd_chat_interactive<W: Write>(
    assistant: &Assistant,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    assistant.ensure_model().await?;
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if format == OutputFormat::Text {
            emit(out, "> ")?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "/exit" | "/quit") {
            break;
        }

        match stream_reply(assistant, line, &history, format, out).await {
            Ok(reply) => {
                if format == OutputFormat::Json {
                    let model = assistant.runtime().current_model().unwrap_or_default();
                    emit(out, &format!("{}\n", format_chat_reply(&model, &reply, format)))?;
                }
                history.push(ChatMessage::user(line));
                history.push(ChatMessage::assistant(reply));
                assistant.config().generation.history.retain(&mut history);
            }
            Err(err) => {
                let message = format!("Error: {}\n", format_error(&err, OutputFormat::Text));
                let _ = io::stderr().lock().write_all(message.as_bytes());
            }
        }
    }
    Ok(())
}

/// Streams one reply. Text output is written token by token.
async fn stream_reply<W: Write>(
    assistant: &Assistant,
    message: &str,
    history: &[ChatMessage],
    format: OutputFormat,
    out: &mut W,
) -> Result<String> {
    let mut stream = assistant.chat(message, history)?;
    let mut reply = String::new();

    while let Some(piece) = stream.next().await {
        if format == OutputFormat::Text {
            emit(out, &piece)?;
            out.flush()?;
        }
        reply.push_str(&piece);
    }
    if stream.finish().await? == FinishReason::Cancelled {
        return Err(GenerationError::Cancelled.into());
    }

    if format == OutputFormat::Text {
        emit(out, "\n")?;
    }
    Ok(reply)
}

async fn cmd_process<W: Write>(
    assistant: &Assistant,
    file: &Path,
    instruction: &str,
    questions: &[String],
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    let document = FileContent::read(file)?;
    let progress: &dyn ProgressSink = match format {
        OutputFormat::Text => &StderrProgress,
        OutputFormat::Json => &NoopProgress,
    };

    let answer = assistant.process(&document, instruction, progress).await?;
    let processed = assistant.cache().get();

    let mut follow_ups = Vec::with_capacity(questions.len());
    for question in questions {
        let answer = assistant.answer_follow_up(question, progress).await?;
        follow_ups.push(FollowUp {
            question: question.clone(),
            answer,
        });
    }

    emit(
        out,
        &format_process_result(processed.as_ref(), &answer, &follow_ups, format),
    )
}

/// Writes `text`, treating a closed pipe (`| head`) as success.
fn emit<W: Write>(out: &mut W, text: &str) -> Result<()> {
    match out.write_all(text.as_bytes()) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.map_err(Error::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(
                dir.path().join("config.json"),
                r#"{"engine": {"kind": "scripted", "default_model": "test-3b"},
                    "pipeline": {"settle_delay_ms": 0}}"#,
            )
            .unwrap();
            Self { dir }
        }

        fn write(&self, name: &str, content: &str) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path.to_string_lossy().to_string()
        }

        fn cli(&self, args: &[&str]) -> Cli {
            let config = self.dir.path().join("config.json");
            let mut argv = vec!["local-llm", "--config", config.to_str().unwrap()];
            argv.extend_from_slice(args);
            Cli::try_parse_from(argv).unwrap()
        }

        async fn run(&self, args: &[&str]) -> Result<String> {
            let mut out = Vec::new();
            execute(&self.cli(args), &mut out).await?;
            Ok(String::from_utf8(out).unwrap())
        }
    }

    #[tokio::test]
    async fn test_config_command() {
        let fixture = Fixture::new();
        let output = fixture.run(&["config"]).await.unwrap();
        let config: Config = serde_json::from_str(&output).unwrap();
        assert_eq!(config.engine.default_model, "test-3b");
    }

    #[tokio::test]
    async fn test_chunks_command() {
        let fixture = Fixture::new();
        let file = fixture.write("doc.txt", &"Plain words here. ".repeat(300));

        let output = fixture.run(&["--format", "json", "chunks", &file]).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["document"], "doc.txt");
        assert!(value["chunks"].as_array().unwrap().len() >= 2);
        assert!((value["profile"]["multiplier"].as_f64().unwrap() - 1.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_chat_once() {
        let fixture = Fixture::new();
        let output = fixture.run(&["chat", "Hello there"]).await.unwrap();
        assert!(output.starts_with("Scripted reply 1 to a "));
        assert!(output.ends_with("prompt.\n"));
    }

    #[tokio::test]
    async fn test_chat_empty_message() {
        let fixture = Fixture::new();
        let err = fixture.run(&["chat", "   "]).await.unwrap_err();
        assert!(err.to_string().contains("instruction is empty"));
    }

    #[tokio::test]
    async fn test_process_with_follow_up() {
        let fixture = Fixture::new();
        let file = fixture.write("doc.txt", &"Plain words here. ".repeat(300));

        let output = fixture
            .run(&[
                "--format",
                "json",
                "process",
                &file,
                "--follow-up",
                "What else?",
            ])
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["document"], "doc.txt");
        assert_eq!(value["succeeded"], value["total"]);
        assert!(value["answer"].as_str().unwrap().starts_with("Scripted reply"));
        assert_eq!(value["follow_ups"][0]["question"], "What else?");
    }

    #[tokio::test]
    async fn test_unknown_format_rejected() {
        let fixture = Fixture::new();
        let err = fixture.run(&["--format", "yaml", "config"]).await.unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }

    #[tokio::test]
    async fn test_process_missing_file() {
        let fixture = Fixture::new();
        assert!(fixture.run(&["process", "/nonexistent/doc.txt"]).await.is_err());
    }

    #[test]
    fn test_emit_ignores_broken_pipe() {
        struct ClosedPipe;
        impl Write for ClosedPipe {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        assert!(emit(&mut ClosedPipe, "text").is_ok());
    }
}
