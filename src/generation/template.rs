//! Role-tagged messages and model chat templates.
//!
//! Engines receive a single raw prompt string; the template decides how
//! roles are marked. The assembled prompt always ends with the assistant
//! marker so the model continues as the assistant.

use std::fmt::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions framing the conversation.
    System,
    /// The person asking.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Lowercase role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Content length in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Prompt format expected by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// `System:` / `User:` / `Assistant:` lines.
    #[default]
    Plain,
    /// Llama 3 header tokens.
    Llama3,
    /// `<|im_start|>` / `<|im_end|>` blocks.
    ChatMl,
}

impl FromStr for ChatTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" | "default" => Ok(Self::Plain),
            "llama3" | "llama-3" => Ok(Self::Llama3),
            "chatml" | "chat-ml" => Ok(Self::ChatMl),
            other => Err(Error::Config {
                message: format!("unknown chat template: {other}"),
            }),
        }
    }
}

impl ChatTemplate {
    /// Template name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Llama3 => "llama3",
            Self::ChatMl => "chatml",
        }
    }

    /// Formats `messages` into a single prompt ending at the assistant turn.
    ///
    /// # Examples
    ///
    /// ```
    /// use local_llm::generation::{ChatMessage, ChatTemplate};
    ///
    /// let prompt = ChatTemplate::Plain.format(&[ChatMessage::user("Hi")]);
    /// assert_eq!(prompt, "User: Hi\nAssistant:");
    /// ```
    #[must_use]
    pub fn format(self, messages: &[ChatMessage]) -> String {
        match self {
            Self::Plain => format_plain(messages),
            Self::Llama3 => format_llama3(messages),
            Self::ChatMl => format_chatml(messages),
        }
    }
}

fn format_plain(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let _ = writeln!(prompt, "{label}: {}", message.content);
        if message.role == Role::System {
            prompt.push('\n');
        }
    }
    prompt.push_str("Assistant:");
    prompt
}

fn format_llama3(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for message in messages {
        let _ = write!(
            prompt,
            "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
            message.role.as_str(),
            message.content
        );
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

fn format_chatml(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let _ = write!(
            prompt,
            "<|im_start|>{}\n{}<|im_end|>\n",
            message.role.as_str(),
            message.content
        );
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}
