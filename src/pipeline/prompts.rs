//! Prompt text for chunk summaries and final synthesis.

use std::fmt::Write;

use crate::core::Chunk;

/// System message for chunk summaries.
pub const CHUNK_SYSTEM_PROMPT: &str = "You summarize excerpts of documents accurately. \
Report only what the excerpt says, in a few short bullet points.";

/// System message for the final synthesis.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You combine partial summaries of one document into a \
single answer. Stay faithful to the summaries and answer the user's question directly.";

/// Separator between part summaries in the synthesis prompt.
pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// Builds the user message asking for one chunk's summary.
#[must_use]
pub fn chunk_prompt(document: &str, instruction: &str, chunk: &Chunk, total: usize) -> String {
    let part = chunk.number();
    let mut prompt = format!(
        "This is part {part} of {total} from the document '{document}'.\n\
         Summarize the key points from ONLY this part of the document. \
         Do not mention that this is a part of a larger document. \
         Focus only on the content provided below.\n"
    );
    if !instruction.trim().is_empty() {
        let _ = writeln!(
            prompt,
            "Pay particular attention to anything relevant to this request: \"{}\"",
            instruction.trim()
        );
    }
    let _ = write!(prompt, "\n--- PART {part}/{total} CONTENT ---\n{}", chunk.text());
    prompt
}

/// Builds the user message asking for the final answer.
///
/// `total` is the number of parts the document was split into, which can
/// exceed `summaries.len()` when some parts failed or were left out.
#[must_use]
pub fn synthesis_prompt(instruction: &str, summaries: &[&str], total: usize) -> String {
    let mut prompt = if summaries.len() == total {
        format!(
            "I have analyzed a document in {total} parts and generated a summary for each part. \
             Now, please synthesize these individual summaries into a single, cohesive final \
             summary that answers the user's original question: \"{instruction}\"\n\n"
        )
    } else {
        format!(
            "I have analyzed a document in {total} parts and generated summaries for {} of them. \
             Please synthesize these summaries into a cohesive answer to: \"{instruction}\"\n\n",
            summaries.len()
        )
    };

    prompt.push_str("Here are the summaries of the parts:\n");
    prompt.push_str(&summaries.join(SUMMARY_SEPARATOR));
    prompt.push_str("\n\nPlease provide the final, synthesized answer.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_prompt() {
        let chunk = Chunk::new(2, "Revenue grew.".to_string(), 4000..4013, 4000..4013);
        let prompt = chunk_prompt("report.txt", "What changed?", &chunk, 4);

        assert!(prompt.starts_with("This is part 3 of 4 from the document 'report.txt'."));
        assert!(prompt.contains("\"What changed?\""));
        assert!(prompt.ends_with("--- PART 3/4 CONTENT ---\nRevenue grew."));
    }

    #[test]
    fn test_chunk_prompt_without_instruction() {
        let chunk = Chunk::new(0, "Body".to_string(), 0..4, 0..4);
        let prompt = chunk_prompt("a.txt", "  ", &chunk, 1);
        assert!(!prompt.contains("particular attention"));
    }

    #[test]
    fn test_synthesis_prompt_all_parts() {
        let prompt = synthesis_prompt("Summarize", &["one", "two"], 2);
        assert!(prompt.contains("generated a summary for each part"));
        assert!(prompt.contains("one\n\n---\n\ntwo"));
        assert!(prompt.ends_with("Please provide the final, synthesized answer."));
    }

    #[test]
    fn test_synthesis_prompt_partial() {
        let prompt = synthesis_prompt("Summarize", &["one", "three"], 4);
        assert!(prompt.contains("summaries for 2 of them"));
    }
}
