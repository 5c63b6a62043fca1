//! Direct single-call answering

use crate::llm::{Message, render_transcript};

/// Fixed system instruction of the direct path
pub const DIRECT_INSTRUCTION: &str =
    "You are a helpful assistant. Answer the user's latest message directly and concisely.";

/// Response used when the direct generation call fails
pub const APOLOGY: &str =
    "Sorry, I couldn't generate a response right now. Please try again in a moment.";

/// Instruction, history window, then the query
pub fn direct_prompt(query: &str, history: &[Message]) -> String {
    let mut prompt = format!("{}\n", DIRECT_INSTRUCTION);
    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        prompt.push_str(&render_transcript(history));
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nUser: {}\nAssistant:", query));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_prompt_layout() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let prompt = direct_prompt("how are you", &history);
        assert!(prompt.starts_with(DIRECT_INSTRUCTION));
        assert!(prompt.contains("User: hi\nAssistant: hello"));
        assert!(prompt.ends_with("User: how are you\nAssistant:"));
    }
}
