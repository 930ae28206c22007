//! Prompt assembly for answer generation.

use crate::models::Chunk;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that provides accurate and concise answers \
based on the provided context. If the context does not contain enough \
information to answer the question, respond with 'I don't know.'";

pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find any relevant information in this project's documents for that question.";

/// One `[Source: file - Page: n]` header per chunk followed by its text with
/// newlines folded into spaces. Chunks are separated by a blank line and the
/// block carries no trailing whitespace.
pub fn format_context<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> String {
    let mut context = String::new();
    for chunk in chunks {
        let content = chunk.content.trim().replace(['\r', '\n'], " ");
        context.push_str(&format!(
            "[Source: {} - Page: {}]\n{}\n\n",
            chunk.metadata.source, chunk.metadata.page_number, content
        ));
    }
    context.trim().to_string()
}

pub fn render_prompt(context: &str, query: &str) -> String {
    format!("Context: \n{context}\n\nUser Question: {query}\n\nAnswer: ")
}

/// Builds the prompt from the chunks at `positions`, in the given order.
/// Positions outside `chunks` are skipped.
pub fn format_prompt(query: &str, chunks: &[Chunk], positions: &[usize]) -> String {
    let selected = positions.iter().filter_map(|position| chunks.get(*position));
    render_prompt(&format_context(selected), query)
}
