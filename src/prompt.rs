//! Prompt assembly for answer generation.
//!
//! Retrieved chunks become a labelled context block, and the final request is
//! always three messages: the system prompt, the context, and the user query.
//! Labels use the `[title:chunk_N]` form the system prompt asks the model to
//! cite.

use crate::message::Message;
use crate::models::SourceRef;
use crate::retrieval::ScoredChunk;

/// Instructions sent with every generation request.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer based on the \
     provided context. If you're unsure, say so. Cite sources by [doc:chunk_index].";

/// Context block used when retrieval finds nothing.
pub const EMPTY_CONTEXT: &str = "No relevant context found.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// A generation request with the provenance that produced it.
#[derive(Clone, Debug)]
pub struct AssembledPrompt {
    pub messages: Vec<Message>,
    pub sources: Vec<SourceRef>,
}

/// Formats retrieved chunks into one context block.
///
/// Each chunk contributes `[title:chunk_N]` followed by its full content;
/// blocks are separated by `---` dividers. An empty slice yields
/// [`EMPTY_CONTEXT`].
#[must_use]
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    chunks
        .iter()
        .map(|scored| {
            format!(
                "[{}:chunk_{}]\n{}",
                scored.document_title, scored.chunk.chunk_index, scored.chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Converts retrieval results into the provenance records persisted with the
/// assistant's answer.
#[must_use]
pub fn source_refs(chunks: &[ScoredChunk]) -> Vec<SourceRef> {
    chunks
        .iter()
        .map(|scored| SourceRef {
            document_id: scored.chunk.document_id,
            chunk_index: scored.chunk.chunk_index,
            content_preview: SourceRef::preview_of(&scored.chunk.content),
            similarity: scored.similarity,
        })
        .collect()
}

/// Builds the message sequence and source list for one turn.
#[must_use]
pub fn assemble_prompt(system_prompt: &str, query: &str, chunks: &[ScoredChunk]) -> AssembledPrompt {
    let context = format_context(chunks);
    let messages = vec![
        Message::system(system_prompt),
        Message::system(&format!("Context:\n{context}")),
        Message::user(query),
    ];
    AssembledPrompt {
        messages,
        sources: source_refs(chunks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use uuid::Uuid;

    fn scored(title: &str, index: u32, content: &str, similarity: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk::new(Uuid::new_v4(), index, content, 1),
            document_title: title.to_string(),
            similarity,
        }
    }

    #[test]
    fn context_labels_chunks_with_title_and_position() {
        let chunks = vec![
            scored("guide.txt", 0, "Alpha", 0.9),
            scored("guide.txt", 2, "Beta", 0.5),
        ];
        assert_eq!(
            format_context(&chunks),
            "[guide.txt:chunk_0]\nAlpha\n\n---\n\n[guide.txt:chunk_2]\nBeta"
        );
    }

    #[test]
    fn empty_retrieval_yields_placeholder_context() {
        assert_eq!(format_context(&[]), "No relevant context found.");
    }

    #[test]
    fn prompt_is_system_context_then_query() {
        let chunks = vec![scored("notes.md", 1, "Fact.", 0.7)];
        let assembled = assemble_prompt(DEFAULT_SYSTEM_PROMPT, "what is it?", &chunks);

        assert_eq!(assembled.messages.len(), 3);
        assert_eq!(assembled.messages[0].role, Message::SYSTEM);
        assert_eq!(assembled.messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(assembled.messages[1].role, Message::SYSTEM);
        assert_eq!(
            assembled.messages[1].content,
            "Context:\n[notes.md:chunk_1]\nFact."
        );
        assert_eq!(assembled.messages[2].role, Message::USER);
        assert_eq!(assembled.messages[2].content, "what is it?");

        assert_eq!(assembled.sources.len(), 1);
        assert_eq!(assembled.sources[0].chunk_index, 1);
        assert_eq!(assembled.sources[0].content_preview, "Fact.");
    }

    #[test]
    fn source_previews_are_truncated_on_char_boundaries() {
        let long = "é".repeat(SourceRef::PREVIEW_CHARS + 40);
        let refs = source_refs(&[scored("a.txt", 0, &long, 1.0)]);
        assert_eq!(
            refs[0].content_preview.chars().count(),
            SourceRef::PREVIEW_CHARS
        );
    }
}
