use crate::context::RunContext;
use crate::embeddings::Embedder;
use crate::generation::Generator;
use crate::models::Chunk;
use crate::retriever::Retriever;
use tracing::{info, warn};

pub const NO_CONTEXT_ANSWER: &str = "I'm sorry, but I couldn't find any relevant information.";
pub const FAILURE_ANSWER: &str = "I'm sorry, but I couldn't process your request at this time.";

/// Retrieval-augmented question answering. Always returns a user-facing
/// string; provider failures become the fallback answers above.
pub struct Chatter<E: Embedder, G: Generator> {
    retriever: Retriever<E>,
    generator: G,
    top_k: usize,
    max_context_chars: usize,
    context: RunContext,
}

impl<E: Embedder, G: Generator> Chatter<E, G> {
    pub fn new(
        retriever: Retriever<E>,
        generator: G,
        top_k: usize,
        max_context_chars: usize,
        context: RunContext,
    ) -> Self {
        Self {
            retriever,
            generator,
            top_k,
            max_context_chars,
            context,
        }
    }

    pub fn answer(&self, question: &str) -> String {
        let _entered = self.context.span.enter();
        info!(question_chars = question.chars().count(), "received question");

        let chunks = self.retriever.retrieve(question, self.top_k);
        if chunks.is_empty() {
            warn!("no chunks retrieved");
            return NO_CONTEXT_ANSWER.to_string();
        }

        let context = build_context(&chunks, self.max_context_chars);
        let prompt = render_prompt(&context, question);

        match self.generator.generate(&prompt) {
            Ok(answer) => {
                info!(answer_chars = answer.chars().count(), "generated answer");
                answer
            }
            Err(error) => {
                warn!(error = %error, "generation failed");
                FAILURE_ANSWER.to_string()
            }
        }
    }
}

/// Joins chunk texts with blank lines, cut to `max_chars` characters.
pub fn build_context(chunks: &[Chunk], max_chars: usize) -> String {
    let fused = chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    if fused.chars().count() <= max_chars {
        return fused;
    }
    warn!(max_chars, "context too long, truncating");
    fused.chars().take(max_chars).collect()
}

/// Inserted text is never scanned for placeholders.
pub fn render_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an AI assistant specialized in legal documents.\n\
Use the following context to answer the question.\n\n\
Context:\n{context}\n\n\
Question:\n{question}\n\n\
Answer in a clear and concise manner."
    )
}
