use crate::generation::{GenerationManager, GenerationOptions};
use crate::models::{Answer, AnswerMetadata, AnswerSource, RetrievedChunk};
use crate::prompt::{PromptAssembler, PromptContext};
use crate::smalltalk;
use crate::traits::ContextRetriever;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const EMPTY_QUESTION_REPLY: &str = "Please ask a question about your documents.";
pub const NO_CONTEXT_REPLY: &str =
    "I couldn't find relevant information in the loaded documents to answer this question.";

/// Drives retrieval, prompt assembly and generation for one question.
///
/// This is the fault boundary of the question path: whatever goes wrong
/// below it comes back as an [`Answer`], never as an error or a panic.
#[derive(Clone)]
pub struct QaEngine {
    retriever: Arc<dyn ContextRetriever>,
    prompts: PromptAssembler,
    generation: Arc<GenerationManager>,
}

impl QaEngine {
    pub fn new(
        retriever: Arc<dyn ContextRetriever>,
        prompts: PromptAssembler,
        generation: Arc<GenerationManager>,
    ) -> Self {
        Self {
            retriever,
            prompts,
            generation,
        }
    }

    pub async fn answer(&self, question: &str, top_k: Option<usize>) -> Answer {
        let started = Instant::now();

        if question.trim().is_empty() {
            warn!("empty question received");
            return Answer::without_sources(question, EMPTY_QUESTION_REPLY);
        }

        if let Some(kind) = smalltalk::classify(question) {
            info!(?kind, "small talk, skipping retrieval");
            let mut answer = Answer::without_sources(question, kind.reply());
            answer.metadata.processing_time_ms = elapsed_ms(started);
            return answer;
        }

        // The pipeline runs as its own task so a panic anywhere inside it
        // surfaces here as a JoinError instead of unwinding into the caller.
        let engine = self.clone();
        let owned_question = question.to_string();
        let pipeline = tokio::spawn(async move { engine.run(&owned_question, top_k).await });

        match pipeline.await {
            Ok(mut answer) => {
                answer.metadata.processing_time_ms = elapsed_ms(started);
                answer
            }
            Err(join_error) => {
                error!(reason = %join_error, "question pipeline failed");
                self.degraded(question, join_error.to_string(), started)
            }
        }
    }

    async fn run(&self, question: &str, top_k: Option<usize>) -> Answer {
        info!(question = %question, "answering question");

        let mut retrieved = self.retriever.search(question).await;
        if retrieved.is_empty() {
            warn!("no relevant documents for question");
            return Answer::without_sources(question, NO_CONTEXT_REPLY);
        }
        if let Some(limit) = top_k {
            retrieved.truncate(limit.max(1));
        }

        let contexts: Vec<PromptContext<'_>> = retrieved
            .iter()
            .map(|hit| PromptContext {
                file_name: &hit.file_name,
                content: &hit.content,
            })
            .collect();
        let rendered = self.prompts.render_default(&contexts, question);

        let outcome = self
            .generation
            .generate_outcome(
                &rendered.prompt,
                &rendered.system_prompt,
                GenerationOptions::default(),
            )
            .await;

        Answer {
            question: question.to_string(),
            answer: outcome.reply(),
            sources: sources_of(&retrieved),
            metadata: AnswerMetadata {
                retrieved_documents: retrieved.len(),
                processing_time_ms: 0,
                model_info: Some(self.generation.get_model_info()),
                error: outcome.error(),
            },
        }
    }

    fn degraded(&self, question: &str, reason: String, started: Instant) -> Answer {
        let mut answer = Answer::without_sources(
            question,
            format!("An error occurred while processing your question: {reason}"),
        );
        answer.metadata.processing_time_ms = elapsed_ms(started);
        answer.metadata.model_info = Some(self.generation.get_model_info());
        answer.metadata.error = Some(reason);
        answer
    }
}

/// One entry per document, in rank order of its best chunk.
fn sources_of(retrieved: &[RetrievedChunk]) -> Vec<AnswerSource> {
    let mut seen = HashSet::new();
    retrieved
        .iter()
        .filter(|hit| seen.insert((hit.file_name.as_str(), hit.source_id.as_str())))
        .map(|hit| AnswerSource {
            file_name: hit.file_name.clone(),
            source_id: hit.source_id.clone(),
        })
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
