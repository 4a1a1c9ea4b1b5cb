use crate::config::PromptConfig;
use tracing::warn;

pub const DEFAULT_TEMPLATE: &str = "standard";
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Fixed reply the model is told to use when the context does not cover the question.
pub const REFUSAL: &str =
    "I don't have enough information in the provided documents to answer that.";

pub const SYSTEM_PROMPT: &str = "You are an assistant that answers questions about the user's documents.\n\
Rules:\n\
1. Answer only with information found in the supplied context documents.\n\
2. If the context does not contain the answer, reply exactly: \"I don't have enough information in the provided documents to answer that.\"\n\
3. Cite only the documents you actually used, by their [Document N] label and file name.\n\
4. Keep the answer brief: at most three sentences.";

const STANDARD_TEMPLATE: &str = "Use only the context documents below to answer the question.\n\
Do not invent or assume anything that is not stated in them.\n\
Cite the file names of the documents you used.\n\
\n\
Context:\n\
{contexts}\n\
\n\
Question: {question}\n\
\n\
Answer:";

const CONCISE_TEMPLATE: &str = "Answer concisely using only this context.\n\
Context: {contexts}\n\
Question: {question}\n\
Answer (cite sources):";

const ACADEMIC_TEMPLATE: &str = "You are preparing a rigorous, well-sourced response.\n\
Base every statement strictly on the excerpts below and attribute each claim to its source document.\n\
State explicitly when the excerpts are insufficient.\n\
\n\
Excerpts:\n\
{contexts}\n\
\n\
Research question: {question}\n\
\n\
Response:";

/// A context passage handed to [`PromptAssembler::render`].
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub file_name: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub template: &'static str,
    pub system_prompt: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    default_template: String,
    max_context_chars: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new(PromptConfig::default())
    }
}

impl PromptAssembler {
    pub fn new(config: PromptConfig) -> Self {
        Self {
            default_template: config.template,
            max_context_chars: config.max_context_chars.max(1),
        }
    }

    pub fn default_template(&self) -> &str {
        &self.default_template
    }

    pub fn template_names() -> [&'static str; 3] {
        ["standard", "concise", "academic"]
    }

    /// Unknown names resolve to `standard`.
    pub fn resolve_template(name: &str) -> (&'static str, &'static str) {
        match name.trim().to_lowercase().as_str() {
            "standard" | "padrao" | "padrão" => ("standard", STANDARD_TEMPLATE),
            "concise" | "conciso" => ("concise", CONCISE_TEMPLATE),
            "academic" | "academico" | "acadêmico" => ("academic", ACADEMIC_TEMPLATE),
            other => {
                warn!(template = other, "unknown prompt template, using standard");
                ("standard", STANDARD_TEMPLATE)
            }
        }
    }

    pub fn render(
        &self,
        template_name: &str,
        contexts: &[PromptContext<'_>],
        question: &str,
        system_prompt: Option<&str>,
    ) -> RenderedPrompt {
        let (template, body) = Self::resolve_template(template_name);
        let rendered_contexts = contexts
            .iter()
            .enumerate()
            .map(|(index, context)| {
                format!(
                    "[Document {} - {}]\n{}",
                    index + 1,
                    context.file_name,
                    self.truncate(context.content)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        RenderedPrompt {
            template,
            system_prompt: system_prompt.unwrap_or(SYSTEM_PROMPT).to_string(),
            prompt: body
                .replace("{contexts}", &rendered_contexts)
                .replace("{question}", question.trim()),
        }
    }

    /// Renders with the configured default template and system prompt.
    pub fn render_default(&self, contexts: &[PromptContext<'_>], question: &str) -> RenderedPrompt {
        self.render(&self.default_template, contexts, question, None)
    }

    fn truncate(&self, content: &str) -> String {
        let content = content.trim();
        match content.char_indices().nth(self.max_context_chars) {
            Some((cut, _)) => format!("{}{}", content[..cut].trim_end(), TRUNCATION_MARKER),
            None => content.to_string(),
        }
    }
}
