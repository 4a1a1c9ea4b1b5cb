use regex::Regex;
use std::sync::OnceLock;

/// Whole-input match: one or more salutations, well-being questions or
/// thanks, separated only by punctuation and whitespace.
const SMALL_TALK_PATTERN: &str = r"(?i)^(?:(?:ol[áa]|oi|e a[íi]|hello|hi|hey|howdy|greetings|bom dia|boa tarde|boa noite|good (?:morning|afternoon|evening)|tudo bem|tudo bom|como vai(?: voc[êe])?|como (?:voc[êe] )?est[áa]|how are you(?: doing)?|how's it going|what's up|obrigad[oa]|valeu|thanks|thank you|tchau|bye)[\s,.!?;:]*)+$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmallTalk {
    Greeting,
    NearEmpty,
}

pub const GREETING_REPLY: &str =
    "Hello! I'm doing well, thanks. Ask me anything about the documents you've loaded.";
pub const NEAR_EMPTY_REPLY: &str =
    "Could you tell me a bit more? Ask a question about the documents you've loaded.";

impl SmallTalk {
    pub fn reply(self) -> &'static str {
        match self {
            SmallTalk::Greeting => GREETING_REPLY,
            SmallTalk::NearEmpty => NEAR_EMPTY_REPLY,
        }
    }
}

fn pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(SMALL_TALK_PATTERN).ok())
        .as_ref()
}

/// `None` means the input deserves retrieval.
pub fn classify(question: &str) -> Option<SmallTalk> {
    let trimmed = question.trim();
    if trimmed.chars().filter(|ch| ch.is_alphanumeric()).count() < 2 {
        return Some(SmallTalk::NearEmpty);
    }
    match pattern() {
        Some(pattern) if pattern.is_match(trimmed) => Some(SmallTalk::Greeting),
        _ => None,
    }
}
