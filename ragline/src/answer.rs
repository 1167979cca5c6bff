//! Grounded answering and cached-answer replay

use crate::error::Result;
use crate::providers::CompletionProvider;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// The exact answer given when the context does not support one
pub const FALLBACK_ANSWER: &str = "I don't know.";

/// Characters per replayed token
pub const REPLAY_CHUNK_CHARS: usize = 48;

/// Token sink for streaming answers
pub type TokenCallback<'a> = &'a mut (dyn FnMut(&str) + Send);

/// An answer as stored in the answer tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub citations: Vec<String>,
}

impl CachedAnswer {
    pub fn fallback() -> Self {
        Self {
            answer: FALLBACK_ANSWER.to_string(),
            citations: Vec::new(),
        }
    }
}

const RULES: [&str; 4] = [
    "You are a strict RAG assistant.",
    "Rules:",
    "- Use ONLY the provided CONTEXT to answer.",
    "- If the answer is not explicitly supported by CONTEXT, respond exactly: I don't know.",
];

/// Prompt asking for a JSON object with `answer` and `citations`
pub fn strict_prompt(question: &str, context_text: &str, sources: &[String]) -> String {
    let sources_json = serde_json::to_string(sources).unwrap_or_else(|_| "[]".to_string());

    let mut lines: Vec<&str> = RULES.to_vec();
    lines.extend([
        "- Provide citations as a JSON array of source strings (URLs).",
        "",
        "CONTEXT:",
        context_text,
        "",
    ]);
    let question_line = format!("QUESTION: {}", question);
    lines.push(question_line.as_str());
    lines.extend([
        "",
        "Return a JSON object with keys: answer, citations.",
        "citations must be a subset of the provided sources list.",
        "",
        "SOURCES LIST:",
        sources_json.as_str(),
    ]);

    lines.join("\n")
}

/// Prompt for free-text streaming; sources are not requested
pub fn stream_prompt(question: &str, context_text: &str) -> String {
    let mut lines: Vec<&str> = RULES.to_vec();
    lines.extend(["- Do NOT invent facts.", "", "CONTEXT:", context_text, ""]);
    let question_line = format!("QUESTION: {}", question);
    lines.push(question_line.as_str());

    lines.join("\n")
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    citations: Option<Vec<Value>>,
}

/// Strip a surrounding Markdown code fence, if any
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    // Drop an info string such as `json`
    match body.split_once('\n') {
        Some((info, rest)) if !info.trim().contains(' ') => rest.trim(),
        _ => body.trim(),
    }
}

/// Parse model output into an answer.
///
/// Unparseable output or an empty answer yields the fallback. Citations
/// that are not strings or not among `sources` are dropped.
pub fn parse_answer(text: &str, sources: &[String]) -> CachedAnswer {
    let raw: RawAnswer = match serde_json::from_str(strip_code_fence(text)) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Model answer was not valid JSON, using fallback: {}", e);
            return CachedAnswer::fallback();
        }
    };

    let answer = raw.answer.unwrap_or_default().trim().to_string();
    if answer.is_empty() {
        return CachedAnswer::fallback();
    }

    let mut citations: Vec<String> = Vec::new();
    for citation in raw.citations.unwrap_or_default() {
        if let Value::String(citation) = citation {
            if sources.contains(&citation) && !citations.contains(&citation) {
                citations.push(citation);
            }
        }
    }

    CachedAnswer { answer, citations }
}

/// Ask for a grounded answer in one completion call
pub async fn answer_strict(
    completion: &dyn CompletionProvider,
    question: &str,
    context_text: &str,
    sources: &[String],
) -> Result<CachedAnswer> {
    let prompt = strict_prompt(question, context_text, sources);
    let text = completion.complete(&prompt).await?;
    Ok(parse_answer(&text, sources))
}

/// Stream a grounded answer, forwarding each token and returning the full text
pub async fn stream_answer_strict(
    completion: &dyn CompletionProvider,
    question: &str,
    context_text: &str,
    on_token: TokenCallback<'_>,
) -> Result<String> {
    let prompt = stream_prompt(question, context_text);
    let mut tokens = completion.stream_complete(&prompt).await?;

    let mut buffer = String::new();
    while let Some(token) = tokens.next().await {
        let token = token?;
        if token.is_empty() {
            continue;
        }
        on_token(&token);
        buffer.push_str(&token);
    }

    debug!(chars = buffer.chars().count(), "Streamed answer finished");
    Ok(buffer)
}

/// Split `text` into pieces of at most `chunk_chars` characters
pub fn replay_chunks(text: &str, chunk_chars: usize) -> Vec<&str> {
    let chunk_chars = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == chunk_chars {
            chunks.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }

    chunks
}

/// Replay a stored answer through a token callback.
///
/// Emits fixed-size pieces in order; original token boundaries are not
/// reproduced. Returns the number of callback invocations.
pub fn replay_answer(answer: &str, on_token: TokenCallback<'_>) -> usize {
    let chunks = replay_chunks(answer, REPLAY_CHUNK_CHARS);
    for &chunk in &chunks {
        on_token(chunk);
    }
    chunks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockCompletion;

    fn sources() -> Vec<String> {
        vec!["https://a".to_string(), "https://b".to_string()]
    }

    #[test]
    fn test_parse_valid_answer() {
        let parsed = parse_answer(
            r#"{"answer":" It is reserved. ","citations":["https://a","https://evil"]}"#,
            &sources(),
        );
        assert_eq!(parsed.answer, "It is reserved.");
        assert_eq!(parsed.citations, vec!["https://a"]);
    }

    #[test]
    fn test_parse_fenced_answer() {
        let text = "```json\n{\"answer\":\"Yes.\",\"citations\":[\"https://b\"]}\n```";
        let parsed = parse_answer(text, &sources());
        assert_eq!(parsed.answer, "Yes.");
        assert_eq!(parsed.citations, vec!["https://b"]);
    }

    #[test]
    fn test_parse_failures_fall_back() {
        assert_eq!(parse_answer("plain prose", &sources()), CachedAnswer::fallback());
        assert_eq!(
            parse_answer(r#"{"answer":"   ","citations":["https://a"]}"#, &sources()),
            CachedAnswer::fallback()
        );
        assert_eq!(
            parse_answer(r#"{"citations":[]}"#, &sources()),
            CachedAnswer::fallback()
        );
    }

    #[test]
    fn test_strict_prompt_contains_sources() {
        let prompt = strict_prompt("Q?", "ctx", &sources());
        assert!(prompt.starts_with("You are a strict RAG assistant."));
        assert!(prompt.contains("CONTEXT:\nctx\n"));
        assert!(prompt.contains("QUESTION: Q?"));
        assert!(prompt.ends_with(r#"SOURCES LIST:
["https://a","https://b"]"#));
    }

    #[test]
    fn test_stream_prompt_omits_citation_rules() {
        let prompt = stream_prompt("Q?", "ctx");
        assert!(prompt.contains("Do NOT invent facts."));
        assert!(!prompt.contains("SOURCES LIST"));
        assert!(prompt.ends_with("QUESTION: Q?"));
    }

    #[test]
    fn test_replay_chunk_count_and_concatenation() {
        let answer = "x".repeat(100);
        let chunks = replay_chunks(&answer, 48);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), answer);

        assert!(replay_chunks("", 48).is_empty());
        assert_eq!(replay_chunks(&"y".repeat(48), 48).len(), 1);
    }

    #[test]
    fn test_replay_never_splits_characters() {
        let answer = "é".repeat(50);
        let chunks = replay_chunks(&answer, 48);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 48);
        assert_eq!(chunks.concat(), answer);
    }

    #[test]
    fn test_replay_answer_invokes_callback_in_order() {
        let answer = "The quick brown fox jumps over the lazy dog. ".repeat(3);
        let mut received = Vec::new();
        let calls = replay_answer(&answer, &mut |token: &str| received.push(token.to_string()));

        assert_eq!(calls, answer.chars().count().div_ceil(REPLAY_CHUNK_CHARS));
        assert_eq!(received.concat(), answer);
    }

    #[tokio::test]
    async fn test_stream_answer_forwards_tokens() {
        let completion = MockCompletion::new("It is reserved for documentation.");
        let mut tokens = Vec::new();

        let buffer = stream_answer_strict(&completion, "Q?", "ctx", &mut |t: &str| {
            tokens.push(t.to_string())
        })
        .await
        .unwrap();

        assert_eq!(buffer, "It is reserved for documentation.");
        assert_eq!(tokens.concat(), buffer);
        assert!(tokens.len() > 1);
    }

    #[tokio::test]
    async fn test_answer_strict_uses_one_completion() {
        let completion = MockCompletion::new(r#"{"answer":"Yes.","citations":["https://a"]}"#);
        let answer = answer_strict(&completion, "Q?", "ctx", &sources())
            .await
            .unwrap();

        assert_eq!(answer.answer, "Yes.");
        assert_eq!(completion.complete_calls(), 1);
    }
}
