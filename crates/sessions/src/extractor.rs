//! The State Extractor: an optional, best-effort LLM call that turns one
//! (user, assistant) exchange into structured profile/knowledge/intent
//! signals. Mirrors the analyzer's "never block the main loop" posture —
//! a malformed or missing response degrades to an empty extraction rather
//! than propagating.

use std::collections::HashMap;
use std::sync::Arc;

use sa_domain::capability::ModelRole;
use sa_domain::config::ModelPricing;
use sa_domain::tool::Message;
use sa_providers::{ChatRequest, LlmRouter};
use serde::Deserialize;

/// What one exchange yielded. Every field is best-effort and may be empty.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub profile_updates: HashMap<String, String>,
    pub facts: Vec<String>,
    pub intent: Option<String>,
    /// Dollar cost of the extraction call (0.0 on any failure or skip).
    pub cost: f64,
}

pub struct StateExtractor {
    router: Arc<LlmRouter>,
    pricing: HashMap<String, ModelPricing>,
}

impl StateExtractor {
    pub fn new(router: Arc<LlmRouter>, pricing: HashMap<String, ModelPricing>) -> Self {
        Self { router, pricing }
    }

    /// Extract structured signal from one exchange. Never returns an error —
    /// any failure (LLM error, malformed JSON) yields `Extraction::default()`.
    pub async fn extract(&self, user_message: &str, assistant_message: &str) -> Extraction {
        let req = ChatRequest {
            messages: vec![Message::user(extraction_prompt(user_message, assistant_message))],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(400),
            json_mode: true,
            model: None,
        };

        match self.router.chat_for_role(ModelRole::Summarizer, req).await {
            Ok(resp) => {
                let cost = resp
                    .usage
                    .as_ref()
                    .and_then(|u| self.pricing.get(&resp.model).map(|p| p.estimate_cost(u.prompt_tokens, u.completion_tokens)))
                    .unwrap_or(0.0);
                match parse_extraction(&resp.content) {
                    Some(mut extraction) => {
                        extraction.cost = cost;
                        extraction
                    }
                    None => {
                        tracing::warn!("state extractor returned unparseable JSON, discarding");
                        Extraction { cost, ..Default::default() }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "state extractor LLM call failed, skipping extraction");
                Extraction::default()
            }
        }
    }
}

fn extraction_prompt(user_message: &str, assistant_message: &str) -> String {
    format!(
        "Given this exchange between a user and an assistant, extract durable signal \
         about the user for long-term memory.\n\n\
         User: {user_message}\n\
         Assistant: {assistant_message}\n\n\
         Respond with JSON only, matching this shape:\n\
         {{\"profile_updates\": {{\"<field>\": \"<value>\"}}, \
         \"facts\": [\"<short factual statement>\"], \
         \"intent\": \"<short intent label>\"|null}}\n\
         Omit fields you found nothing for rather than guessing. Use an empty \
         object/array when there is nothing to report."
    )
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    profile_updates: HashMap<String, String>,
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default)]
    intent: Option<String>,
}

fn parse_extraction(text: &str) -> Option<Extraction> {
    let json_slice = sa_domain::json_extract::extract_json_object(text)?;
    let raw: RawExtraction = serde_json::from_str(json_slice).ok()?;
    Some(Extraction {
        profile_updates: raw.profile_updates,
        facts: raw.facts,
        intent: raw.intent.filter(|s| !s.is_empty()),
        cost: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_extraction() {
        let text = r#"{"profile_updates": {"name": "Alex"}, "facts": ["likes Rust"], "intent": "introduce_self"}"#;
        let extraction = parse_extraction(text).unwrap();
        assert_eq!(extraction.profile_updates.get("name"), Some(&"Alex".to_string()));
        assert_eq!(extraction.facts, vec!["likes Rust".to_string()]);
        assert_eq!(extraction.intent.as_deref(), Some("introduce_self"));
    }

    #[test]
    fn tolerates_prose_wrapped_json() {
        let text = "Sure, here you go:\n{\"profile_updates\": {}, \"facts\": [], \"intent\": null}\nhope that helps";
        let extraction = parse_extraction(text).unwrap();
        assert!(extraction.profile_updates.is_empty());
        assert!(extraction.intent.is_none());
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(parse_extraction("not json at all").is_none());
    }

    #[test]
    fn empty_intent_string_normalizes_to_none() {
        let text = r#"{"profile_updates": {}, "facts": [], "intent": ""}"#;
        let extraction = parse_extraction(text).unwrap();
        assert!(extraction.intent.is_none());
    }
}
