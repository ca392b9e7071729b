//! Capability routing.
//!
//! The routing model is asked for a JSON list of capability names. Its
//! reply is untrusted: anything unparsable, empty, or free of known names
//! degrades to the default decision instead of failing the request.

use std::collections::BTreeSet;
use std::sync::Arc;

use safespace_common::Request;
use safespace_llm::{LlmClient, LlmRequest};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capability::Capability;

/// Default sampling temperature for routing.
pub const ROUTER_TEMPERATURE: f32 = 0.2;

/// A non-empty set of capabilities selected for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    capabilities: BTreeSet<Capability>,
    fallback: bool,
}

impl RoutingDecision {
    /// The decision used whenever routing produced nothing usable.
    pub fn fallback() -> Self {
        Self {
            capabilities: BTreeSet::from([Capability::DEFAULT]),
            fallback: true,
        }
    }

    /// Builds a decision from capabilities, falling back when empty.
    pub fn from_capabilities(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        let capabilities: BTreeSet<_> = capabilities.into_iter().collect();
        if capabilities.is_empty() {
            return Self::fallback();
        }
        Self {
            capabilities,
            fallback: false,
        }
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Capabilities in digest priority order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Always false; kept for the `len` convention.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// True when the decision came from the fallback policy rather than
    /// the routing model.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|c| c.as_str()).collect()
    }
}

/// Parses a routing reply. Unknown names are dropped; a reply with no
/// usable names yields the fallback decision.
pub fn parse_decision(raw: &str) -> RoutingDecision {
    let Some(array) = extract_json_array(raw.trim()) else {
        warn!(reply = %preview(raw), "Routing reply has no JSON list, using fallback");
        return RoutingDecision::fallback();
    };

    let values: Vec<serde_json::Value> = match serde_json::from_str(array) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, reply = %preview(raw), "Malformed routing reply, using fallback");
            return RoutingDecision::fallback();
        }
    };

    let mut capabilities = BTreeSet::new();
    for value in &values {
        match value.as_str().map(str::trim).and_then(Capability::from_name) {
            Some(cap) => {
                capabilities.insert(cap);
            }
            None => debug!(value = %value, "Dropping unknown capability"),
        }
    }

    if capabilities.is_empty() {
        warn!(reply = %preview(raw), "Routing reply named no known capability, using fallback");
        return RoutingDecision::fallback();
    }

    RoutingDecision::from_capabilities(capabilities)
}

/// Finds the first balanced `[...]` in a reply, tolerating prose or code
/// fences around it.
fn extract_json_array(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}

/// Builds the routing prompt for a message.
pub fn build_prompt(message: &str, has_image: bool) -> String {
    let mut prompt = String::from(
        "You are a triage assistant for a mental and physical health AI system.\n\
         Based on the user's message, choose all relevant tools:\n",
    );
    for cap in [
        Capability::MentalSpecialist,
        Capability::HealthSpecialist,
        Capability::FindTherapist,
        Capability::Emergency,
        Capability::VisionAnalysis,
    ] {
        prompt.push_str(&format!("- \"{}\": {}\n", cap.as_str(), cap.trigger()));
    }
    prompt.push_str(
        "\nRespond ONLY as a JSON list of tool names.\n\
         For example: [\"mental_specialist\", \"health_specialist\"]\n",
    );
    prompt.push_str("\nMessage: ");
    prompt.push_str(message);
    if has_image {
        prompt.push_str("\n(The user has attached an image.)");
    }
    prompt
}

/// Asks the routing model which capabilities should answer a message.
pub struct Router {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            temperature: ROUTER_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Routes a bare message. Never fails: collaborator errors and
    /// timeouts yield the fallback decision.
    pub async fn route(&self, message: &str) -> RoutingDecision {
        self.route_prompt(build_prompt(message, false)).await
    }

    /// Routes a request, telling the model when an image is attached.
    pub async fn route_request(&self, request: &Request) -> RoutingDecision {
        self.route_prompt(build_prompt(&request.message, request.has_image()))
            .await
    }

    async fn route_prompt(&self, prompt: String) -> RoutingDecision {
        let request = LlmRequest::prompt(prompt).with_temperature(self.temperature);

        let decision = match self.llm.complete(request).await {
            Ok(response) => parse_decision(&response.content),
            Err(e) => {
                warn!(error = %e, model = %self.llm.model_name(), "Routing call failed, using fallback");
                RoutingDecision::fallback()
            }
        };

        info!(
            capabilities = ?decision.names(),
            fallback = decision.is_fallback(),
            "Routing decision made"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use safespace_common::{ImagePayload, Result, SafeSpaceError};
    use safespace_llm::LlmResponse;
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: Result<String>,
        prompts: Mutex<Vec<(String, Option<f32>)>>,
    }

    impl ScriptedLlm {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(SafeSpaceError::Timeout(std::time::Duration::from_secs(60))),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.prompts
                .lock()
                .unwrap()
                .push((request.messages[0].content.clone(), request.temperature));
            match &self.reply {
                Ok(text) => Ok(LlmResponse::text(text.clone(), "scripted")),
                Err(e) => Err(SafeSpaceError::Llm(e.to_string())),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_fallback_on_unparsable_or_empty() {
        for raw in ["not json", "[]", "[\"bogus_tool\"]", "", "[1, 2, null]", "[\"mental_specialist\""] {
            let decision = parse_decision(raw);
            assert!(decision.is_fallback(), "expected fallback for {raw:?}");
            assert_eq!(decision.names(), vec!["mental_specialist"]);
        }
    }

    #[test]
    fn test_invalid_names_dropped_valid_kept() {
        let decision = parse_decision(r#"["mental_specialist", "bogus", "emergency"]"#);
        assert!(!decision.is_fallback());
        assert_eq!(decision.len(), 2);
        assert!(decision.contains(Capability::MentalSpecialist));
        assert!(decision.contains(Capability::Emergency));
    }

    #[test]
    fn test_duplicates_collapse() {
        let decision = parse_decision(r#"["emergency", "emergency", " emergency "]"#);
        assert_eq!(decision.names(), vec!["emergency"]);
    }

    #[test]
    fn test_list_wrapped_in_prose() {
        let decision = parse_decision(
            "Sure! Here you go:\n```json\n[\"health_specialist\", \"find_therapist\"]\n```",
        );
        assert_eq!(decision.names(), vec!["find_therapist", "health_specialist"]);
    }

    #[test]
    fn test_brackets_inside_strings() {
        let decision = parse_decision(r#"["a]b", "vision_analysis"]"#);
        assert_eq!(decision.names(), vec!["vision_analysis"]);
    }

    #[test]
    fn test_prompt_lists_every_capability() {
        let prompt = build_prompt("I can't sleep", false);
        for cap in Capability::ALL {
            assert!(prompt.contains(&format!("\"{}\"", cap.as_str())));
        }
        assert!(prompt.ends_with("Message: I can't sleep"));
        assert!(build_prompt("look", true).contains("attached an image"));
    }

    #[tokio::test]
    async fn test_route_uses_low_temperature() {
        let llm = Arc::new(ScriptedLlm::replying(r#"["health_specialist"]"#));
        let router = Router::new(llm.clone());

        let decision = router.route("My knee hurts when I run").await;
        assert_eq!(decision.names(), vec!["health_specialist"]);

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].1, Some(ROUTER_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_collaborator_failure_falls_back() {
        let router = Router::new(Arc::new(ScriptedLlm::failing()));
        let decision = router.route("hello").await;
        assert!(decision.is_fallback());
        assert_eq!(decision.len(), 1);
    }

    #[tokio::test]
    async fn test_route_request_mentions_image() {
        let llm = Arc::new(ScriptedLlm::replying(r#"["vision_analysis"]"#));
        let router = Router::new(llm.clone());
        let request = Request::new("what is this?")
            .with_image(ImagePayload::png(vec![0x89, b'P', b'N', b'G']));

        let decision = router.route_request(&request).await;
        assert!(decision.contains(Capability::VisionAnalysis));
        assert!(llm.prompts.lock().unwrap()[0].0.contains("attached an image"));
    }

    #[test]
    fn test_from_capabilities_empty_is_fallback() {
        let decision = RoutingDecision::from_capabilities(Vec::new());
        assert!(decision.is_fallback());
        assert!(!decision.is_empty());
    }
}
