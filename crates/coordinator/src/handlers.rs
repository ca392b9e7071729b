//! Capability handlers.
//!
//! Each handler reads the request and produces text for its own slot.
//! Failures are typed; the dispatcher turns them into the capability's
//! user-facing failure text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use safespace_common::{Request, SafeSpaceError};
use safespace_llm::{LlmClient, LlmConfig, LlmRequest, VisionClient};
use safespace_retrieval::DocumentRetriever;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capability::Capability;
use crate::notify::Notifier;

pub const PSYCHOLOGIST_PROMPT: &str = "You are Doctor, a warm and experienced clinical psychologist.
Respond to patients with:

1. Emotional attunement (\"I can sense how difficult this must be...\")
2. Gentle normalization (\"Many people feel this way when...\")
3. Practical guidance (\"What sometimes helps is...\")
4. Strengths-focused support (\"I notice how you're...\")

Key principles:
- Never use brackets or labels
- Blend elements seamlessly
- Vary sentence structure
- Use natural transitions
- Mirror the user's language level
- Always keep the conversation going by asking open ended questions to dive into the root cause of patients problem";

pub const PHYSICIAN_PROMPT: &str = "You are Doctor, a warm and experienced one.
Respond to patients with:

1. What can cause this illness
2. Gentle normalization
3. Practical guidance like which food or medicine to take.
4. Strengths-focused support (\"What kind of exercise to do.\")

Key principles:
- Never use brackets or labels
- Blend elements seamlessly
- Vary sentence structure
- Use natural transitions
- Mirror the user's language level
- Always keep the conversation going by asking open ended questions to dive into the root cause of patients problem";

pub const IMAGE_ANALYSIS_PROMPT: &str =
    "You're a medical assistant. Analyze this image (X-ray, skin, etc.) and provide insights.";

pub const EMERGENCY_REASSURANCE: &str = "⚠️ Please stay with me. I'm contacting someone who can help you right now. You're not alone — help is on the way.";

pub const NO_IMAGE_SENTINEL: &str = "⚠️ No image provided.";

pub const THERAPIST_DIRECTORY: &str = "- Dr. Ayesha Kapoor - +1 (555) 123-4567\n\
- Dr. James Patel - +1 (555) 987-6543\n\
- MindCare Counseling Center - +1 (555) 222-3333";

const MENTAL_FAILURE: &str = "I'm having technical difficulties, but I want you to know your feelings matter. Please try again shortly.";
const HEALTH_FAILURE: &str = "⚠️ Sorry, I couldn't retrieve information from the document right now.";
const EMERGENCY_FAILURE: &str = "⚠️ I couldn't reach anyone automatically. If you are in danger, please call your local emergency number right now.";
const THERAPIST_FAILURE: &str = "⚠️ The therapist directory is unavailable right now.";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Collaborator(#[from] SafeSpaceError),

    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),

    #[error("handler task failed: {0}")]
    Panicked(String),

    #[error("no handler registered for {0}")]
    Unregistered(Capability),
}

pub type HandlerOutcome = Result<String, HandlerError>;

/// Text shown in a capability's slot when its handler fails.
pub fn failure_text(capability: Capability, error: &HandlerError) -> String {
    match capability {
        Capability::MentalSpecialist => MENTAL_FAILURE.into(),
        Capability::HealthSpecialist => HEALTH_FAILURE.into(),
        Capability::Emergency => EMERGENCY_FAILURE.into(),
        Capability::FindTherapist => THERAPIST_FAILURE.into(),
        Capability::VisionAnalysis => format!("Image analysis failed: {error}"),
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn capability(&self) -> Capability;

    async fn handle(&self, request: &Request) -> HandlerOutcome;
}

/// Sampling options forwarded to the specialist model.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl SamplingParams {
    pub fn apply(&self, mut request: LlmRequest) -> LlmRequest {
        request.temperature = self.temperature;
        request.top_p = self.top_p;
        request.max_tokens = self.max_tokens;
        request
    }
}

impl From<&LlmConfig> for SamplingParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

async fn specialist_chat(
    specialist: &dyn LlmClient,
    system_prompt: &str,
    message: &str,
    params: SamplingParams,
) -> Result<String, SafeSpaceError> {
    let request = params.apply(LlmRequest::prompt(message).with_system(system_prompt));
    let response = specialist.complete(request).await?;
    Ok(response.content.trim().to_string())
}

pub struct MentalSpecialistHandler {
    specialist: Arc<dyn LlmClient>,
    params: SamplingParams,
}

impl MentalSpecialistHandler {
    pub fn new(specialist: Arc<dyn LlmClient>, params: SamplingParams) -> Self {
        Self { specialist, params }
    }
}

#[async_trait]
impl Handler for MentalSpecialistHandler {
    fn capability(&self) -> Capability {
        Capability::MentalSpecialist
    }

    async fn handle(&self, request: &Request) -> HandlerOutcome {
        let answer = specialist_chat(
            self.specialist.as_ref(),
            PSYCHOLOGIST_PROMPT,
            &request.message,
            self.params,
        )
        .await?;
        Ok(answer)
    }
}

/// Document answer plus the physician's answer, kept side by side as two
/// independent opinions.
pub struct HealthSpecialistHandler {
    retriever: Arc<dyn DocumentRetriever>,
    specialist: Arc<dyn LlmClient>,
    params: SamplingParams,
}

impl HealthSpecialistHandler {
    pub fn new(
        retriever: Arc<dyn DocumentRetriever>,
        specialist: Arc<dyn LlmClient>,
        params: SamplingParams,
    ) -> Self {
        Self {
            retriever,
            specialist,
            params,
        }
    }
}

#[async_trait]
impl Handler for HealthSpecialistHandler {
    fn capability(&self) -> Capability {
        Capability::HealthSpecialist
    }

    async fn handle(&self, request: &Request) -> HandlerOutcome {
        let (document, physician) = tokio::try_join!(
            self.retriever.answer(&request.message),
            specialist_chat(
                self.specialist.as_ref(),
                PHYSICIAN_PROMPT,
                &request.message,
                self.params,
            ),
        )?;

        let parts: Vec<&str> = [document.trim(), physician.trim()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        Ok(parts.join("\n\n"))
    }
}

pub struct FindTherapistHandler;

#[async_trait]
impl Handler for FindTherapistHandler {
    fn capability(&self) -> Capability {
        Capability::FindTherapist
    }

    async fn handle(&self, _request: &Request) -> HandlerOutcome {
        Ok(THERAPIST_DIRECTORY.to_string())
    }
}

/// Alerts the emergency contact, then reassures the user. The alert is
/// awaited within `notify_timeout`; its failure is logged and never changes
/// the text returned.
pub struct EmergencyHandler {
    notifier: Arc<dyn Notifier>,
    contact: String,
    notify_timeout: Duration,
}

impl EmergencyHandler {
    pub fn new(notifier: Arc<dyn Notifier>, contact: impl Into<String>, notify_timeout: Duration) -> Self {
        Self {
            notifier,
            contact: contact.into(),
            notify_timeout,
        }
    }
}

#[async_trait]
impl Handler for EmergencyHandler {
    fn capability(&self) -> Capability {
        Capability::Emergency
    }

    async fn handle(&self, request: &Request) -> HandlerOutcome {
        info!(request_id = %request.id, "Emergency capability selected, notifying contact");

        match tokio::time::timeout(self.notify_timeout, self.notifier.notify(&self.contact)).await {
            Ok(Ok(())) => debug!(request_id = %request.id, "Emergency notification sent"),
            Ok(Err(e)) => error!(request_id = %request.id, error = %e, "Emergency notification failed"),
            Err(_) => error!(
                request_id = %request.id,
                timeout_ms = self.notify_timeout.as_millis() as u64,
                "Emergency notification timed out"
            ),
        }

        Ok(EMERGENCY_REASSURANCE.to_string())
    }
}

pub struct VisionAnalysisHandler {
    vision: Arc<dyn VisionClient>,
}

impl VisionAnalysisHandler {
    pub fn new(vision: Arc<dyn VisionClient>) -> Self {
        Self { vision }
    }
}

#[async_trait]
impl Handler for VisionAnalysisHandler {
    fn capability(&self) -> Capability {
        Capability::VisionAnalysis
    }

    async fn handle(&self, request: &Request) -> HandlerOutcome {
        let Some(image) = request.image.as_ref() else {
            warn!(request_id = %request.id, "Vision analysis selected without an image");
            return Ok(NO_IMAGE_SENTINEL.to_string());
        };

        let insight = self.vision.describe(image, IMAGE_ANALYSIS_PROMPT).await?;
        Ok(insight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safespace_common::{ImagePayload, Result};
    use safespace_llm::LlmResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct EchoLlm {
        requests: Mutex<Vec<LlmRequest>>,
        fail: bool,
    }

    impl EchoLlm {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(SafeSpaceError::Llm("connection refused".into()));
            }
            Ok(LlmResponse::text(" specialist says rest ", "echo"))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct StaticRetriever(Option<&'static str>);

    #[async_trait]
    impl DocumentRetriever for StaticRetriever {
        async fn answer(&self, _question: &str) -> Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| SafeSpaceError::Retrieval("index unavailable".into()))
        }
    }

    struct CountingNotifier {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _contact: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SafeSpaceError::Notification("carrier down".into()));
            }
            Ok(())
        }
    }

    struct HangingNotifier;

    #[async_trait]
    impl Notifier for HangingNotifier {
        async fn notify(&self, _contact: &str) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FixedVision {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionClient for FixedVision {
        async fn describe(&self, _image: &ImagePayload, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(prompt, IMAGE_ANALYSIS_PROMPT);
            Ok("A small red rash on the forearm.".into())
        }

        fn model_name(&self) -> &str {
            "fixed-vision"
        }
    }

    fn medgemma_params() -> SamplingParams {
        SamplingParams {
            temperature: Some(0.7),
            top_p: Some(0.9),
            max_tokens: Some(350),
        }
    }

    #[tokio::test]
    async fn test_mental_specialist_uses_psychologist_prompt() {
        let llm = EchoLlm::new(false);
        let handler = MentalSpecialistHandler::new(llm.clone(), medgemma_params());

        let text = handler.handle(&Request::new("I feel overwhelmed")).await.unwrap();
        assert_eq!(text, "specialist says rest");

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].system_prompt.as_deref(), Some(PSYCHOLOGIST_PROMPT));
        assert_eq!(requests[0].temperature, Some(0.7));
        assert_eq!(requests[0].top_p, Some(0.9));
        assert_eq!(requests[0].max_tokens, Some(350));
    }

    #[tokio::test]
    async fn test_mental_specialist_failure_is_typed() {
        let handler = MentalSpecialistHandler::new(EchoLlm::new(true), medgemma_params());
        let err = handler.handle(&Request::new("hi")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Collaborator(SafeSpaceError::Llm(_))));
        assert_eq!(failure_text(Capability::MentalSpecialist, &err), MENTAL_FAILURE);
    }

    #[tokio::test]
    async fn test_health_specialist_combines_two_opinions() {
        let llm = EchoLlm::new(false);
        let handler = HealthSpecialistHandler::new(
            Arc::new(StaticRetriever(Some("Runner's knee is common."))),
            llm.clone(),
            medgemma_params(),
        );

        let text = handler.handle(&Request::new("My knee hurts when I run")).await.unwrap();
        assert_eq!(text, "Runner's knee is common.\n\nspecialist says rest");
        assert_eq!(
            llm.requests.lock().unwrap()[0].system_prompt.as_deref(),
            Some(PHYSICIAN_PROMPT)
        );
    }

    #[tokio::test]
    async fn test_health_specialist_retrieval_failure() {
        let handler = HealthSpecialistHandler::new(
            Arc::new(StaticRetriever(None)),
            EchoLlm::new(false),
            medgemma_params(),
        );

        let err = handler.handle(&Request::new("fever")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Collaborator(SafeSpaceError::Retrieval(_))));
        assert_eq!(failure_text(Capability::HealthSpecialist, &err), HEALTH_FAILURE);
    }

    #[tokio::test]
    async fn test_find_therapist_is_static() {
        let text = FindTherapistHandler.handle(&Request::new("therapist near me")).await.unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("MindCare Counseling Center"));
    }

    #[tokio::test]
    async fn test_emergency_notifies_once_and_reassures() {
        let notifier = Arc::new(CountingNotifier { calls: AtomicUsize::new(0), fail: false });
        let handler = EmergencyHandler::new(notifier.clone(), "+15550001111", Duration::from_secs(5));

        let text = handler.handle(&Request::new("I want to hurt myself")).await.unwrap();
        assert_eq!(text, EMERGENCY_REASSURANCE);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emergency_notifier_failure_still_reassures() {
        let notifier = Arc::new(CountingNotifier { calls: AtomicUsize::new(0), fail: true });
        let handler = EmergencyHandler::new(notifier.clone(), "+1555", Duration::from_secs(5));

        let text = handler.handle(&Request::new("help")).await.unwrap();
        assert_eq!(text, EMERGENCY_REASSURANCE);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_notifier_timeout_still_reassures() {
        let handler = EmergencyHandler::new(Arc::new(HangingNotifier), "+1555", Duration::from_secs(10));
        let text = handler.handle(&Request::new("help")).await.unwrap();
        assert_eq!(text, EMERGENCY_REASSURANCE);
    }

    #[tokio::test]
    async fn test_vision_without_image_returns_sentinel() {
        let vision = Arc::new(FixedVision { calls: AtomicUsize::new(0) });
        let handler = VisionAnalysisHandler::new(vision.clone());

        let text = handler.handle(&Request::new("look at this")).await.unwrap();
        assert_eq!(text, NO_IMAGE_SENTINEL);
        assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vision_with_image_describes() {
        let vision = Arc::new(FixedVision { calls: AtomicUsize::new(0) });
        let handler = VisionAnalysisHandler::new(vision.clone());
        let request = Request::new("rash?").with_image(ImagePayload::png(vec![1, 2, 3]));

        let text = handler.handle(&request).await.unwrap();
        assert_eq!(text, "A small red rash on the forearm.");
        assert_eq!(vision.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_vision_failure_text_includes_reason() {
        let err = HandlerError::Collaborator(SafeSpaceError::Vision("rate limited".into()));
        assert_eq!(
            failure_text(Capability::VisionAnalysis, &err),
            "Image analysis failed: Vision error: rate limited"
        );
    }
}
