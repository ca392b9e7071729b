//! The request pipeline: route, dispatch, aggregate.

use std::sync::Arc;
use std::time::Instant;

use safespace_common::{Request, Result};
use safespace_llm::{build_llm_client, build_vision_client};
use safespace_retrieval::{DocumentQa, Embedder, EmbeddingService, IndexStore, RetrievalService};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, SYNTHESIS_TEMPERATURE};
use crate::config::CoordinatorConfig;
use crate::dispatcher::Dispatcher;
use crate::handlers::{
    EmergencyHandler, FindTherapistHandler, HealthSpecialistHandler, MentalSpecialistHandler,
    SamplingParams, VisionAnalysisHandler,
};
use crate::notify::{LoggingNotifier, Notifier, TwilioNotifier};
use crate::registry::HandlerRegistry;
use crate::router::{Router, RoutingDecision, ROUTER_TEMPERATURE};
use crate::slots::OutputSlots;

/// Lifecycle of one request. Every stage has a successor until `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Routed,
    Dispatching,
    Aggregated,
    Done,
}

impl PipelineStage {
    pub fn next(self) -> Option<Self> {
        match self {
            PipelineStage::Received => Some(PipelineStage::Routed),
            PipelineStage::Routed => Some(PipelineStage::Dispatching),
            PipelineStage::Dispatching => Some(PipelineStage::Aggregated),
            PipelineStage::Aggregated => Some(PipelineStage::Done),
            PipelineStage::Done => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineStage::Done
    }
}

/// Per-request context: the immutable request plus stage tracking.
struct RequestContext {
    request: Arc<Request>,
    stage: PipelineStage,
    stages: Vec<PipelineStage>,
    started: Instant,
}

impl RequestContext {
    fn new(request: Request) -> Self {
        info!(
            request_id = %request.id,
            has_image = request.has_image(),
            content_preview = %request.message.chars().take(50).collect::<String>(),
            "Request received"
        );
        Self {
            request: Arc::new(request),
            stage: PipelineStage::Received,
            stages: vec![PipelineStage::Received],
            started: Instant::now(),
        }
    }

    fn advance(&mut self) {
        let Some(next) = self.stage.next() else {
            return;
        };
        self.stage = next;
        self.stages.push(next);
        debug!(
            request_id = %self.request.id,
            stage = ?next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Pipeline stage"
        );
    }
}

/// Everything produced while answering one request.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub request_id: String,
    pub decision: RoutingDecision,
    pub slots: OutputSlots,
    pub response: String,
    pub stages: Vec<PipelineStage>,
    pub elapsed_ms: u64,
}

/// Routes a request, fans it out to the selected handlers and synthesizes
/// one reply. Every step degrades instead of failing, so `process` always
/// reaches `Done`.
pub struct Coordinator {
    router: Router,
    dispatcher: Dispatcher,
    aggregator: Aggregator,
    retrieval: Option<Arc<RetrievalService>>,
}

impl Coordinator {
    pub fn new(router: Router, dispatcher: Dispatcher, aggregator: Aggregator) -> Self {
        Self {
            router,
            dispatcher,
            aggregator,
            retrieval: None,
        }
    }

    /// Builds every collaborator client and handler from configuration.
    pub fn from_config(config: &CoordinatorConfig) -> anyhow::Result<Self> {
        info!("Initializing SafeSpace coordinator");
        let collaborator_timeout = config.timeouts.collaborator();

        let router_llm = build_llm_client(&config.router, collaborator_timeout)?;
        let synthesis_llm = build_llm_client(&config.synthesis, collaborator_timeout)?;
        let specialist_llm = build_llm_client(&config.specialist, collaborator_timeout)?;
        let vision = build_vision_client(&config.vision, collaborator_timeout)?;

        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingService::from_model_str(
            &config.retrieval.embedding_model,
        )?);
        let store = IndexStore::new(config.retrieval.clone(), embedder.clone());
        let qa = DocumentQa::new(router_llm.clone(), embedder, config.retrieval.top_k);
        let retrieval = Arc::new(RetrievalService::new(store, qa));

        let notifier: Arc<dyn Notifier> = match config.emergency.resolve_twilio() {
            Some(creds) => {
                let mut notifier =
                    TwilioNotifier::new(creds.account_sid, creds.auth_token, creds.from_number);
                if let Some(url) = &config.emergency.api_url {
                    notifier = notifier.with_base_url(url.clone());
                }
                Arc::new(notifier)
            }
            None => {
                warn!("Twilio credentials incomplete, emergency alerts will only be logged");
                Arc::new(LoggingNotifier)
            }
        };
        let contact = config.emergency.resolve_contact().unwrap_or_else(|| {
            warn!("No emergency contact configured");
            String::new()
        });

        let params = SamplingParams::from(&config.specialist);
        let registry = HandlerRegistry::builder()
            .register(Arc::new(MentalSpecialistHandler::new(
                specialist_llm.clone(),
                params,
            )))
            .register(Arc::new(HealthSpecialistHandler::new(
                retrieval.clone(),
                specialist_llm,
                params,
            )))
            .register(Arc::new(FindTherapistHandler))
            .register(Arc::new(EmergencyHandler::new(
                notifier,
                contact,
                config.timeouts.notification(),
            )))
            .register(Arc::new(VisionAnalysisHandler::new(vision)))
            .build()?;

        let router = Router::new(router_llm)
            .with_temperature(config.router.temperature.unwrap_or(ROUTER_TEMPERATURE));
        let dispatcher =
            Dispatcher::new(Arc::new(registry)).with_handler_timeout(config.timeouts.handler());
        let aggregator = Aggregator::new(synthesis_llm)
            .with_temperature(config.synthesis.temperature.unwrap_or(SYNTHESIS_TEMPERATURE));

        Ok(Self::new(router, dispatcher, aggregator).with_retrieval(retrieval))
    }

    pub fn with_retrieval(mut self, retrieval: Arc<RetrievalService>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Loads or builds the document index ahead of the first medical
    /// question.
    pub async fn warm_up(&self) -> Result<()> {
        if let Some(retrieval) = &self.retrieval {
            let index = retrieval.store().get_or_build().await?;
            info!(chunks = index.len(), "Document index ready");
        }
        Ok(())
    }

    /// Decide which capabilities should answer.
    pub async fn triage(&self, request: &Request) -> RoutingDecision {
        self.router.route_request(request).await
    }

    /// Run the selected handlers and collect their slots.
    pub async fn execute(&self, decision: &RoutingDecision, request: Arc<Request>) -> OutputSlots {
        self.dispatcher.dispatch(decision, request).await
    }

    /// Merge the populated slots into one reply.
    pub async fn synthesize(&self, slots: &OutputSlots) -> String {
        self.aggregator.aggregate(slots).await
    }

    /// Process a request end-to-end.
    pub async fn process(&self, request: Request) -> PipelineOutcome {
        let mut ctx = RequestContext::new(request);

        let decision = self.triage(&ctx.request).await;
        ctx.advance();

        ctx.advance();
        let slots = self.execute(&decision, ctx.request.clone()).await;

        let response = self.synthesize(&slots).await;
        ctx.advance();
        ctx.advance();

        let elapsed_ms = ctx.started.elapsed().as_millis() as u64;
        info!(
            request_id = %ctx.request.id,
            capabilities = ?decision.names(),
            fallback = decision.is_fallback(),
            elapsed_ms,
            "Request done"
        );

        PipelineOutcome {
            request_id: ctx.request.id.clone(),
            decision,
            slots,
            response,
            stages: ctx.stages,
            elapsed_ms,
        }
    }

    /// Convenience: process and return only the reply text.
    pub async fn respond(&self, request: Request) -> String {
        self.process(request).await.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::handlers::{Handler, HandlerOutcome};
    use async_trait::async_trait;
    use safespace_common::SafeSpaceError;
    use safespace_llm::{LlmClient, LlmRequest, LlmResponse};

    struct Reply(&'static str);

    #[async_trait]
    impl LlmClient for Reply {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse::text(self.0, "reply"))
        }

        fn model_name(&self) -> &str {
            "reply"
        }
    }

    struct Down;

    #[async_trait]
    impl LlmClient for Down {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Err(SafeSpaceError::Llm("down".into()))
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    struct Broken;

    #[async_trait]
    impl Handler for Broken {
        fn capability(&self) -> Capability {
            Capability::MentalSpecialist
        }

        async fn handle(&self, _request: &Request) -> HandlerOutcome {
            Err(SafeSpaceError::Llm("ollama offline".into()).into())
        }
    }

    fn coordinator(router: Arc<dyn LlmClient>, synth: Arc<dyn LlmClient>) -> Coordinator {
        let registry = HandlerRegistry::builder()
            .register(Arc::new(Broken))
            .register(Arc::new(FindTherapistHandler))
            .build_partial();
        Coordinator::new(
            Router::new(router),
            Dispatcher::new(Arc::new(registry)),
            Aggregator::new(synth),
        )
    }

    #[test]
    fn test_stage_sequence() {
        let mut stage = PipelineStage::Received;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                PipelineStage::Received,
                PipelineStage::Routed,
                PipelineStage::Dispatching,
                PipelineStage::Aggregated,
                PipelineStage::Done,
            ]
        );
        assert!(stage.is_terminal());
    }

    #[tokio::test]
    async fn test_process_reaches_done_when_everything_fails() {
        let coordinator = coordinator(Arc::new(Down), Arc::new(Down));
        let outcome = coordinator.process(Request::new("hello")).await;

        assert!(outcome.decision.is_fallback());
        assert_eq!(outcome.stages.last(), Some(&PipelineStage::Done));
        assert_eq!(outcome.stages.len(), 5);
        assert!(!outcome.response.is_empty());
        assert!(outcome.slots.is_populated(Capability::MentalSpecialist));
    }

    #[tokio::test]
    async fn test_process_returns_synthesis() {
        let coordinator = coordinator(
            Arc::new(Reply(r#"["find_therapist"]"#)),
            Arc::new(Reply("Here are some therapists near you.")),
        );

        let outcome = coordinator.process(Request::new("therapist nearby?")).await;
        assert_eq!(outcome.decision.names(), vec!["find_therapist"]);
        assert_eq!(outcome.response, "Here are some therapists near you.");
        assert!(outcome.request_id.starts_with("req_"));
    }

    #[tokio::test]
    async fn test_warm_up_without_retrieval_is_noop() {
        let coordinator = coordinator(Arc::new(Down), Arc::new(Down));
        assert!(coordinator.warm_up().await.is_ok());
    }
}
