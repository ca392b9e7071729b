//! Fan-out over the selected capabilities with a join barrier.

use std::sync::Arc;
use std::time::{Duration, Instant};

use safespace_common::Request;
use tracing::{debug, error, info, warn};

use crate::capability::Capability;
use crate::handlers::{failure_text, HandlerError, HandlerOutcome};
use crate::registry::HandlerRegistry;
use crate::router::RoutingDecision;
use crate::slots::OutputSlots;

/// Default per-handler deadline.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Runs every selected handler concurrently and waits for all of them.
    ///
    /// Each selected capability gets exactly one slot: the handler's text,
    /// or its failure text when it errors, times out or panics.
    pub async fn dispatch(&self, decision: &RoutingDecision, request: Arc<Request>) -> OutputSlots {
        let start = Instant::now();
        info!(
            request_id = %request.id,
            handlers = decision.len(),
            "Dispatching to handlers"
        );

        let mut handles = Vec::with_capacity(decision.len());
        for capability in decision.iter() {
            let Some(handler) = self.registry.get(capability) else {
                handles.push((capability, None));
                continue;
            };
            let request = request.clone();
            let timeout = self.handler_timeout;

            let handle = tokio::spawn(async move {
                let step_start = Instant::now();
                let outcome = match tokio::time::timeout(timeout, handler.handle(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HandlerError::TimedOut(timeout)),
                };
                debug!(
                    capability = %capability,
                    ok = outcome.is_ok(),
                    elapsed_ms = step_start.elapsed().as_millis() as u64,
                    "Handler finished"
                );
                outcome
            });
            handles.push((capability, Some(handle)));
        }

        let mut slots = OutputSlots::new();
        for (capability, handle) in handles {
            let outcome: HandlerOutcome = match handle {
                Some(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(capability = %capability, error = %e, "Handler task join error");
                        Err(HandlerError::Panicked(e.to_string()))
                    }
                },
                None => Err(HandlerError::Unregistered(capability)),
            };

            let text = resolve(capability, outcome);
            if let Err(e) = slots.write(capability, text) {
                warn!(error = %e, "Ignoring duplicate slot write");
            }
        }

        info!(
            request_id = %request.id,
            populated = slots.populated().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatch complete"
        );
        slots
    }
}

fn resolve(capability: Capability, outcome: HandlerOutcome) -> String {
    match outcome {
        Ok(text) => text,
        Err(e) => {
            warn!(capability = %capability, error = %e, "Handler failed, using failure text");
            failure_text(capability, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{FindTherapistHandler, Handler};
    use async_trait::async_trait;
    use safespace_common::SafeSpaceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        capability: Capability,
        text: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Handler for Fixed {
        fn capability(&self) -> Capability {
            self.capability
        }

        async fn handle(&self, _request: &Request) -> HandlerOutcome {
            tokio::time::sleep(self.delay).await;
            Ok(self.text.to_string())
        }
    }

    struct Failing(Capability);

    #[async_trait]
    impl Handler for Failing {
        fn capability(&self) -> Capability {
            self.0
        }

        async fn handle(&self, _request: &Request) -> HandlerOutcome {
            Err(SafeSpaceError::Llm("boom".into()).into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Handler for Panicking {
        fn capability(&self) -> Capability {
            Capability::VisionAnalysis
        }

        async fn handle(&self, _request: &Request) -> HandlerOutcome {
            panic!("decoder exploded");
        }
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler for Counting {
        fn capability(&self) -> Capability {
            Capability::Emergency
        }

        async fn handle(&self, _request: &Request) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("alerted".into())
        }
    }

    fn dispatcher(handlers: Vec<Arc<dyn Handler>>) -> Dispatcher {
        let registry = handlers
            .into_iter()
            .fold(HandlerRegistry::builder(), |b, h| b.register(h))
            .build_partial();
        Dispatcher::new(Arc::new(registry))
    }

    fn decision(caps: &[Capability]) -> RoutingDecision {
        RoutingDecision::from_capabilities(caps.iter().copied())
    }

    #[tokio::test]
    async fn test_sibling_survives_failure() {
        let dispatcher = dispatcher(vec![
            Arc::new(Fixed {
                capability: Capability::MentalSpecialist,
                text: "breathe",
                delay: Duration::ZERO,
            }),
            Arc::new(Failing(Capability::HealthSpecialist)),
        ]);

        let slots = dispatcher
            .dispatch(
                &decision(&[Capability::MentalSpecialist, Capability::HealthSpecialist]),
                Arc::new(Request::new("stressed and feverish")),
            )
            .await;

        assert_eq!(slots.get(Capability::MentalSpecialist), Some("breathe"));
        assert_eq!(
            slots.get(Capability::HealthSpecialist),
            Some("⚠️ Sorry, I couldn't retrieve information from the document right now.")
        );
    }

    #[tokio::test]
    async fn test_only_selected_handlers_run() {
        let counting = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let dispatcher = dispatcher(vec![counting.clone(), Arc::new(FindTherapistHandler)]);

        let slots = dispatcher
            .dispatch(&decision(&[Capability::FindTherapist]), Arc::new(Request::new("x")))
            .await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
        assert!(slots.get(Capability::Emergency).is_none());
        assert!(slots.is_populated(Capability::FindTherapist));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_text() {
        let dispatcher = dispatcher(vec![Arc::new(Panicking)]);
        let slots = dispatcher
            .dispatch(&decision(&[Capability::VisionAnalysis]), Arc::new(Request::new("x")))
            .await;

        let text = slots.get(Capability::VisionAnalysis).unwrap();
        assert!(text.starts_with("Image analysis failed:"), "got {text}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let dispatcher = dispatcher(vec![
            Arc::new(Fixed {
                capability: Capability::MentalSpecialist,
                text: "too late",
                delay: Duration::from_secs(600),
            }),
            Arc::new(FindTherapistHandler),
        ])
        .with_handler_timeout(Duration::from_secs(5));

        let slots = dispatcher
            .dispatch(
                &decision(&[Capability::MentalSpecialist, Capability::FindTherapist]),
                Arc::new(Request::new("x")),
            )
            .await;

        assert!(slots.get(Capability::MentalSpecialist).unwrap().contains("technical difficulties"));
        assert!(slots.is_populated(Capability::FindTherapist));
    }

    #[tokio::test]
    async fn test_waits_for_all_regardless_of_completion_order() {
        let dispatcher = dispatcher(vec![
            Arc::new(Fixed {
                capability: Capability::MentalSpecialist,
                text: "slow",
                delay: Duration::from_millis(50),
            }),
            Arc::new(Fixed {
                capability: Capability::HealthSpecialist,
                text: "fast",
                delay: Duration::ZERO,
            }),
        ]);

        let slots = dispatcher
            .dispatch(
                &decision(&[Capability::HealthSpecialist, Capability::MentalSpecialist]),
                Arc::new(Request::new("x")),
            )
            .await;

        let populated: Vec<_> = slots.populated().collect();
        assert_eq!(
            populated,
            vec![
                (Capability::MentalSpecialist, "slow"),
                (Capability::HealthSpecialist, "fast"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unregistered_capability_gets_failure_text() {
        let dispatcher = dispatcher(vec![]);
        let slots = dispatcher
            .dispatch(&decision(&[Capability::MentalSpecialist]), Arc::new(Request::new("x")))
            .await;
        assert!(slots.is_populated(Capability::MentalSpecialist));
    }
}
