use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use retouch_contracts::session::DispatchInput;
use retouch_contracts::state::{EntryOutcome, ResultPayload};

use crate::config::{ConcurrencyPolicy, EngineConfig};
use crate::dispatcher::Dispatcher;
use crate::errors::{DispatchError, ErrorKind};

/// Reported to the observer in index order.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchProgress {
    Started {
        index: usize,
        total: usize,
    },
    Resolved {
        index: usize,
        total: usize,
        payload: ResultPayload,
    },
    Failed {
        index: usize,
        total: usize,
        error: DispatchError,
    },
    /// Entry `index` and everything after it stay pending.
    Aborted { index: usize, error: DispatchError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub outcomes: Vec<EntryOutcome>,
    pub aborted: Option<DispatchError>,
}

impl BatchOutcome {
    pub fn resolved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, EntryOutcome::Resolved(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, EntryOutcome::Failed(_)))
            .count()
    }
}

type DispatchResult = Result<ResultPayload, DispatchError>;

struct InFlight {
    receiver: Receiver<DispatchResult>,
    deadline: Instant,
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    dispatcher: Dispatcher,
    policy: ConcurrencyPolicy,
    deadline: Duration,
}

impl BatchOrchestrator {
    pub fn new(dispatcher: Dispatcher, policy: ConcurrencyPolicy, deadline: Duration) -> Self {
        Self {
            dispatcher,
            policy,
            deadline,
        }
    }

    pub fn from_config(dispatcher: Dispatcher, config: &EngineConfig) -> Self {
        Self::new(dispatcher, config.concurrency, config.request_timeout)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Dispatches every input, at most `policy.width()` at a time.
    ///
    /// Outcomes are published strictly by index: a fast call behind a slow
    /// one waits its turn. Starts are not: under `Bounded(n)` up to `n` calls
    /// report `Started` before entry 0 resolves, so only `Sequential`
    /// guarantees entry i settles before entry i+1 begins. An
    /// authentication-class failure stops the batch at that index; calls
    /// already in flight past it are abandoned and their entries stay pending.
    pub fn run(
        &self,
        inputs: &[DispatchInput],
        instruction: &str,
        is_edit: bool,
        api_key: Option<&str>,
        mut observe: impl FnMut(BatchProgress),
    ) -> BatchOutcome {
        let total = inputs.len();
        let width = self.policy.width();
        let mut outcomes = vec![EntryOutcome::Pending; total];
        let mut in_flight: VecDeque<InFlight> = VecDeque::with_capacity(width);
        let mut next_launch = 0;

        for index in 0..total {
            while next_launch < total && in_flight.len() < width {
                observe(BatchProgress::Started {
                    index: next_launch,
                    total,
                });
                in_flight.push_back(self.launch(&inputs[next_launch], instruction, is_edit, api_key));
                next_launch += 1;
            }
            let Some(call) = in_flight.pop_front() else {
                break;
            };
            match self.wait(call) {
                Ok(payload) => {
                    outcomes[index] = EntryOutcome::Resolved(payload.clone());
                    observe(BatchProgress::Resolved {
                        index,
                        total,
                        payload,
                    });
                }
                Err(error) if error.kind.aborts_batch() => {
                    observe(BatchProgress::Aborted {
                        index,
                        error: error.clone(),
                    });
                    return BatchOutcome {
                        outcomes,
                        aborted: Some(error),
                    };
                }
                Err(error) => {
                    outcomes[index] = EntryOutcome::Failed(error.message.clone());
                    observe(BatchProgress::Failed {
                        index,
                        total,
                        error,
                    });
                }
            }
        }

        BatchOutcome {
            outcomes,
            aborted: None,
        }
    }

    /// One input, same deadline as a batch call.
    pub fn retry_one(
        &self,
        input: &DispatchInput,
        instruction: &str,
        is_edit: bool,
        api_key: Option<&str>,
    ) -> DispatchResult {
        let call = self.launch(input, instruction, is_edit, api_key);
        self.wait(call)
    }

    fn launch(
        &self,
        input: &DispatchInput,
        instruction: &str,
        is_edit: bool,
        api_key: Option<&str>,
    ) -> InFlight {
        let (sender, receiver) = mpsc::channel();
        let dispatcher = self.dispatcher.clone();
        let bytes = input.bytes.clone();
        let instruction = instruction.to_string();
        let api_key = api_key.map(str::to_string);
        thread::spawn(move || {
            let result = dispatcher.dispatch(&bytes, &instruction, is_edit, api_key.as_deref());
            // The receiver is gone when the batch was aborted or timed out.
            let _ = sender.send(result);
        });
        InFlight {
            receiver,
            deadline: Instant::now() + self.deadline,
        }
    }

    fn wait(&self, call: InFlight) -> DispatchResult {
        let remaining = call.deadline.saturating_duration_since(Instant::now());
        match call.receiver.recv_timeout(remaining) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DispatchError::new(
                ErrorKind::Unknown,
                format!("Request timed out after {}s", self.deadline.as_secs_f64()),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::new(
                ErrorKind::Unknown,
                "dispatch worker exited without a result",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use retouch_contracts::images::DisplayRef;
    use retouch_contracts::session::DispatchInput;
    use retouch_contracts::state::EntryOutcome;

    use super::{BatchOrchestrator, BatchProgress};
    use crate::config::{ConcurrencyPolicy, EngineConfig};
    use crate::dispatcher::tests::{sample_png, ScriptedProvider};
    use crate::dispatcher::Dispatcher;
    use crate::errors::{ErrorKind, ProviderError};
    use crate::providers::{GeneratedImage, ImageProvider, ProviderRequest};

    fn inputs(count: usize) -> Vec<DispatchInput> {
        let bytes: Arc<[u8]> = Arc::from(sample_png());
        (0..count)
            .map(|index| DispatchInput {
                index,
                display: DisplayRef::new(format!("mem://{index}")),
                name: format!("{index}.png"),
                bytes: bytes.clone(),
            })
            .collect()
    }

    fn orchestrator(provider: Arc<dyn ImageProvider>, policy: ConcurrencyPolicy) -> BatchOrchestrator {
        let dispatcher = Dispatcher::new(provider, &EngineConfig::default());
        BatchOrchestrator::new(dispatcher, policy, Duration::from_secs(10))
    }

    fn label(event: &BatchProgress) -> String {
        match event {
            BatchProgress::Started { index, .. } => format!("start {index}"),
            BatchProgress::Resolved { index, .. } => format!("ok {index}"),
            BatchProgress::Failed { index, .. } => format!("fail {index}"),
            BatchProgress::Aborted { index, .. } => format!("abort {index}"),
        }
    }

    #[test]
    fn access_denied_aborts_and_leaves_rest_pending() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Some(b"one".to_vec())),
            Err(ProviderError::new("denied").with_http_status(403)),
            Ok(Some(b"three".to_vec())),
        ]));
        let mut seen = Vec::new();
        let outcome = orchestrator(provider.clone(), ConcurrencyPolicy::Sequential).run(
            &inputs(3),
            "add a hat",
            true,
            None,
            |event| seen.push(label(&event)),
        );

        assert!(matches!(outcome.outcomes[0], EntryOutcome::Resolved(_)));
        assert_eq!(outcome.outcomes[1], EntryOutcome::Pending);
        assert_eq!(outcome.outcomes[2], EntryOutcome::Pending);
        assert_eq!(
            outcome.aborted.map(|error| error.kind),
            Some(ErrorKind::AccessDenied)
        );
        assert_eq!(seen, vec!["start 0", "ok 0", "start 1", "abort 1"]);
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn rate_limit_fails_one_entry_and_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(Some(b"one".to_vec())),
            Err(ProviderError::new("Resource has been exhausted")
                .with_api_status("RESOURCE_EXHAUSTED")),
            Ok(Some(b"three".to_vec())),
        ]));
        let outcome = orchestrator(provider, ConcurrencyPolicy::Sequential).run(
            &inputs(3),
            "add a hat",
            true,
            None,
            |_| {},
        );

        assert!(outcome.aborted.is_none());
        assert_eq!(outcome.resolved(), 2);
        assert_eq!(
            outcome.outcomes[1],
            EntryOutcome::Failed("Too many requests. Please pause briefly.".to_string())
        );
    }

    struct SlowFirst;

    impl ImageProvider for SlowFirst {
        fn name(&self) -> &str {
            "slow-first"
        }

        fn requires_credential(&self) -> bool {
            false
        }

        fn analyze(&self, request: &ProviderRequest) -> Result<Option<String>, ProviderError> {
            if request.instruction.contains("slow") {
                thread::sleep(Duration::from_millis(300));
            }
            Ok(Some(request.instruction.clone()))
        }

        fn edit(&self, _request: &ProviderRequest) -> Result<Option<GeneratedImage>, ProviderError> {
            thread::sleep(Duration::from_millis(500));
            Ok(None)
        }
    }

    #[test]
    fn bounded_policy_publishes_in_index_order() {
        let batch = orchestrator(Arc::new(SlowFirst), ConcurrencyPolicy::Bounded(3));
        let mut order = Vec::new();
        let outcome = batch.run(&inputs(3), "slow", false, None, |event| {
            if let BatchProgress::Resolved { index, .. } = event {
                order.push(index);
            }
        });
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(outcome.resolved(), 3);
    }

    #[test]
    fn bounded_policy_starts_ahead_of_resolution() {
        let batch = orchestrator(Arc::new(SlowFirst), ConcurrencyPolicy::Bounded(3));
        let mut seen = Vec::new();
        batch.run(&inputs(3), "slow", false, None, |event| seen.push(label(&event)));
        assert_eq!(
            seen,
            vec!["start 0", "start 1", "start 2", "ok 0", "ok 1", "ok 2"]
        );
    }

    #[test]
    fn sequential_policy_settles_each_entry_before_the_next_starts() {
        let batch = orchestrator(Arc::new(SlowFirst), ConcurrencyPolicy::Sequential);
        let mut seen = Vec::new();
        batch.run(&inputs(2), "fast", false, None, |event| seen.push(label(&event)));
        assert_eq!(seen, vec!["start 0", "ok 0", "start 1", "ok 1"]);
    }

    #[test]
    fn calls_past_the_deadline_fail_as_unknown() {
        let dispatcher = Dispatcher::new(Arc::new(SlowFirst), &EngineConfig::default());
        let batch = BatchOrchestrator::new(
            dispatcher,
            ConcurrencyPolicy::Sequential,
            Duration::from_millis(50),
        );
        let err = batch.retry_one(&inputs(1)[0], "x", true, None).err();
        assert_eq!(err.as_ref().map(|err| err.kind), Some(ErrorKind::Unknown));
        assert!(err.is_some_and(|err| err.message.starts_with("Request timed out")));
    }

    #[test]
    fn retry_one_classifies_like_a_batch() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::new("blocked").with_api_status("SAFETY"),
        )]));
        let batch = orchestrator(provider, ConcurrencyPolicy::Sequential);
        let err = batch.retry_one(&inputs(1)[0], "x", true, None).err();
        assert_eq!(err.map(|err| err.kind), Some(ErrorKind::SafetyBlocked));
    }
}
