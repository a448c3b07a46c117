//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::models::{AcquisitionOutcome, AcquisitionRequest, CandidateItem};
use crate::runner::{PipelineEvent, PipelineReporter};
use crate::traits::{AcquisitionSink, FeedSource, InvalidItemRecorder};

type FetchHook = Arc<dyn Fn(usize) + Send + Sync>;

// ---------------------------------------------------------------------------
// MockFeedSource
// ---------------------------------------------------------------------------

/// Mock feed that returns queued responses.
#[derive(Clone)]
pub struct MockFeedSource {
    /// Queue of responses. Each call pops the first element.
    /// If empty, repeats `fallback`.
    responses: Arc<Mutex<Vec<Result<Vec<CandidateItem>, AppError>>>>,
    fallback: Vec<CandidateItem>,
    /// Number of `fetch` calls so far.
    pub calls: Arc<AtomicUsize>,
    hook: Option<FetchHook>,
}

impl MockFeedSource {
    /// A feed that returns `items` on every fetch.
    pub fn new(items: Vec<CandidateItem>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            fallback: items,
            calls: Arc::new(AtomicUsize::new(0)),
            hook: None,
        }
    }

    pub fn with_responses(responses: Vec<Result<Vec<CandidateItem>, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::new(Vec::new())
        }
    }

    /// Run `hook` with the 1-based call number at the start of every fetch.
    pub fn on_fetch(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }
}

impl FeedSource for MockFeedSource {
    async fn fetch(&self) -> Result<Vec<CandidateItem>, AppError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.hook {
            hook(n);
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.fallback.clone())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock acquisition sink that records every dispatch call.
#[derive(Clone, Default)]
pub struct MockSink {
    /// Queue of outcomes. If empty, every call answers `Added`.
    outcomes: Arc<Mutex<Vec<Result<AcquisitionOutcome, AppError>>>>,
    /// Every request received, including ones that were answered with an error.
    pub dispatched: Arc<Mutex<Vec<AcquisitionRequest>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<AcquisitionOutcome, AppError>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes)),
            ..Self::default()
        }
    }
}

impl AcquisitionSink for MockSink {
    async fn dispatch(&self, request: &AcquisitionRequest) -> Result<AcquisitionOutcome, AppError> {
        self.dispatched.lock().unwrap().push(request.clone());
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(AcquisitionOutcome::Added)
        } else {
            outcomes.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockRecorder
// ---------------------------------------------------------------------------

/// Mock invalid-item recorder that stores entries in memory.
#[derive(Clone, Default)]
pub struct MockRecorder {
    pub recorded: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl MockRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvalidItemRecorder for MockRecorder {
    fn record(&self, title: &str, external_id: Option<&str>) -> Result<(), AppError> {
        self.recorded
            .lock()
            .unwrap()
            .push((title.to_string(), external_id.map(str::to_string)));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that keeps the name of every event it receives.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineReporter for MockReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        let label = match event {
            PipelineEvent::Started { .. } => "Started",
            PipelineEvent::PassStarted { .. } => "PassStarted",
            PipelineEvent::FeedFetched { .. } => "FeedFetched",
            PipelineEvent::ItemFiltered { .. } => "ItemFiltered",
            PipelineEvent::ItemAlreadySeen { .. } => "ItemAlreadySeen",
            PipelineEvent::ItemMatched { .. } => "ItemMatched",
            PipelineEvent::ItemInvalid { .. } => "ItemInvalid",
            PipelineEvent::ItemDispatched { .. } => "ItemDispatched",
            PipelineEvent::DispatchFailed { .. } => "DispatchFailed",
            PipelineEvent::LedgerWriteFailed { .. } => "LedgerWriteFailed",
            PipelineEvent::PassCompleted { .. } => "PassCompleted",
            PipelineEvent::PassAborted { .. } => "PassAborted",
            PipelineEvent::Waiting { .. } => "Waiting",
            PipelineEvent::ShuttingDown { .. } => "ShuttingDown",
            PipelineEvent::Stopped => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
