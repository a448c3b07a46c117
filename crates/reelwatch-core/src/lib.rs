pub mod config;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod models;
pub mod retry;
pub mod runner;
pub mod selftest;
pub mod traits;
pub mod trigger;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::{ConfigPaths, Secrets, Settings};
pub use error::AppError;
pub use filter::{FilterVerdict, PatternFilter};
pub use ledger::DedupLedger;
pub use models::{AcquisitionOutcome, AcquisitionRequest, CandidateItem, RunSummary, RunTotals};
pub use retry::{RetryPolicy, RetryingClient};
pub use runner::{
    PipelineEvent, PipelineReporter, PipelineRunner, RunnerConfig, TracingPipelineReporter,
    Trigger,
};
pub use traits::{AcquisitionSink, FeedSource, InvalidItemRecorder};
pub use trigger::{FireResult, TriggerHandle, TriggerReceiver, trigger_channel};
