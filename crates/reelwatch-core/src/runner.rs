use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::filter::{FilterVerdict, PatternFilter};
use crate::ledger::DedupLedger;
use crate::models::{AcquisitionOutcome, AcquisitionRequest, CandidateItem, RunSummary, RunTotals};
use crate::retry::RetryingClient;
use crate::traits::{AcquisitionSink, FeedSource, InvalidItemRecorder};
use crate::trigger::TriggerReceiver;

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Events emitted by the runner for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    Started {
        interval: Duration,
        ledger_entries: usize,
    },
    PassStarted {
        run_id: Uuid,
        trigger: Trigger,
    },
    FeedFetched {
        run_id: Uuid,
        items: usize,
        previously_seen: usize,
    },
    ItemFiltered {
        title: &'a str,
        excluded_by: Option<&'a str>,
    },
    ItemAlreadySeen {
        guid: &'a str,
        title: &'a str,
    },
    ItemMatched {
        title: &'a str,
    },
    ItemInvalid {
        title: &'a str,
        error: &'a str,
    },
    ItemDispatched {
        title: &'a str,
        imdb_id: &'a str,
        outcome: AcquisitionOutcome,
    },
    DispatchFailed {
        title: &'a str,
        imdb_id: &'a str,
        error: &'a str,
    },
    LedgerWriteFailed {
        guid: &'a str,
        error: &'a str,
    },
    PassCompleted {
        run_id: Uuid,
        summary: &'a RunSummary,
        totals: &'a RunTotals,
    },
    PassAborted {
        run_id: Uuid,
        error: &'a str,
        next_run: Option<DateTime<Local>>,
    },
    Waiting {
        next_run: DateTime<Local>,
    },
    ShuttingDown {
        totals: &'a RunTotals,
    },
    Stopped,
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::Started {
                interval,
                ledger_entries,
            } => {
                tracing::info!(
                    interval_mins = interval.as_secs() / 60,
                    %ledger_entries,
                    "Pipeline started"
                );
            }
            PipelineEvent::PassStarted { run_id, trigger } => {
                tracing::info!(%run_id, %trigger, "Pass started");
            }
            PipelineEvent::FeedFetched {
                run_id,
                items,
                previously_seen,
            } => {
                tracing::info!(
                    %run_id,
                    %items,
                    %previously_seen,
                    "Fetched feed, {previously_seen} of {items} items previously processed"
                );
            }
            PipelineEvent::ItemFiltered { title, excluded_by } => match excluded_by {
                Some(pattern) => tracing::debug!(%title, %pattern, "NOT MATCHED (excluded)"),
                None => tracing::debug!(%title, "NOT MATCHED"),
            },
            PipelineEvent::ItemAlreadySeen { guid, title } => {
                tracing::debug!(%guid, %title, "Already processed");
            }
            PipelineEvent::ItemMatched { title } => {
                tracing::info!(%title, "MATCHED");
            }
            PipelineEvent::ItemInvalid { title, error } => {
                tracing::warn!(%title, %error, "Invalid item");
            }
            PipelineEvent::ItemDispatched {
                title,
                imdb_id,
                outcome,
            } => {
                tracing::info!(%title, %imdb_id, %outcome, "Dispatched");
            }
            PipelineEvent::DispatchFailed {
                title,
                imdb_id,
                error,
            } => {
                tracing::error!(%title, %imdb_id, %error, "Dispatch failed, will retry next pass");
            }
            PipelineEvent::LedgerWriteFailed { guid, error } => {
                tracing::error!(%guid, %error, "Failed to persist ledger");
            }
            PipelineEvent::PassCompleted {
                run_id,
                summary,
                totals,
            } => {
                tracing::info!(%run_id, "Summary for this run: {summary}");
                if !summary.unprocessed.is_empty() {
                    tracing::info!(%run_id, titles = ?summary.unprocessed, "Matched but not added");
                }
                tracing::info!("Cumulative summary: {totals}");
            }
            PipelineEvent::PassAborted {
                run_id,
                error,
                next_run,
            } => match next_run {
                Some(next_run) => tracing::error!(
                    %run_id,
                    %error,
                    next_run = %next_run.format("%Y-%m-%d %H:%M:%S"),
                    "Pass aborted"
                ),
                None => tracing::error!(%run_id, %error, "Pass aborted"),
            },
            PipelineEvent::Waiting { next_run } => {
                tracing::info!(
                    next_run = %next_run.format("%Y-%m-%d %H:%M:%S"),
                    "Next run scheduled"
                );
            }
            PipelineEvent::ShuttingDown { totals } => {
                tracing::info!(passes = totals.passes, aborted = totals.aborted, "Shutting down");
            }
            PipelineEvent::Stopped => {
                tracing::info!("Pipeline stopped");
            }
        }
    }
}

/// Scheduling configuration for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub interval: Duration,
    /// Run a pass before the first wait.
    pub run_on_start: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            run_on_start: true,
        }
    }
}

impl RunnerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }
}

/// Owns the pipeline state and runs fetch → filter → dedup → dispatch → record passes.
///
/// Passes take `&mut self`, so they can never overlap.
pub struct PipelineRunner<S, K, I>
where
    S: FeedSource,
    K: AcquisitionSink,
    I: InvalidItemRecorder,
{
    feed: S,
    sink: K,
    invalid_log: I,
    filter: PatternFilter,
    ledger: DedupLedger,
    feed_client: RetryingClient,
    sink_client: RetryingClient,
    config: RunnerConfig,
    totals: RunTotals,
}

impl<S, K, I> PipelineRunner<S, K, I>
where
    S: FeedSource,
    K: AcquisitionSink,
    I: InvalidItemRecorder,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: S,
        sink: K,
        invalid_log: I,
        filter: PatternFilter,
        ledger: DedupLedger,
        feed_client: RetryingClient,
        sink_client: RetryingClient,
        config: RunnerConfig,
    ) -> Self {
        Self {
            feed,
            sink,
            invalid_log,
            filter,
            ledger,
            feed_client,
            sink_client,
            config,
            totals: RunTotals::default(),
        }
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn totals(&self) -> &RunTotals {
        &self.totals
    }

    /// Run passes on startup, on every interval tick and on every manual
    /// trigger until `cancel_token` fires. A pass in progress always completes.
    pub async fn run<R: PipelineReporter>(
        &mut self,
        mut triggers: TriggerReceiver,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError> {
        reporter.report(PipelineEvent::Started {
            interval: self.config.interval,
            ledger_entries: self.ledger.len(),
        });

        let mut next = self.config.run_on_start.then_some(Trigger::Startup);

        loop {
            if let Some(trigger) = next.take() {
                let _ = self.pass(trigger, true, reporter).await;
            }

            if cancel_token.is_cancelled() {
                break;
            }

            // A trigger that arrived during the pass runs right away.
            if triggers.take_pending() {
                next = Some(Trigger::Manual);
                continue;
            }

            reporter.report(PipelineEvent::Waiting {
                next_run: self.next_run_time(),
            });

            next = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                () = triggers.recv() => Some(Trigger::Manual),
                () = tokio::time::sleep(self.config.interval) => Some(Trigger::Scheduled),
            };
        }

        reporter.report(PipelineEvent::ShuttingDown {
            totals: &self.totals,
        });
        reporter.report(PipelineEvent::Stopped);
        Ok(())
    }

    /// Run exactly one pass.
    pub async fn run_once<R: PipelineReporter>(
        &mut self,
        trigger: Trigger,
        reporter: &R,
    ) -> Result<RunSummary, AppError> {
        self.pass(trigger, false, reporter).await
    }

    async fn pass<R: PipelineReporter>(
        &mut self,
        trigger: Trigger,
        scheduled: bool,
        reporter: &R,
    ) -> Result<RunSummary, AppError> {
        let run_id = Uuid::new_v4();
        reporter.report(PipelineEvent::PassStarted { run_id, trigger });

        let items = match self.feed_client.execute(|| self.feed.fetch()).await {
            Ok(items) => items,
            Err(e) => {
                self.totals.aborted += 1;
                reporter.report(PipelineEvent::PassAborted {
                    run_id,
                    error: &e.to_string(),
                    next_run: scheduled.then(|| self.next_run_time()),
                });
                return Err(e);
            }
        };

        let previously_seen = items
            .iter()
            .filter(|item| self.ledger.contains(&item.guid))
            .count();
        reporter.report(PipelineEvent::FeedFetched {
            run_id,
            items: items.len(),
            previously_seen,
        });

        let mut summary = RunSummary {
            fetched: items.len(),
            ..Default::default()
        };
        for item in &items {
            self.process_item(item, &mut summary, reporter).await;
        }

        self.totals.absorb(&summary);
        reporter.report(PipelineEvent::PassCompleted {
            run_id,
            summary: &summary,
            totals: &self.totals,
        });
        Ok(summary)
    }

    async fn process_item<R: PipelineReporter>(
        &mut self,
        item: &CandidateItem,
        summary: &mut RunSummary,
        reporter: &R,
    ) {
        let title = item.title.as_str();

        match self.filter.evaluate(title) {
            FilterVerdict::Matched => {}
            verdict => {
                summary.filtered_out += 1;
                let excluded_by = match verdict {
                    FilterVerdict::Excluded(idx) => self.filter.exclude_pattern(idx),
                    _ => None,
                };
                reporter.report(PipelineEvent::ItemFiltered { title, excluded_by });
                return;
            }
        }

        if self.ledger.contains(&item.guid) {
            summary.already_seen += 1;
            reporter.report(PipelineEvent::ItemAlreadySeen {
                guid: &item.guid,
                title,
            });
            return;
        }

        reporter.report(PipelineEvent::ItemMatched { title });

        let imdb_id = match item.external_id() {
            Ok(id) => id,
            Err(e) => {
                summary.record_outcome(AcquisitionOutcome::Invalid, title);
                reporter.report(PipelineEvent::ItemInvalid {
                    title,
                    error: &e.to_string(),
                });
                self.log_invalid(title, None);
                self.remember(&item.guid, summary, reporter);
                return;
            }
        };

        let request = AcquisitionRequest {
            imdb_id,
            title: title.to_string(),
        };
        let outcome = match self
            .sink_client
            .execute(|| self.sink.dispatch(&request))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                summary.record_failure(title);
                reporter.report(PipelineEvent::DispatchFailed {
                    title,
                    imdb_id: &request.imdb_id,
                    error: &e.to_string(),
                });
                return;
            }
        };

        summary.record_outcome(outcome, title);
        reporter.report(PipelineEvent::ItemDispatched {
            title,
            imdb_id: &request.imdb_id,
            outcome,
        });
        if outcome == AcquisitionOutcome::Invalid {
            self.log_invalid(title, Some(&request.imdb_id));
        }

        // Recorded whatever the category: resubmitting would get the same answer.
        self.remember(&item.guid, summary, reporter);
    }

    /// A failed write keeps the entry in memory and does not stop the pass.
    fn remember<R: PipelineReporter>(
        &mut self,
        guid: &str,
        summary: &mut RunSummary,
        reporter: &R,
    ) {
        if let Err(e) = self.ledger.record(guid) {
            summary.ledger_errors += 1;
            reporter.report(PipelineEvent::LedgerWriteFailed {
                guid,
                error: &e.to_string(),
            });
        }
    }

    fn log_invalid(&self, title: &str, imdb_id: Option<&str>) {
        if let Err(e) = self.invalid_log.record(title, imdb_id) {
            tracing::warn!(%title, error = %e, "Failed to write invalid item log");
        }
    }

    fn next_run_time(&self) -> DateTime<Local> {
        let now = Local::now();
        TimeDelta::from_std(self.config.interval)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now)
    }
}
