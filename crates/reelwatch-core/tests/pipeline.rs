use std::time::Duration;

use reelwatch_core::testutil::{MockFeedSource, MockRecorder, MockReporter, MockSink};
use reelwatch_core::{
    AcquisitionOutcome, CandidateItem, DedupLedger, PatternFilter, PipelineRunner, RetryPolicy,
    RetryingClient, RunnerConfig, Trigger,
};

fn items() -> Vec<CandidateItem> {
    vec![
        CandidateItem::new("g1", "Movie.A.2025.1080p.WEBRip-Provider").with_imdb_id("1234567"),
        CandidateItem::new("g2", "Movie.B.2025.720p.HDTV-Provider").with_imdb_id("7654321"),
    ]
}

fn filter() -> PatternFilter {
    PatternFilter::new(&[r"1080p.*(WEBRip|BluRay).*-Provider"], &[] as &[&str]).unwrap()
}

fn client() -> RetryingClient {
    RetryingClient::new("test", RetryPolicy::new(2, Duration::from_millis(1)))
}

fn runner(
    ledger: DedupLedger,
    sink: MockSink,
) -> PipelineRunner<MockFeedSource, MockSink, MockRecorder> {
    PipelineRunner::new(
        MockFeedSource::new(items()),
        sink,
        MockRecorder::new(),
        filter(),
        ledger,
        client(),
        client(),
        RunnerConfig::default(),
    )
}

#[tokio::test]
async fn ledger_persists_between_process_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scanned_guids.txt");

    let first_sink = MockSink::new();
    let mut first = runner(DedupLedger::load(&path, 1000).unwrap(), first_sink.clone());
    let summary = first
        .run_once(Trigger::Startup, &MockReporter::new())
        .await
        .unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(first_sink.dispatched.lock().unwrap().len(), 1);
    drop(first);

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "g1\n");

    let second_sink = MockSink::new();
    let mut second = runner(DedupLedger::load(&path, 1000).unwrap(), second_sink.clone());
    let summary = second
        .run_once(Trigger::Startup, &MockReporter::new())
        .await
        .unwrap();

    assert_eq!(summary.already_seen, 1);
    assert_eq!(summary.added, 0);
    assert!(second_sink.dispatched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sink_rejections_are_recorded_so_they_are_not_resubmitted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scanned_guids.txt");

    for outcome in [AcquisitionOutcome::Invalid, AcquisitionOutcome::Excluded] {
        let _ = std::fs::remove_file(&path);
        let sink = MockSink::with_outcomes(vec![Ok(outcome)]);
        let mut runner = runner(DedupLedger::load(&path, 1000).unwrap(), sink);

        let summary = runner
            .run_once(Trigger::Manual, &MockReporter::new())
            .await
            .unwrap();

        assert_eq!(summary.added, 0);
        assert_eq!(summary.unprocessed.len(), 1);
        assert!(DedupLedger::load(&path, 1000).unwrap().contains("g1"));
    }
}

#[tokio::test]
async fn debug_mode_ledger_forgets_on_restart() {
    let sink = MockSink::new();
    let mut first = runner(DedupLedger::in_memory(1000), sink.clone());
    first
        .run_once(Trigger::Startup, &MockReporter::new())
        .await
        .unwrap();

    let mut second = runner(DedupLedger::in_memory(1000), sink.clone());
    second
        .run_once(Trigger::Startup, &MockReporter::new())
        .await
        .unwrap();

    assert_eq!(sink.dispatched.lock().unwrap().len(), 2);
}
